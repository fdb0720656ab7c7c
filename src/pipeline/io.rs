//! Audio sources and sinks opened per session.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::config::Config;
use crate::error::{Error, Result};

/// Produces interleaved 16-bit frames.
pub trait FrameSource: Send {
    /// Channels per frame.
    fn channels(&self) -> u16;

    /// Sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Fill `frame` with the next samples. Returns how many were written;
    /// fewer than `frame.len()` means the source is exhausted.
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<usize>;
}

/// Consumes interleaved 16-bit frames.
pub trait FrameSink: Send {
    /// Write one frame.
    fn write_frame(&mut self, frame: &[i16]) -> Result<()>;

    /// Flush buffered output at the end of a session.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens a fresh source and sink for every playback session.
pub trait SessionIo: Send + Sync {
    /// Open the audio source.
    fn open_source(&self) -> Result<Box<dyn FrameSource>>;

    /// Open the audio sink.
    fn open_sink(&self) -> Result<Box<dyn FrameSink>>;
}

fn format_label(channels: u16, rate: u32, bits: u16) -> String {
    format!("{} ch, {} Hz, {}-bit", channels, rate, bits)
}

/// WAV file source. Only 16-bit integer PCM is accepted.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
}

impl WavSource {
    /// Open `path` and check it against the expected format.
    pub fn open(path: &Path, channels: u16, sample_rate: u32) -> Result<Self> {
        let reader = WavReader::open(path)
            .map_err(|e| Error::Source(format!("cannot open {}: {}", path.display(), e)))?;
        let spec = reader.spec();
        if spec.channels != channels
            || spec.sample_rate != sample_rate
            || spec.bits_per_sample != 16
            || spec.sample_format != SampleFormat::Int
        {
            return Err(Error::FormatMismatch {
                expected: format_label(channels, sample_rate, 16),
                actual: format_label(spec.channels, spec.sample_rate, spec.bits_per_sample),
            });
        }
        tracing::info!(
            path = %path.display(),
            channels,
            sample_rate,
            samples = reader.len(),
            "opened audio source"
        );
        Ok(Self { reader, spec })
    }
}

impl FrameSource for WavSource {
    fn channels(&self) -> u16 {
        self.spec.channels
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn read_frame(&mut self, frame: &mut [i16]) -> Result<usize> {
        let mut n = 0;
        for (slot, sample) in frame.iter_mut().zip(self.reader.samples::<i16>()) {
            *slot = sample?;
            n += 1;
        }
        Ok(n)
    }
}

/// WAV file sink.
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavSink {
    /// Create `path` for 16-bit PCM output.
    pub fn create(path: &Path, channels: u16, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)
            .map_err(|e| Error::Sink(format!("cannot create {}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), "writing output to file");
        Ok(Self {
            writer: Some(writer),
        })
    }
}

impl FrameSink for WavSink {
    fn write_frame(&mut self, frame: &[i16]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Sink("sink already finished".into()))?;
        for &s in frame {
            writer
                .write_sample(s)
                .map_err(|e| Error::Sink(e.to_string()))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| Error::Sink(e.to_string()))?;
        }
        Ok(())
    }
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn write_frame(&mut self, _frame: &[i16]) -> Result<()> {
        Ok(())
    }
}

/// Where output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// ALSA playback device.
    Playback(String),
    /// WAV file.
    File(PathBuf),
    /// Nowhere.
    Discard,
}

/// Session I/O built from the daemon configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredIo {
    input: PathBuf,
    output: OutputTarget,
    channels: u16,
    sample_rate: u32,
}

impl ConfiguredIo {
    /// Output file if configured, else the ALSA device.
    pub fn from_config(config: &Config) -> Self {
        let output = match &config.output_file {
            Some(path) => OutputTarget::File(path.clone()),
            None => OutputTarget::Playback(config.pcm_device.clone()),
        };
        Self {
            input: config.input_file.clone(),
            output,
            channels: config.channels,
            sample_rate: config.sample_rate,
        }
    }

    /// Replace the output target.
    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }
}

impl SessionIo for ConfiguredIo {
    fn open_source(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(WavSource::open(
            &self.input,
            self.channels,
            self.sample_rate,
        )?))
    }

    fn open_sink(&self) -> Result<Box<dyn FrameSink>> {
        match &self.output {
            OutputTarget::File(path) => Ok(Box::new(WavSink::create(
                path,
                self.channels,
                self.sample_rate,
            )?)),
            #[cfg(feature = "alsa")]
            OutputTarget::Playback(device) => Ok(Box::new(super::alsa::AlsaSink::open(
                device,
                self.channels,
                self.sample_rate,
            )?)),
            #[cfg(not(feature = "alsa"))]
            OutputTarget::Playback(device) => {
                tracing::warn!(device = %device, "built without ALSA support, discarding output");
                Ok(Box::new(NullSink))
            }
            OutputTarget::Discard => Ok(Box::new(NullSink)),
        }
    }
}
