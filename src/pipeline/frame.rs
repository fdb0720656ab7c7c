//! The per-session frame loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::{FrameSink, FrameSource, SessionIo};
use crate::config::Config;
use crate::dsp::{ParameterControl, ProcessingMode, SignalEngine};
use crate::error::{Error, Result};
use crate::memory::ShmRegion;
use crate::observability::{
    CpuLoadSampler, FrameSample, MetricsAccumulator, SessionMetrics, Summary, Telemetry,
    frame_line, span_frame, span_session, summary_lines, waveform_line,
};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The source ran out of full frames.
    Exhausted,
    /// A stop was requested.
    Stopped,
}

/// Result of one completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// How the loop ended.
    pub outcome: SessionOutcome,
    /// Frames processed and written.
    pub frames: u64,
    /// Frames abandoned after transient faults.
    pub dropped: u64,
    /// Final statistics, if any frame completed.
    pub summary: Option<Summary>,
}

/// Tunables of the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Channels per frame.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Emit summary lines every this many frames.
    pub summary_interval: u64,
    /// Emit input and output waveform lines per frame.
    pub audio_logging: bool,
}

impl PipelineOptions {
    /// Options from the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            channels: config.channels,
            sample_rate: config.sample_rate,
            summary_interval: config.summary_interval.max(1),
            audio_logging: config.audio_logging,
        }
    }
}

enum FrameStep {
    Done(FrameSample),
    Exhausted,
}

/// Mean absolute sample value.
pub fn mean_amplitude(frame: &[i16]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: u64 = frame.iter().map(|&s| (s as i32).unsigned_abs() as u64).sum();
    sum as f64 / frame.len() as f64
}

/// Reads, processes and writes frames for one playback session at a time.
///
/// Owns the audio region and the engine across sessions; only the source
/// and sink are opened per session. Every access to the audio region goes
/// through a bracket guard:
///
/// 1. read a frame from the source into the region, once the remote core
///    has answered every earlier request
/// 2. run the engine (which brackets its own accesses)
/// 3. measure amplitude
/// 4. write the frame to the sink
///
/// Transient faults drop the current frame and the loop continues. Setup
/// faults end the session with an error.
pub struct FramePipeline {
    engine: SignalEngine,
    audio: ShmRegion,
    params: Arc<ParameterControl>,
    telemetry: Telemetry,
    cpu: CpuLoadSampler,
    options: PipelineOptions,
    sessions: u64,
}

impl FramePipeline {
    /// Assemble a pipeline. The audio region must hold a full frame.
    pub fn new(
        engine: SignalEngine,
        audio: ShmRegion,
        params: Arc<ParameterControl>,
        telemetry: Telemetry,
        options: PipelineOptions,
    ) -> Result<Self> {
        let needed = engine.frame_samples() * std::mem::size_of::<i16>();
        if needed > audio.len() {
            return Err(Error::Config(format!(
                "frame of {} bytes does not fit in {} byte audio region",
                needed,
                audio.len()
            )));
        }
        Ok(Self {
            engine,
            audio,
            params,
            telemetry,
            cpu: CpuLoadSampler::new(),
            options,
            sessions: 0,
        })
    }

    /// Replace the CPU load sampler.
    pub fn with_cpu_sampler(mut self, cpu: CpuLoadSampler) -> Self {
        self.cpu = cpu;
        self
    }

    /// Processing mode of the engine.
    pub fn mode(&self) -> ProcessingMode {
        self.engine.mode()
    }

    /// The audio region.
    pub fn audio(&self) -> &ShmRegion {
        &self.audio
    }

    /// The parameter control surface.
    pub fn params(&self) -> &Arc<ParameterControl> {
        &self.params
    }

    /// Release the audio region.
    pub fn shutdown(self) {
        self.audio.destroy();
    }

    /// Run one session until the source is exhausted or `stop` is set.
    ///
    /// A source or sink that cannot be opened, or a source whose format
    /// differs from the configured one, fails before the first frame.
    pub fn run(&mut self, io: &dyn SessionIo, stop: &AtomicBool) -> Result<SessionReport> {
        self.sessions += 1;
        let mode = self.engine.mode();
        let span = span_session(self.sessions, mode);
        let _enter = span.enter();

        let mut source = io.open_source()?;
        if source.channels() != self.options.channels
            || source.sample_rate() != self.options.sample_rate
        {
            return Err(Error::FormatMismatch {
                expected: format!(
                    "{} ch, {} Hz",
                    self.options.channels, self.options.sample_rate
                ),
                actual: format!("{} ch, {} Hz", source.channels(), source.sample_rate()),
            });
        }
        let mut sink = io.open_sink()?;

        tracing::info!(mode = %mode, "session started");
        let metrics = SessionMetrics::new(mode);
        let mut acc = MetricsAccumulator::new();
        let mut dropped = 0u64;

        let outcome = loop {
            if stop.load(Ordering::Acquire) {
                break SessionOutcome::Stopped;
            }

            let frame_span = span_frame(acc.frames() + 1);
            let _f = frame_span.enter();

            match self.process_frame(source.as_mut(), sink.as_mut()) {
                Ok(FrameStep::Done(sample)) => {
                    let n = acc.record(&sample);
                    metrics.record_frame(&sample);
                    self.telemetry.emit(frame_line(n, &sample, mode));
                    if n % self.options.summary_interval == 0 {
                        if let Some(summary) = acc.summary() {
                            for line in summary_lines(&summary) {
                                self.telemetry.emit(line);
                            }
                        }
                    }
                }
                Ok(FrameStep::Exhausted) => break SessionOutcome::Exhausted,
                Err(e) if e.is_transient() => {
                    dropped += 1;
                    metrics.record_drop();
                    tracing::warn!(error = %e, "frame dropped");
                }
                Err(e) => {
                    tracing::error!(error = %e, "session aborted");
                    if let Err(fe) = sink.finish() {
                        tracing::warn!(error = %fe, "sink flush failed");
                    }
                    return Err(e);
                }
            }
        };

        sink.finish()?;
        tracing::info!(?outcome, frames = acc.frames(), dropped, "session finished");
        Ok(SessionReport {
            outcome,
            frames: acc.frames(),
            dropped,
            summary: acc.summary(),
        })
    }

    fn process_frame(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> Result<FrameStep> {
        let samples = self.engine.frame_samples();
        let channels = self.options.channels as usize;
        let logging = self.options.audio_logging;

        // The remote core may still own the region after a timed-out reply.
        // Keep playback time moving by consuming the frame elsewhere.
        if let Err(e) = self.engine.settle() {
            let mut skipped = vec![0i16; samples];
            if source.read_frame(&mut skipped)? < samples {
                return Ok(FrameStep::Exhausted);
            }
            return Err(e);
        }

        let read = {
            let mut frame = self.audio.samples_mut(samples)?;
            let read = source.read_frame(&mut frame)?;
            if read == samples && logging {
                for ch in 0..channels {
                    self.telemetry.emit(waveform_line("IWAVE", ch, &frame, channels));
                }
            }
            read
        };
        if read < samples {
            return Ok(FrameStep::Exhausted);
        }

        let started = Instant::now();
        self.engine.process(&mut self.audio, &self.params)?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let amplitude = {
            let frame = self.audio.samples_mut(samples)?;
            if logging {
                for ch in 0..channels {
                    self.telemetry.emit(waveform_line("WAVE", ch, &frame, channels));
                }
            }
            mean_amplitude(&frame)
        };

        let cpu_load = self.cpu.sample();
        let dsp_load = match self.engine.mode() {
            ProcessingMode::Remote => self.params.dsp_load()? as f64,
            ProcessingMode::Host => 0.0,
        };

        {
            let frame = self.audio.samples_mut(samples)?;
            sink.write_frame(&frame)?;
        }

        Ok(FrameStep::Done(FrameSample {
            latency_ms,
            amplitude,
            cpu_load,
            dsp_load,
        }))
    }
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("engine", &self.engine)
            .field("audio", &self.audio)
            .field("options", &self.options)
            .field("sessions", &self.sessions)
            .finish()
    }
}
