//! ALSA playback sink.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::FrameSink;
use crate::error::{Error, Result};

/// Requested device buffer, in microseconds.
const BUFFER_TIME_US: u32 = 1_000_000;

fn alsa_error(device: &str, e: alsa::Error) -> Error {
    match e.errno() {
        libc::ENOENT => Error::Sink(format!("ALSA device {} not found", device)),
        libc::EACCES => Error::Sink(format!("permission denied on ALSA device {}", device)),
        libc::EBUSY => Error::Sink(format!("ALSA device {} is busy", device)),
        _ => Error::Sink(format!("ALSA device {}: {}", device, e)),
    }
}

/// Interleaved S16 playback on an ALSA PCM.
pub struct AlsaSink {
    pcm: PCM,
    device: String,
}

impl AlsaSink {
    /// Open and configure `device` for playback.
    pub fn open(device: &str, channels: u16, sample_rate: u32) -> Result<Self> {
        let pcm = PCM::new(device, Direction::Playback, false).map_err(|e| alsa_error(device, e))?;

        {
            let hwp = HwParams::any(&pcm).map_err(|e| alsa_error(device, e))?;
            hwp.set_access(Access::RWInterleaved)
                .map_err(|e| alsa_error(device, e))?;
            hwp.set_format(Format::s16())
                .map_err(|e| alsa_error(device, e))?;
            hwp.set_channels(channels as u32)
                .map_err(|e| alsa_error(device, e))?;
            hwp.set_rate(sample_rate, ValueOr::Nearest)
                .map_err(|e| alsa_error(device, e))?;
            hwp.set_buffer_time_near(BUFFER_TIME_US, ValueOr::Nearest)
                .map_err(|e| alsa_error(device, e))?;
            pcm.hw_params(&hwp).map_err(|e| alsa_error(device, e))?;
        }

        pcm.prepare().map_err(|e| alsa_error(device, e))?;
        tracing::info!(device, channels, sample_rate, "opened ALSA playback");

        Ok(Self {
            pcm,
            device: device.to_string(),
        })
    }
}

impl FrameSink for AlsaSink {
    fn write_frame(&mut self, frame: &[i16]) -> Result<()> {
        let io = self.pcm.io_i16().map_err(|e| alsa_error(&self.device, e))?;
        match io.writei(frame) {
            Ok(_) => Ok(()),
            Err(e) if e.errno() == libc::EPIPE => {
                tracing::debug!(device = %self.device, "playback underrun");
                self.pcm
                    .prepare()
                    .map_err(|e| alsa_error(&self.device, e))?;
                io.writei(frame).map_err(|e| alsa_error(&self.device, e))?;
                Ok(())
            }
            Err(e) => Err(alsa_error(&self.device, e)),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.pcm.drain().map_err(|e| alsa_error(&self.device, e))
    }
}

// SAFETY: the PCM handle is only used from the thread that owns the sink.
unsafe impl Send for AlsaSink {}
