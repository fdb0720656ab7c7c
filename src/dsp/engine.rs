//! Per-frame dispatch between the host kernel and the remote core.

use std::fmt;
use std::str::FromStr;

use super::{FilterVariant, ParameterControl, SpectralProcessor};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ipc::{CoprocChannel, DEFAULT_REPLY_LEN, IpcRequest, Transport};
use crate::memory::ShmRegion;

/// Where frames are processed. Fixed for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingMode {
    /// Spectral filter on the host CPU.
    Host,
    /// Request/response round trip to the remote DSP.
    Remote,
}

impl ProcessingMode {
    /// Label used in telemetry lines.
    pub const fn label(self) -> &'static str {
        match self {
            ProcessingMode::Host => "CPU",
            ProcessingMode::Remote => "DSP",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ProcessingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "host" | "cpu" | "arm" => Ok(ProcessingMode::Host),
            "1" | "remote" | "dsp" => Ok(ProcessingMode::Remote),
            other => Err(Error::Config(format!("unknown execution mode '{}'", other))),
        }
    }
}

/// Channel type used by the engine in remote mode.
pub type RemoteChannel = CoprocChannel<Box<dyn Transport>>;

enum Kernel {
    Host(SpectralProcessor),
    Remote {
        channel: RemoteChannel,
        request: IpcRequest,
    },
}

/// Transforms one frame per call, locally or on the remote core.
pub struct SignalEngine {
    variant: FilterVariant,
    samples: usize,
    kernel: Kernel,
}

impl SignalEngine {
    /// Engine running the spectral kernel on the host.
    pub fn host(config: &Config) -> Self {
        Self {
            variant: config.filter_variant,
            samples: config.frame_samples * config.channels as usize,
            kernel: Kernel::Host(SpectralProcessor::new(
                config.frame_samples,
                config.channels as usize,
                config.sample_rate,
            )),
        }
    }

    /// Engine handing frames to the remote core.
    ///
    /// Refuses to start when the host parameter schema differs from the one
    /// compiled into the remote image.
    pub fn remote(config: &Config, channel: RemoteChannel, request: IpcRequest) -> Result<Self> {
        check_schema(config.filter_variant, config.firmware_schema)?;
        Ok(Self {
            variant: config.filter_variant,
            samples: config.frame_samples * config.channels as usize,
            kernel: Kernel::Remote { channel, request },
        })
    }

    /// Active mode.
    pub fn mode(&self) -> ProcessingMode {
        match self.kernel {
            Kernel::Host(_) => ProcessingMode::Host,
            Kernel::Remote { .. } => ProcessingMode::Remote,
        }
    }

    /// Interleaved samples in one frame.
    pub fn frame_samples(&self) -> usize {
        self.samples
    }

    /// Wait until the remote core is done with the audio region.
    ///
    /// Only does work after a reply timed out. Must succeed before the next
    /// frame is written into the region.
    pub fn settle(&mut self) -> Result<()> {
        match &mut self.kernel {
            Kernel::Host(_) => Ok(()),
            Kernel::Remote { channel, .. } => channel.settle(),
        }
    }

    /// Process the frame currently held in `audio`.
    ///
    /// In remote mode no samples cross the channel: the request names the
    /// regions and the remote core works on them in place. Any error leaves
    /// the frame abandoned; the caller decides whether to continue.
    pub fn process(&mut self, audio: &mut ShmRegion, params: &ParameterControl) -> Result<()> {
        match &mut self.kernel {
            Kernel::Host(kernel) => {
                let settings = params.snapshot()?;
                let mut frame = audio.samples_mut(self.samples)?;
                kernel.process(&mut frame, self.variant, &settings)
            }
            Kernel::Remote { channel, request } => {
                channel.send(request, audio)?;
                let reply = channel.receive(DEFAULT_REPLY_LEN, audio)?;
                tracing::trace!(reply_len = reply.len(), "remote frame complete");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for SignalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalEngine")
            .field("mode", &self.mode())
            .field("variant", &self.variant)
            .field("samples", &self.samples)
            .finish()
    }
}

/// Host and remote parameter schemas must match.
pub fn check_schema(host: FilterVariant, remote: FilterVariant) -> Result<()> {
    if host != remote {
        tracing::error!(host = %host, remote = %remote, "parameter schema mismatch");
        return Err(Error::SchemaMismatch {
            host: host.schema_name(),
            remote: remote.schema_name(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemfdBackend;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    struct Echo {
        last: Vec<u8>,
    }

    impl Transport for Echo {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.last = buf.to_vec();
            Ok(buf.len())
        }

        fn read(&mut self, buf: &mut [u8], _: Option<Duration>) -> std::io::Result<Option<usize>> {
            let n = self.last.len().min(buf.len());
            buf[..n].copy_from_slice(&self.last[..n]);
            Ok(Some(n))
        }
    }

    fn audio() -> ShmRegion {
        ShmRegion::allocate(
            Arc::new(MemfdBackend::new()),
            "audio",
            4096,
            Path::new("/dev/remoteproc0"),
        )
        .unwrap()
    }

    #[test]
    fn test_mode_parse_and_label() {
        assert_eq!("0".parse::<ProcessingMode>().unwrap(), ProcessingMode::Host);
        assert_eq!("1".parse::<ProcessingMode>().unwrap(), ProcessingMode::Remote);
        assert!("2".parse::<ProcessingMode>().is_err());
        assert_eq!(ProcessingMode::Remote.to_string(), "DSP");
    }

    #[test]
    fn test_schema_mismatch_refuses_remote() {
        let config = Config {
            mode: ProcessingMode::Remote,
            filter_variant: FilterVariant::ThreeBandEq,
            firmware_schema: FilterVariant::HighPassCutoff,
            ..Config::default()
        };
        let channel: RemoteChannel = CoprocChannel::new(Box::new(Echo { last: vec![] }), None);
        let request = IpcRequest {
            data_addr: 0,
            params_addr: 0,
            data_size: 0,
            params_size: 0,
            graph_id: 10,
        };
        let err = SignalEngine::remote(&config, channel, request).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[test]
    fn test_host_engine_keeps_frame_with_unity_gains() {
        let config = Config::default();
        let mut engine = SignalEngine::host(&config);
        let params = ParameterControl::host(&config);
        let mut region = audio();
        {
            let mut frame = region.samples_mut(engine.frame_samples()).unwrap();
            for (i, s) in frame.iter_mut().enumerate() {
                *s = (i as i16) * 50 - 6000;
            }
        }
        engine.process(&mut region, &params).unwrap();
        let frame = region.samples_mut(engine.frame_samples()).unwrap();
        for (i, s) in frame.iter().enumerate() {
            assert!((*s as i32 - (i as i32 * 50 - 6000)).abs() <= 1);
        }
    }

    #[test]
    fn test_remote_engine_round_trip() {
        let config = Config {
            mode: ProcessingMode::Remote,
            ..Config::default()
        };
        let mut region = audio();
        let request = IpcRequest {
            data_addr: region.device_addr(),
            params_addr: 0xa000_1000,
            data_size: 4096,
            params_size: 4096,
            graph_id: config.graph_id,
        };
        let channel: RemoteChannel = CoprocChannel::new(Box::new(Echo { last: vec![] }), None);
        let mut engine = SignalEngine::remote(&config, channel, request).unwrap();
        let params = ParameterControl::host(&config);

        engine.process(&mut region, &params).unwrap();
        assert_eq!(engine.mode(), ProcessingMode::Remote);
        let counts = region.sync_counts();
        assert_eq!(counts.starts, 2);
        assert!(counts.is_balanced());
    }
}
