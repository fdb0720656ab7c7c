//! Runtime configuration.
//!
//! The daemon reads a flat `KEY=VALUE` text file (default
//! `/etc/dsp_offload.cfg`). Every key has a built-in default; a missing file,
//! a malformed value, or an unknown key leaves the defaults in place and is
//! only reported through the log.
//!
//! ```text
//! # execution on the C7x DSP
//! DSP_EXEC_MODE=1
//! FILTER_VARIANT=highpass
//! FFT_INDEX=12
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::dsp::{FilterVariant, ProcessingMode};
use crate::error::{Error, Result};
use crate::memory::BackendKind;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dsp_offload.cfg";

/// Fully resolved daemon configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// ALSA playback device.
    pub pcm_device: String,
    /// Write processed audio to this WAV file instead of ALSA.
    pub output_file: Option<PathBuf>,
    /// UART used for commands and telemetry.
    pub uart_device: PathBuf,
    /// remoteproc character device used for dma-buf attach.
    pub rproc_device: PathBuf,
    /// dma-heap name under `/dev/dma_heap/`.
    pub dma_heap: String,
    /// Shared region backend.
    pub shm_backend: BackendKind,
    /// Input WAV file.
    pub input_file: PathBuf,

    /// Remote processor id.
    pub proc_id: u32,
    /// Remote rpmsg endpoint address.
    pub remote_endpoint: u32,
    /// rpmsg control device used to create the local endpoint.
    pub rpmsg_ctrl_device: PathBuf,
    /// Deadline for a co-processor reply.
    pub rpmsg_timeout: Duration,
    /// Audio region size in bytes.
    pub data_size: usize,
    /// Parameter region size in bytes.
    pub param_size: usize,
    /// Where frames are processed.
    pub mode: ProcessingMode,
    /// Remote graph/session id.
    pub graph_id: i32,
    /// Filter algorithm and parameter schema used on the host.
    pub filter_variant: FilterVariant,
    /// Parameter schema compiled into the remote firmware image.
    pub firmware_schema: FilterVariant,

    /// Channels per frame.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per channel in one frame.
    pub frame_samples: usize,

    /// Initial bass gain.
    pub gain_bass: f32,
    /// Initial mid gain.
    pub gain_mid: f32,
    /// Initial treble gain.
    pub gain_treble: f32,
    /// Initial high-pass cutoff bin.
    pub fft_index: i32,
    /// Initial high-pass enable.
    pub fft_filter_enabled: bool,

    /// Use TCP ports instead of the UART for commands/telemetry.
    pub host_eth_iface: bool,
    /// TCP port streaming telemetry lines.
    pub log_port: u16,
    /// TCP port accepting commands.
    pub cmd_port: u16,
    /// Emit waveform telemetry lines.
    pub audio_logging: bool,
    /// Emit a summary every N frames.
    pub summary_interval: u64,
    /// Start a new session after the source is exhausted.
    pub loop_playback: bool,

    /// Firmware symlink the remoteproc driver loads.
    pub fw_link_path: PathBuf,
    /// Previous firmware image.
    pub fw_old_path: Option<PathBuf>,
    /// Firmware image carrying the offload graph.
    pub fw_new_path: Option<PathBuf>,
    /// remoteproc state file.
    pub fw_state_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pcm_device: "default".to_string(),
            output_file: None,
            uart_device: PathBuf::from("/dev/ttyS2"),
            rproc_device: PathBuf::from("/dev/remoteproc0"),
            dma_heap: "linux,cma".to_string(),
            shm_backend: BackendKind::DmaHeap,
            input_file: PathBuf::from("/opt/sample.wav"),
            proc_id: 8,
            remote_endpoint: 14,
            rpmsg_ctrl_device: PathBuf::from("/dev/rpmsg_ctrl0"),
            rpmsg_timeout: Duration::from_millis(1000),
            data_size: 4096,
            param_size: 4096,
            mode: ProcessingMode::Host,
            graph_id: 10,
            filter_variant: FilterVariant::ThreeBandEq,
            firmware_schema: FilterVariant::ThreeBandEq,
            channels: 1,
            sample_rate: 48_000,
            frame_samples: 256,
            gain_bass: 1.0,
            gain_mid: 1.0,
            gain_treble: 1.0,
            fft_index: 0,
            fft_filter_enabled: true,
            host_eth_iface: false,
            log_port: 8888,
            cmd_port: 8889,
            audio_logging: false,
            summary_interval: 10,
            loop_playback: true,
            fw_link_path: PathBuf::from("/lib/firmware/j784s4-c71_0-fw"),
            fw_old_path: None,
            fw_new_path: None,
            fw_state_path: PathBuf::from("/sys/class/remoteproc/remoteproc0/state"),
        }
    }
}

impl Config {
    /// Load configuration from a file, falling back to defaults.
    ///
    /// A missing or unreadable file is not an error: the defaults are used
    /// and a warning is logged.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config file unavailable, using defaults");
                Self::default()
            }
        }
    }

    /// Parse configuration text on top of the defaults.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        let mut schema_set = false;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!(line = lineno + 1, "ignoring config line without '='");
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if key == "DSP_FW_SCHEMA" {
                schema_set = true;
            }
            config.apply(key, value, lineno + 1);
        }

        if !schema_set {
            config.firmware_schema = config.filter_variant;
        }
        config
    }

    fn apply(&mut self, key: &str, value: &str, line: usize) {
        match key {
            "PCM_DEVICE" => self.pcm_device = value.to_string(),
            "OUTPUT_FILE" => self.output_file = non_empty_path(value),
            "UART_DEVICE" => self.uart_device = PathBuf::from(value),
            "RPROC_DEV_NAME" => self.rproc_device = PathBuf::from(value),
            "DMA_HEAP_RESERVED" => self.dma_heap = value.to_string(),
            "SHM_BACKEND" => set_parsed(&mut self.shm_backend, key, value, line),
            "SAMPLE_AUDIO_FILE" => self.input_file = PathBuf::from(value),
            "C7_PROC_ID" => set_parsed(&mut self.proc_id, key, value, line),
            "REMOTE_ENDPT" => set_parsed(&mut self.remote_endpoint, key, value, line),
            "RPMSG_CTRL_DEV" => self.rpmsg_ctrl_device = PathBuf::from(value),
            "RPMSG_TIMEOUT_MS" => {
                let mut ms = self.rpmsg_timeout.as_millis() as u64;
                set_parsed(&mut ms, key, value, line);
                self.rpmsg_timeout = Duration::from_millis(ms);
            }
            "DATA_SIZE" => set_parsed(&mut self.data_size, key, value, line),
            "PARAM_SIZE" => set_parsed(&mut self.param_size, key, value, line),
            "DSP_EXEC_MODE" => set_parsed(&mut self.mode, key, value, line),
            "DSP_GRAPH_ID" => set_parsed(&mut self.graph_id, key, value, line),
            "FILTER_VARIANT" => set_parsed(&mut self.filter_variant, key, value, line),
            "DSP_FW_SCHEMA" => set_parsed(&mut self.firmware_schema, key, value, line),
            "CHANNELS" => set_parsed(&mut self.channels, key, value, line),
            "SAMPLE_RATE" => set_parsed(&mut self.sample_rate, key, value, line),
            "FRAME_SAMPLES" => set_parsed(&mut self.frame_samples, key, value, line),
            "GAIN_BASS" => set_parsed(&mut self.gain_bass, key, value, line),
            "GAIN_MID" => set_parsed(&mut self.gain_mid, key, value, line),
            "GAIN_TREBLE" => set_parsed(&mut self.gain_treble, key, value, line),
            "FFT_INDEX" => set_parsed(&mut self.fft_index, key, value, line),
            "FFT_FILTER_ENABLE" => set_flag(&mut self.fft_filter_enabled, key, value, line),
            "IS_HOST_ETH_IFACE" => set_flag(&mut self.host_eth_iface, key, value, line),
            "LOG_PORT" => set_parsed(&mut self.log_port, key, value, line),
            "CMD_PORT" => set_parsed(&mut self.cmd_port, key, value, line),
            "ENABLE_AUDIO_LOGGING" => set_flag(&mut self.audio_logging, key, value, line),
            "SUMMARY_INTERVAL" => set_parsed(&mut self.summary_interval, key, value, line),
            "LOOP_PLAYBACK" => set_flag(&mut self.loop_playback, key, value, line),
            "FW_LINK_PATH" => self.fw_link_path = PathBuf::from(value),
            "C7_OLD_FW_PATH" => self.fw_old_path = non_empty_path(value),
            "C7_NEW_FW_PATH" => self.fw_new_path = non_empty_path(value),
            "C7_STATE_PATH" => self.fw_state_path = PathBuf::from(value),
            _ => tracing::debug!(key, line, "ignoring unknown config key"),
        }
    }

    /// Bytes occupied by one interleaved frame, or `None` on overflow.
    #[inline]
    pub fn frame_bytes(&self) -> Option<usize> {
        self.frame_samples
            .checked_mul(self.channels as usize)?
            .checked_mul(std::mem::size_of::<i16>())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.sample_rate == 0 || self.frame_samples == 0 {
            return Err(Error::Config(
                "CHANNELS, SAMPLE_RATE and FRAME_SAMPLES must be non-zero".into(),
            ));
        }
        // region sizes travel as i32 in every request
        for (key, size) in [("DATA_SIZE", self.data_size), ("PARAM_SIZE", self.param_size)] {
            if i32::try_from(size).is_err() {
                return Err(Error::Config(format!(
                    "{}={} exceeds the largest region a request can describe ({})",
                    key,
                    size,
                    i32::MAX
                )));
            }
        }
        let frame_bytes = self.frame_bytes().ok_or_else(|| {
            Error::Config(format!(
                "FRAME_SAMPLES={} with CHANNELS={} overflows the frame size",
                self.frame_samples, self.channels
            ))
        })?;
        if frame_bytes > self.data_size {
            return Err(Error::Config(format!(
                "frame of {} bytes does not fit in DATA_SIZE={}",
                frame_bytes, self.data_size
            )));
        }
        let schema = self.filter_variant.schema_size();
        if schema > self.param_size {
            return Err(Error::Config(format!(
                "{} parameter record ({} bytes) does not fit in PARAM_SIZE={}",
                self.filter_variant, schema, self.param_size
            )));
        }
        if self.summary_interval == 0 {
            return Err(Error::Config("SUMMARY_INTERVAL must be non-zero".into()));
        }
        Ok(())
    }
}

fn set_parsed<T: FromStr>(slot: &mut T, key: &str, value: &str, line: usize) {
    match value.parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value, line, "malformed config value, keeping default"),
    }
}

fn set_flag(slot: &mut bool, key: &str, value: &str, line: usize) {
    match value {
        "1" | "true" | "yes" | "on" => *slot = true,
        "0" | "false" | "no" | "off" => *slot = false,
        _ => tracing::warn!(key, value, line, "malformed boolean, keeping default"),
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
