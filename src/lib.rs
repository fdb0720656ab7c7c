//! # dsp-offload
//!
//! Real-time audio filtering on an embedded Linux host, with the spectral
//! filter running either on the host CPU or on a DSP co-processor.
//!
//! Audio frames live in a dma-buf shared region the co-processor can address
//! directly. In remote mode the host sends a fixed 20-byte request over an
//! rpmsg character device naming the audio and parameter regions; the DSP
//! filters the frame in place and replies. In host mode the same filter
//! runs locally on top of `realfft`.
//!
//! ## Features
//!
//! - **Shared regions**: dma-heap allocation, remoteproc attach and
//!   bracketed cache synchronization ([`memory`])
//! - **Co-processor channel**: rpmsg endpoints with a receive deadline
//!   ([`ipc`])
//! - **Filters**: three-band EQ and high-pass cutoff, selected at runtime
//!   ([`dsp`])
//! - **Sessions**: WAV in, ALSA or WAV out, one session thread at a time
//!   ([`pipeline`])
//! - **Control**: text commands over UART or TCP, telemetry lines back
//!   ([`host`], [`observability`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::atomic::AtomicBool;
//! use dsp_offload::prelude::*;
//!
//! let config = Config::load("/etc/dsp_offload.cfg");
//! let daemon = Daemon::build(config)?;
//! daemon.run(&AtomicBool::new(false))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod app;
pub mod config;
pub mod dsp;
pub mod error;
pub mod firmware;
pub mod host;
pub mod ipc;
pub mod memory;
pub mod observability;
pub mod pipeline;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::app::Daemon;
    pub use crate::config::Config;
    pub use crate::dsp::{FilterVariant, ParameterControl, ProcessingMode, SignalEngine};
    pub use crate::error::{Error, Result};
    pub use crate::host::Command;
    pub use crate::ipc::{CoprocChannel, IpcRequest, Transport};
    pub use crate::memory::{BackendKind, ShmRegion};
    pub use crate::pipeline::{FramePipeline, SessionController, SessionIo};
}

pub use error::{Error, Result};
