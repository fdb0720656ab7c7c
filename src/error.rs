//! Error types for the offload daemon.

use thiserror::Error;

/// Result type alias using the crate's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// How a fault affects the running system.
///
/// The frame pipeline uses this to decide whether to abandon the current
/// frame and keep going, or to end the session. Teardown failures never
/// surface as errors; they are logged where they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Device/file open failures, format mismatches, allocation failures.
    /// Fatal to the session.
    Setup,
    /// Short channel I/O, co-processor errors, timeouts. The current frame
    /// is dropped and the loop continues.
    Frame,
}

/// Main error type for offload operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Shared region allocation failed at one of its setup steps.
    #[error("shared buffer allocation failed: {0}")]
    AllocationFailed(String),

    /// The co-processor returned a device address it cannot reference.
    #[error("device address {0:#x} does not fit in 32 bits")]
    AddressOutOfRange(u64),

    /// A cache synchronization directive was rejected.
    #[error("dma-buf sync failed: {0}")]
    SyncFailed(String),

    /// The rpmsg endpoint could not be created or opened.
    #[error("co-processor channel open failed: {0}")]
    ChannelOpen(String),

    /// Fewer bytes than the full message were written.
    #[error("short write to co-processor channel: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes that should have been written.
        expected: usize,
    },

    /// Read or write on an open channel failed.
    #[error("co-processor channel I/O failed: {0}")]
    ChannelIo(#[source] std::io::Error),

    /// The co-processor did not answer before the deadline.
    #[error("co-processor did not respond within {0:?}")]
    ChannelTimeout(std::time::Duration),

    /// The host spectral kernel rejected a frame.
    #[error("frame processing failed: {0}")]
    Processing(String),

    /// The audio source could not be opened or read.
    #[error("audio source error: {0}")]
    Source(String),

    /// The audio sink could not be opened or written.
    #[error("audio sink error: {0}")]
    Sink(String),

    /// Source format does not match the configured format.
    #[error("audio format mismatch: expected {expected}, got {actual}")]
    FormatMismatch {
        /// Configured format.
        expected: String,
        /// Format reported by the source.
        actual: String,
    },

    /// Parameter schema disagrees with the one compiled into the remote image.
    #[error("parameter schema mismatch: host uses {host}, remote image expects {remote}")]
    SchemaMismatch {
        /// Schema selected on the host.
        host: &'static str,
        /// Schema of the remote firmware image.
        remote: &'static str,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The frame pipeline thread panicked; its resources are gone.
    #[error("session thread panicked")]
    SessionPanicked,

    /// Remote processor firmware/state handling failed.
    #[error("firmware error: {0}")]
    Firmware(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Classify this error by its effect on the pipeline.
    pub fn fault_class(&self) -> FaultClass {
        match self {
            Error::ShortWrite { .. }
            | Error::ChannelIo(_)
            | Error::ChannelTimeout(_)
            | Error::SyncFailed(_)
            | Error::Processing(_) => FaultClass::Frame,
            _ => FaultClass::Setup,
        }
    }

    /// Whether the pipeline may drop the frame and continue.
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.fault_class() == FaultClass::Frame
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Error::Source(err.to_string())
    }
}
