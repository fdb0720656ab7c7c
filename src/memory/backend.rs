//! Kernel operations behind a shared region.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use rustix::fd::{BorrowedFd, OwnedFd};

use super::{DmaHeapBackend, MemfdBackend};
use crate::error::{Error, Result};

/// Which half of a synchronization bracket is being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// CPU access begins: caches are invalidated so device writes are visible.
    Start,
    /// CPU access ends: dirty lines are flushed so the device sees CPU writes.
    End,
}

/// The system calls that produce and maintain a shared region.
///
/// [`ShmRegion::allocate`](super::ShmRegion::allocate) calls these in a
/// fixed order and owns every descriptor they return, so an implementation
/// never needs to clean up after a later step fails.
pub trait DmaBackend: Send + Sync + fmt::Debug {
    /// Allocate `len` bytes from the named heap and return the buffer fd.
    fn allocate(&self, heap_name: &str, len: usize) -> Result<OwnedFd>;

    /// Open the remote processor device used for attaching buffers.
    fn open_device(&self, path: &Path) -> Result<OwnedFd>;

    /// Attach a buffer to the remote processor and return its device address.
    fn attach(&self, device: BorrowedFd<'_>, buffer: BorrowedFd<'_>) -> Result<u64>;

    /// Issue a read/write cache synchronization directive on a buffer.
    fn sync(&self, buffer: BorrowedFd<'_>, phase: SyncPhase) -> Result<()>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Selects a [`DmaBackend`] from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// `/dev/dma_heap/*` allocations attached through the remoteproc cdev.
    DmaHeap,
    /// Anonymous memfd memory with synthetic device addresses.
    Memfd,
}

impl BackendKind {
    /// Instantiate the backend.
    pub fn backend(self) -> Arc<dyn DmaBackend> {
        match self {
            BackendKind::DmaHeap => Arc::new(DmaHeapBackend::new()),
            BackendKind::Memfd => Arc::new(MemfdBackend::new()),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dma-heap" | "dmaheap" | "dma_heap" => Ok(BackendKind::DmaHeap),
            "memfd" => Ok(BackendKind::Memfd),
            other => Err(Error::Config(format!("unknown SHM_BACKEND '{}'", other))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::DmaHeap => f.write_str("dma-heap"),
            BackendKind::Memfd => f.write_str("memfd"),
        }
    }
}
