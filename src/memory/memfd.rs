//! memfd-backed stand-in for dma-heap buffers.
//!
//! Used when frames are processed on the host only (no remote core present)
//! and by tests. Device addresses are synthesized from a configurable base so
//! the 32-bit reachability check runs exactly as it does on hardware.

use std::ffi::CString;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rustix::fd::{BorrowedFd, OwnedFd};
use rustix::fs::MemfdFlags;

use super::{DmaBackend, SyncPhase};
use crate::error::{Error, Result};

/// Base of the synthetic device address window.
const DEFAULT_BASE: u64 = 0xa000_0000;

/// Synthetic addresses are handed out on this alignment.
const ADDR_ALIGN: u64 = 0x1000;

/// Backend using anonymous shared memory.
#[derive(Debug)]
pub struct MemfdBackend {
    next_addr: AtomicU64,
    syncs: AtomicU64,
}

impl MemfdBackend {
    /// Backend with addresses starting in the low 32-bit window.
    pub fn new() -> Self {
        Self::with_base_address(DEFAULT_BASE)
    }

    /// Backend whose first attached buffer reports `base` as device address.
    ///
    /// A base above `u32::MAX` models a buffer the remote core cannot reach.
    pub fn with_base_address(base: u64) -> Self {
        Self {
            next_addr: AtomicU64::new(base),
            syncs: AtomicU64::new(0),
        }
    }

    /// Number of sync directives issued through this backend.
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }
}

impl Default for MemfdBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn memfd(name: &str, len: u64) -> Result<OwnedFd> {
    let cname = CString::new(name).map_err(|e| Error::AllocationFailed(e.to_string()))?;
    let fd = rustix::fs::memfd_create(&cname, MemfdFlags::CLOEXEC)?;
    rustix::fs::ftruncate(&fd, len)?;
    Ok(fd)
}

impl DmaBackend for MemfdBackend {
    fn allocate(&self, heap_name: &str, len: usize) -> Result<OwnedFd> {
        if len == 0 {
            return Err(Error::AllocationFailed("size must be greater than 0".into()));
        }
        memfd(&format!("shm:{}", heap_name), len as u64)
    }

    fn open_device(&self, path: &Path) -> Result<OwnedFd> {
        memfd(&format!("rproc:{}", path.display()), 0)
    }

    fn attach(&self, _device: BorrowedFd<'_>, buffer: BorrowedFd<'_>) -> Result<u64> {
        let len = rustix::fs::fstat(buffer)?.st_size as u64;
        let span = len.div_ceil(ADDR_ALIGN).max(1) * ADDR_ALIGN;
        Ok(self.next_addr.fetch_add(span, Ordering::Relaxed))
    }

    fn sync(&self, _buffer: BorrowedFd<'_>, _phase: SyncPhase) -> Result<()> {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memfd"
    }
}
