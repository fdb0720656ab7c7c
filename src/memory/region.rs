//! Shared regions visible to both the host and the remote processor.

use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustix::fd::{AsFd, AsRawFd, OwnedFd};
use rustix::mm::{MapFlags, ProtFlags};

use super::sync::{SampleGuard, SyncCounts, SyncGuard};
use super::{DmaBackend, SyncPhase};
use crate::error::{Error, Result};

/// A mapped allocation shared with the remote processor.
///
/// Holds the buffer descriptor, the remoteproc descriptor the attachment was
/// made through, the host mapping and the 32-bit device address the remote
/// core uses. Both descriptors and the mapping are released exactly once, when
/// the region is destroyed or dropped.
///
/// Memory is reachable only through [`SyncGuard`] and [`SampleGuard`], which
/// open a synchronization bracket on creation and close it on drop.
///
/// # Thread Safety
///
/// `ShmRegion` is `Send + Sync`. Shared access (`&self`) only permits
/// word-sized atomic loads and stores through [`SyncGuard`]; slice access
/// through [`SampleGuard`] requires `&mut self`.
pub struct ShmRegion {
    buffer: OwnedFd,
    device: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
    device_addr: u32,
    backend: Arc<dyn DmaBackend>,
    starts: AtomicU64,
    ends: AtomicU64,
}

impl ShmRegion {
    /// Allocate, attach and map a shared region.
    ///
    /// Steps, in order: allocate `size` bytes from `heap_name`, open the
    /// remote processor device at `device_path`, attach the buffer to obtain
    /// its device address, reject addresses beyond 32 bits, map the buffer
    /// read/write. A failure at any step closes whatever was opened before it.
    pub fn allocate(
        backend: Arc<dyn DmaBackend>,
        heap_name: &str,
        size: usize,
        device_path: &Path,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed("size must be greater than 0".into()));
        }

        let buffer = backend.allocate(heap_name, size)?;
        let device = backend.open_device(device_path)?;
        let addr = backend.attach(device.as_fd(), buffer.as_fd())?;
        let device_addr = u32::try_from(addr).map_err(|_| {
            tracing::error!(
                addr = format_args!("{:#x}", addr),
                "buffer lies beyond the remote core's 32-bit address space"
            );
            Error::AddressOutOfRange(addr)
        })?;

        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &buffer,
                0,
            )
            .map_err(|e| Error::AllocationFailed(format!("mmap of shared buffer failed: {}", e)))?
        };

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;

        tracing::info!(
            backend = backend.name(),
            heap = heap_name,
            size,
            device_addr = format_args!("{:#x}", device_addr),
            "allocated shared region"
        );

        Ok(Self {
            buffer,
            device,
            ptr,
            len: size,
            device_addr,
            backend,
            starts: AtomicU64::new(0),
            ends: AtomicU64::new(0),
        })
    }

    /// Unmap the region and close both descriptors.
    ///
    /// Consumes the region, so a second destroy cannot be written. Teardown is
    /// best effort: failures are logged and otherwise ignored.
    pub fn destroy(self) {
        tracing::debug!(
            device_addr = format_args!("{:#x}", self.device_addr),
            "destroying shared region"
        );
        drop(self);
    }

    /// Device address the remote core uses for this region.
    #[inline]
    pub fn device_addr(&self) -> u32 {
        self.device_addr
    }

    /// Size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Regions are never empty; provided for API symmetry with `len`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Begin a CPU access window (invalidate).
    pub fn sync_start(&self) -> Result<()> {
        self.backend.sync(self.buffer.as_fd(), SyncPhase::Start)?;
        self.starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// End a CPU access window (flush).
    pub fn sync_end(&self) -> Result<()> {
        self.backend.sync(self.buffer.as_fd(), SyncPhase::End)?;
        self.ends.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of successfully issued start and end directives.
    pub fn sync_counts(&self) -> SyncCounts {
        SyncCounts {
            starts: self.starts.load(Ordering::Relaxed),
            ends: self.ends.load(Ordering::Relaxed),
        }
    }

    /// Open a bracket for word-sized field access.
    pub fn bracket(&self) -> Result<SyncGuard<'_>> {
        self.sync_start()?;
        Ok(SyncGuard::new(self))
    }

    /// Open a bracket over the first `count` 16-bit samples.
    pub fn samples_mut(&mut self, count: usize) -> Result<SampleGuard<'_>> {
        let capacity = self.len / std::mem::size_of::<i16>();
        if count > capacity {
            return Err(Error::Config(format!(
                "frame of {} samples exceeds region capacity of {}",
                count, capacity
            )));
        }
        self.sync_start()?;
        Ok(SampleGuard::new(self, count))
    }

    #[inline]
    pub(super) fn base_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // Unmap before the fds are closed
        if let Err(e) = unsafe { rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len) } {
            tracing::warn!(error = %e, "munmap of shared region failed");
        }
        let counts = self.sync_counts();
        if !counts.is_balanced() {
            tracing::warn!(
                starts = counts.starts,
                ends = counts.ends,
                "shared region released with unbalanced sync brackets"
            );
        }
        // buffer and device are closed when their OwnedFds drop
    }
}

// SAFETY: the mapping stays valid for the lifetime of the region and the
// fds are plain kernel handles usable from any thread.
unsafe impl Send for ShmRegion {}

// SAFETY: shared references only expose atomic word access (SyncGuard);
// slice access needs &mut self.
unsafe impl Sync for ShmRegion {}

impl std::fmt::Debug for ShmRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("buffer_fd", &self.buffer.as_raw_fd())
            .field("device_fd", &self.device.as_raw_fd())
            .field("len", &self.len)
            .field("device_addr", &format_args!("{:#x}", self.device_addr))
            .field("backend", &self.backend.name())
            .finish()
    }
}
