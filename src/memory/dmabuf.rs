//! DMA-BUF heap allocations attached to a remote processor.
//!
//! The kernel side of a shared region:
//!
//! 1. `/dev/dma_heap/<name>` hands out physically contiguous dma-bufs
//!    (`DMA_HEAP_IOCTL_ALLOC`).
//! 2. The remoteproc character device maps a dma-buf into the remote core's
//!    address space and reports the device address
//!    (`RPROC_IOC_DMA_BUF_ATTACH`).
//! 3. `DMA_BUF_IOCTL_SYNC` brackets CPU access for cache maintenance.
//!
//! The uapi structures are not exposed by `libc`, so they are declared here
//! and issued with raw ioctls.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use rustix::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use super::{DmaBackend, SyncPhase};
use crate::error::{Error, Result};

/// Directory holding dma-heap devices.
const DMA_HEAP_DIR: &str = "/dev/dma_heap";

/// DMA_HEAP_IOCTL_ALLOC: _IOWR('H', 0x0, struct dma_heap_allocation_data)
const DMA_HEAP_IOCTL_ALLOC: libc::c_ulong = 0xc018_4800;

/// DMA_BUF_IOCTL_SYNC: _IOW('b', 0, struct dma_buf_sync)
const DMA_BUF_IOCTL_SYNC: libc::c_ulong = 0x4008_6200;

/// RPROC_IOC_DMA_BUF_ATTACH: _IOWR(0xB7, 2, struct rproc_dma_buf_attach_data)
const RPROC_IOC_DMA_BUF_ATTACH: libc::c_ulong = 0xc010_b702;

const DMA_BUF_SYNC_READ: u64 = 1 << 0;
const DMA_BUF_SYNC_WRITE: u64 = 2 << 0;
const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
const DMA_BUF_SYNC_START: u64 = 0 << 2;
const DMA_BUF_SYNC_END: u64 = 1 << 2;

/// struct dma_heap_allocation_data
#[repr(C)]
#[derive(Default)]
struct DmaHeapAllocationData {
    /// Requested size in bytes.
    len: u64,
    /// OUTPUT: dma-buf file descriptor.
    fd: u32,
    /// Flags for the returned fd (O_CLOEXEC, O_RDWR).
    fd_flags: u32,
    /// Heap specific flags (none defined).
    heap_flags: u64,
}

/// struct dma_buf_sync
#[repr(C)]
struct DmaBufSync {
    flags: u64,
}

/// struct rproc_dma_buf_attach_data
#[repr(C)]
#[derive(Default)]
struct RprocDmaBufAttachData {
    /// dma-buf fd to attach.
    fd: u32,
    /// OUTPUT: device address as seen by the remote core.
    da: u64,
}

/// Backend for real dma-heap buffers shared with a remoteproc-managed core.
#[derive(Debug, Clone)]
pub struct DmaHeapBackend {
    heap_dir: PathBuf,
}

impl DmaHeapBackend {
    /// Backend using the standard `/dev/dma_heap` directory.
    pub fn new() -> Self {
        Self {
            heap_dir: PathBuf::from(DMA_HEAP_DIR),
        }
    }

    /// Backend using a custom heap directory.
    pub fn with_heap_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            heap_dir: dir.into(),
        }
    }

    fn heap_path(&self, heap_name: &str) -> PathBuf {
        self.heap_dir.join(heap_name)
    }
}

impl Default for DmaHeapBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaBackend for DmaHeapBackend {
    fn allocate(&self, heap_name: &str, len: usize) -> Result<OwnedFd> {
        let path = self.heap_path(heap_name);
        let heap: OwnedFd = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                Error::AllocationFailed(format!("failed to open {}: {}", path.display(), e))
            })?
            .into();

        let mut data = DmaHeapAllocationData {
            len: len as u64,
            fd_flags: (libc::O_CLOEXEC | libc::O_RDWR) as u32,
            ..Default::default()
        };

        // SAFETY: the heap fd is open and `data` matches the uapi layout of
        // struct dma_heap_allocation_data.
        let ret = unsafe { libc::ioctl(heap.as_raw_fd(), DMA_HEAP_IOCTL_ALLOC as _, &mut data) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return Err(Error::AllocationFailed(format!(
                "DMA_HEAP_IOCTL_ALLOC of {} bytes from {} failed: {}",
                len, heap_name, err
            )));
        }

        // SAFETY: on success the kernel returns a fresh dma-buf fd we now own.
        Ok(unsafe { OwnedFd::from_raw_fd(data.fd as i32) })
    }

    fn open_device(&self, path: &Path) -> Result<OwnedFd> {
        let file = OpenOptions::new().read(true).open(path).map_err(|e| {
            Error::AllocationFailed(format!("failed to open {}: {}", path.display(), e))
        })?;
        Ok(file.into())
    }

    fn attach(&self, device: BorrowedFd<'_>, buffer: BorrowedFd<'_>) -> Result<u64> {
        let mut data = RprocDmaBufAttachData {
            fd: buffer.as_raw_fd() as u32,
            ..Default::default()
        };

        // SAFETY: both fds are open for the duration of the call and `data`
        // matches struct rproc_dma_buf_attach_data.
        let ret =
            unsafe { libc::ioctl(device.as_raw_fd(), RPROC_IOC_DMA_BUF_ATTACH as _, &mut data) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return Err(Error::AllocationFailed(format!(
                "RPROC_IOC_DMA_BUF_ATTACH failed: {}",
                err
            )));
        }
        Ok(data.da)
    }

    fn sync(&self, buffer: BorrowedFd<'_>, phase: SyncPhase) -> Result<()> {
        let flags = match phase {
            SyncPhase::Start => DMA_BUF_SYNC_START | DMA_BUF_SYNC_RW,
            SyncPhase::End => DMA_BUF_SYNC_END | DMA_BUF_SYNC_RW,
        };
        let mut sync = DmaBufSync { flags };

        loop {
            // SAFETY: the buffer fd is a dma-buf and `sync` matches struct dma_buf_sync.
            let ret = unsafe { libc::ioctl(buffer.as_raw_fd(), DMA_BUF_IOCTL_SYNC as _, &mut sync) };
            if ret == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                _ => {
                    return Err(Error::SyncFailed(format!(
                        "DMA_BUF_IOCTL_SYNC {:?} failed: {}",
                        phase, err
                    )));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "dma-heap"
    }
}
