//! Memory shared with the remote processor.
//!
//! The audio frame and the filter parameters live in physically contiguous
//! buffers that both the host CPU and the DSP address directly. The DSP sits
//! behind non-coherent caches, so every CPU access has to be bracketed by a
//! dma-buf sync start/end pair.
//!
//! # Architecture
//!
//! - [`DmaBackend`]: the kernel steps behind an allocation (heap allocation,
//!   remoteproc attach, cache sync). [`DmaHeapBackend`] drives the real
//!   devices; [`MemfdBackend`] stands in on hosts without a DSP.
//! - [`ShmRegion`]: one mapped allocation plus its 32-bit device address.
//! - [`SyncGuard`] / [`SampleGuard`]: the only way to touch region memory.
//!   Creating a guard issues sync start, dropping it issues sync end.
//!
//! # Example
//!
//! ```rust,ignore
//! use dsp_offload::memory::{BackendKind, ShmRegion};
//!
//! let backend = BackendKind::DmaHeap.backend();
//! let mut audio = ShmRegion::allocate(backend, "linux,cma", 4096, "/dev/remoteproc0".as_ref())?;
//! {
//!     let mut samples = audio.samples_mut(256)?;
//!     samples.fill(0);
//! } // sync end issued here
//! println!("DSP sees the buffer at {:#x}", audio.device_addr());
//! ```

mod backend;
mod dmabuf;
mod memfd;
mod region;
mod sync;

pub use backend::{BackendKind, DmaBackend, SyncPhase};
pub use dmabuf::DmaHeapBackend;
pub use memfd::MemfdBackend;
pub use region::ShmRegion;
pub use sync::{SampleGuard, SyncCounts, SyncGuard};
