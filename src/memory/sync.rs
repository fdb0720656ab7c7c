//! Synchronization brackets around shared region access.
//!
//! A bracket is opened by constructing a guard (which issues sync start) and
//! closed when the guard is dropped (sync end). Early returns and unwinding
//! therefore still close the bracket, which keeps start/end counts matched.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use super::ShmRegion;

/// Matched-bracket bookkeeping for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    /// Successful sync start directives.
    pub starts: u64,
    /// Successful sync end directives.
    pub ends: u64,
}

impl SyncCounts {
    /// Every start has a matching end.
    #[inline]
    pub fn is_balanced(&self) -> bool {
        self.starts == self.ends
    }
}

fn close_bracket(region: &ShmRegion) {
    if let Err(e) = region.sync_end() {
        tracing::warn!(error = %e, "failed to close sync bracket");
    }
}

/// Open bracket over a region, for 32-bit field access.
///
/// # Panics
///
/// Field accessors panic on an offset that is not 4-byte aligned or does
/// not leave a full word inside the region. Callers use fixed record
/// offsets checked against the region size up front.
///
/// Fields are read and written with atomic word operations, so a command
/// thread and the frame thread may hold brackets on the same region at the
/// same time. A value written by one may be observed by the other in the same
/// frame or the next one.
pub struct SyncGuard<'a> {
    region: &'a ShmRegion,
}

impl<'a> SyncGuard<'a> {
    pub(super) fn new(region: &'a ShmRegion) -> Self {
        Self { region }
    }

    fn word(&self, offset: usize) -> &AtomicU32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.region.len(),
            "field offset {} outside region of {} bytes",
            offset,
            self.region.len()
        );
        // SAFETY: the mapping is page aligned, the offset is 4-byte aligned
        // and in bounds, and the memory stays mapped while the region lives.
        unsafe { AtomicU32::from_ptr(self.region.base_ptr().add(offset).cast::<u32>()) }
    }

    /// Load a raw 32-bit word.
    #[inline]
    pub fn load_u32(&self, offset: usize) -> u32 {
        self.word(offset).load(Ordering::Acquire)
    }

    /// Store a raw 32-bit word.
    #[inline]
    pub fn store_u32(&self, offset: usize, value: u32) {
        self.word(offset).store(value, Ordering::Release);
    }

    /// Load an `f32` field.
    #[inline]
    pub fn load_f32(&self, offset: usize) -> f32 {
        f32::from_bits(self.load_u32(offset))
    }

    /// Store an `f32` field.
    #[inline]
    pub fn store_f32(&self, offset: usize, value: f32) {
        self.store_u32(offset, value.to_bits());
    }

    /// Load an `i32` field.
    #[inline]
    pub fn load_i32(&self, offset: usize) -> i32 {
        self.load_u32(offset) as i32
    }

    /// Store an `i32` field.
    #[inline]
    pub fn store_i32(&self, offset: usize, value: i32) {
        self.store_u32(offset, value as u32);
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        close_bracket(self.region);
    }
}

/// Open bracket with exclusive access to the leading samples of a region.
///
/// Dereferences to `[i16]` of the requested length.
pub struct SampleGuard<'a> {
    region: &'a mut ShmRegion,
    count: usize,
}

impl<'a> SampleGuard<'a> {
    pub(super) fn new(region: &'a mut ShmRegion, count: usize) -> Self {
        Self { region, count }
    }
}

impl Deref for SampleGuard<'_> {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        // SAFETY: count was checked against the region size, the mapping is
        // page aligned and we hold the region exclusively.
        unsafe { std::slice::from_raw_parts(self.region.base_ptr().cast::<i16>(), self.count) }
    }
}

impl DerefMut for SampleGuard<'_> {
    fn deref_mut(&mut self) -> &mut [i16] {
        // SAFETY: as in deref, plus &mut self guarantees no other slice exists.
        unsafe {
            std::slice::from_raw_parts_mut(self.region.base_ptr().cast::<i16>(), self.count)
        }
    }
}

impl Drop for SampleGuard<'_> {
    fn drop(&mut self) {
        close_bracket(self.region);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemfdBackend;
    use std::path::Path;
    use std::sync::Arc;

    fn region() -> ShmRegion {
        ShmRegion::allocate(
            Arc::new(MemfdBackend::new()),
            "params",
            64,
            Path::new("/dev/remoteproc0"),
        )
        .unwrap()
    }

    #[test]
    fn test_field_round_trip() {
        let r = region();
        {
            let g = r.bracket().unwrap();
            g.store_f32(0, 0.5);
            g.store_i32(4, -12);
        }
        let g = r.bracket().unwrap();
        assert_eq!(g.load_f32(0), 0.5);
        assert_eq!(g.load_i32(4), -12);
    }

    #[test]
    fn test_guard_closes_bracket_on_early_return() {
        fn touch(r: &ShmRegion) -> crate::error::Result<()> {
            let g = r.bracket()?;
            g.store_u32(8, 1);
            Err(crate::error::Error::Config("bail".into()))
        }
        let r = region();
        assert!(touch(&r).is_err());
        assert_eq!(r.sync_counts(), SyncCounts { starts: 1, ends: 1 });
    }

    #[test]
    fn test_guard_closes_bracket_on_panic() {
        let r = region();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let g = r.bracket().unwrap();
            g.load_u32(64); // out of bounds
        }));
        assert!(result.is_err());
        assert!(r.sync_counts().is_balanced());
    }

    #[test]
    fn test_concurrent_brackets_stay_balanced() {
        let r = Arc::new(region());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let g = r.bracket().unwrap();
                        g.store_u32(t * 4, i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let counts = r.sync_counts();
        assert_eq!(counts.starts, 2000);
        assert!(counts.is_balanced());
    }
}
