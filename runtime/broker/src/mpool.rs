//! Physical memory pool.
//!
//! Holds every untyped frame the root task obtained from sigma0, bucketed
//! by power-of-two size. `allocate` hands out a frame whose base is aligned
//! to its size (the map-item ABI requires it), splitting larger frames on
//! demand. The pool only ever shrinks after bootstrap; there is no free.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use l4_api::{Fpage, PAGE_SIZE};

pub struct MemPool {
    /// size_log2 -> frames of that size.
    buckets: BTreeMap<u32, Vec<Fpage>>,
    total: usize,
}

impl MemPool {
    pub fn new() -> MemPool {
        MemPool {
            buckets: BTreeMap::new(),
            total: 0,
        }
    }

    /// Add a frame. Frames must cover disjoint ranges; sigma0 guarantees
    /// this for granted memory and the pool never re-adds what it hands out.
    pub fn add(&mut self, frame: Fpage) {
        debug_assert!(!frame.is_nil() && !frame.is_complete());
        self.total += frame.size();
        self.buckets.entry(frame.size_log2()).or_default().push(frame);
    }

    /// Allocate one size-aligned frame of exactly `size` (rounded up to a
    /// power of two of at least one page), or `None` when no frame fits.
    pub fn allocate(&mut self, size: usize) -> Option<Fpage> {
        let want = size.max(PAGE_SIZE).next_power_of_two();
        let want_log2 = want.trailing_zeros();

        let bucket = self
            .buckets
            .range(want_log2..)
            .find(|(_, frames)| !frames.is_empty())
            .map(|(log2, _)| *log2)?;
        let mut frame = self.buckets.get_mut(&bucket)?.pop()?;

        // Split down to the requested size; both halves of an aligned
        // power-of-two frame are themselves aligned.
        while frame.size_log2() > want_log2 {
            let half = frame.size() / 2;
            let lower = Fpage::new(frame.base(), half, frame.access())?;
            let upper = Fpage::new(frame.base() + half, half, frame.access())?;
            self.buckets.entry(upper.size_log2()).or_default().push(upper);
            frame = lower;
        }

        self.total -= frame.size();
        Some(frame)
    }

    /// Bytes currently held.
    pub fn total_size(&self) -> usize {
        self.total
    }
}

impl Default for MemPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l4_api::Access;

    fn pool_with(base: usize, size: usize) -> MemPool {
        let mut pool = MemPool::new();
        pool.add(Fpage::new(base, size, Access::RWX).unwrap());
        pool
    }

    #[test]
    fn allocation_is_size_aligned() {
        let mut pool = pool_with(0x100_0000, 0x100_0000);
        for &size in &[0x1000, 0x2000, 0x8000, 0x2000, 0x1000] {
            let frame = pool.allocate(size).unwrap();
            assert_eq!(frame.size(), size);
            assert_eq!(frame.base() % size, 0, "base not aligned to size");
        }
    }

    #[test]
    fn sub_page_requests_round_up() {
        let mut pool = pool_with(0x10_0000, 0x10000);
        let frame = pool.allocate(100).unwrap();
        assert_eq!(frame.size(), PAGE_SIZE);
    }

    #[test]
    fn non_power_of_two_rounds_up() {
        let mut pool = pool_with(0x10_0000, 0x10000);
        let frame = pool.allocate(0x3000).unwrap();
        assert_eq!(frame.size(), 0x4000);
        assert_eq!(frame.base() % 0x4000, 0);
    }

    #[test]
    fn allocations_never_overlap() {
        let mut pool = pool_with(0x100_0000, 0x4_0000);
        let mut taken: Vec<Fpage> = Vec::new();
        for &size in &[0x1000, 0x8000, 0x1000, 0x2000, 0x4000, 0x1000] {
            let frame = pool.allocate(size).unwrap();
            for other in &taken {
                assert!(
                    frame.end() <= other.base() || other.end() <= frame.base(),
                    "{frame:?} overlaps {other:?}"
                );
            }
            taken.push(frame);
        }
    }

    #[test]
    fn pool_exhaustion() {
        let mut pool = pool_with(0x20_0000, 0x2000);
        assert!(pool.allocate(0x4000).is_none());
        assert!(pool.allocate(0x2000).is_some());
        assert!(pool.allocate(PAGE_SIZE).is_none());
    }

    #[test]
    fn total_size_tracks_adds_and_allocs() {
        let mut pool = MemPool::new();
        assert_eq!(pool.total_size(), 0);
        pool.add(Fpage::new(0x40_0000, 0x8000, Access::RWX).unwrap());
        pool.add(Fpage::new(0x50_0000, 0x1000, Access::RWX).unwrap());
        assert_eq!(pool.total_size(), 0x9000);

        pool.allocate(0x1000).unwrap();
        assert_eq!(pool.total_size(), 0x8000);
    }

    #[test]
    fn splits_keep_access() {
        let mut pool = MemPool::new();
        pool.add(Fpage::new(0x80_0000, 0x8000, Access::RW).unwrap());
        let frame = pool.allocate(0x1000).unwrap();
        assert_eq!(frame.access(), Access::RW);
    }
}
