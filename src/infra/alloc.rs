//! A counting global allocator that tracks live and peak heap bytes.
//!
//! Install it in the binary with `#[global_allocator]`; the profiler reads it
//! through [`AllocationTracker`].

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::app::ports::AllocationTracker;

pub struct PeakAllocator {
    live: AtomicUsize,
    peak: AtomicUsize,
    baseline: AtomicUsize,
}

impl PeakAllocator {
    pub const fn new() -> Self {
        Self {
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            baseline: AtomicUsize::new(0),
        }
    }

    pub fn live_bytes(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    fn grew(&self, bytes: usize) {
        let live = self.live.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak.fetch_max(live, Ordering::Relaxed);
    }

    fn shrank(&self, bytes: usize) {
        self.live.fetch_sub(bytes, Ordering::Relaxed);
    }
}

impl Default for PeakAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: every call is forwarded unchanged to the system allocator; the
// counters never influence the returned memory.
unsafe impl GlobalAlloc for PeakAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: caller upholds GlobalAlloc::alloc's contract.
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            self.grew(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: caller upholds GlobalAlloc::alloc_zeroed's contract.
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            self.grew(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: caller upholds GlobalAlloc::dealloc's contract.
        unsafe { System.dealloc(ptr, layout) };
        self.shrank(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: caller upholds GlobalAlloc::realloc's contract.
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            if new_size >= layout.size() {
                self.grew(new_size - layout.size());
            } else {
                self.shrank(layout.size() - new_size);
            }
        }
        new_ptr
    }
}

impl AllocationTracker for PeakAllocator {
    /// Starts a new measurement: the peak restarts at the current live size.
    fn reset_peak(&self) {
        let live = self.live.load(Ordering::Relaxed);
        self.baseline.store(live, Ordering::Relaxed);
        self.peak.store(live, Ordering::Relaxed);
    }

    /// Peak heap growth since the last reset.
    fn peak_bytes(&self) -> u64 {
        let peak = self.peak.load(Ordering::Relaxed);
        peak.saturating_sub(self.baseline.load(Ordering::Relaxed)) as u64
    }
}

/// Lets the `#[global_allocator]` static be shared as an `Arc<dyn AllocationTracker>`.
impl AllocationTracker for &'static PeakAllocator {
    fn reset_peak(&self) {
        (**self).reset_peak();
    }

    fn peak_bytes(&self) -> u64 {
        (**self).peak_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercised directly rather than as the test binary's global allocator.
    fn allocate(allocator: &PeakAllocator, size: usize) -> (*mut u8, Layout) {
        let layout = Layout::from_size_align(size, 8).unwrap();
        // SAFETY: non-zero size, valid alignment.
        let ptr = unsafe { allocator.alloc(layout) };
        assert!(!ptr.is_null());
        (ptr, layout)
    }

    #[test]
    fn peak_survives_deallocation() {
        let allocator = PeakAllocator::new();
        allocator.reset_peak();

        let (ptr, layout) = allocate(&allocator, 4_096);
        // SAFETY: allocated above with the same layout.
        unsafe { allocator.dealloc(ptr, layout) };

        assert_eq!(allocator.live_bytes(), 0);
        assert_eq!(allocator.peak_bytes(), 4_096);
    }

    #[test]
    fn reset_measures_from_current_live_size() {
        let allocator = PeakAllocator::new();
        let (held, held_layout) = allocate(&allocator, 1_000);

        allocator.reset_peak();
        assert_eq!(allocator.peak_bytes(), 0);

        let (ptr, layout) = allocate(&allocator, 300);
        assert_eq!(allocator.peak_bytes(), 300);

        // SAFETY: both allocated above with these layouts.
        unsafe {
            allocator.dealloc(ptr, layout);
            allocator.dealloc(held, held_layout);
        }
    }

    #[test]
    fn realloc_tracks_growth_and_shrink() {
        let allocator = PeakAllocator::new();
        allocator.reset_peak();
        let (ptr, layout) = allocate(&allocator, 100);

        // SAFETY: ptr was allocated with layout; sizes are non-zero.
        let grown = unsafe { allocator.realloc(ptr, layout, 900) };
        assert_eq!(allocator.live_bytes(), 900);
        let grown_layout = Layout::from_size_align(900, 8).unwrap();
        // SAFETY: grown came from realloc with grown_layout's size.
        let shrunk = unsafe { allocator.realloc(grown, grown_layout, 50) };
        assert_eq!(allocator.live_bytes(), 50);
        assert_eq!(allocator.peak_bytes(), 900);

        // SAFETY: shrunk holds 50 bytes at alignment 8.
        unsafe { allocator.dealloc(shrunk, Layout::from_size_align(50, 8).unwrap()) };
    }
}
