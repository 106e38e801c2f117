// memory/frame_allocator.rs
//
// Frame Allocator: a fixed-size, reference-counted table over the
// physical frames available for user pages. Discovers its backing
// frames once at boot by walking the bootloader's usable memory
// regions (the same approach the allocator used before refcounting
// was added), then hands out frame numbers purely from the refcount
// array — no further interaction with the memory map.

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use spin::Mutex;
use x86_64::{
    structures::paging::{PhysFrame, Size4KiB},
    PhysAddr,
};

use crate::hal::{PAGE_SIZE, UMEM_SIZE};

const NR_FRAMES: usize = (UMEM_SIZE / PAGE_SIZE) as usize;

struct FrameAllocatorInner {
    /// Physical frame number (index into this table) of slot 0.
    base_frame: u64,
    refcount: [u16; NR_FRAMES],
    ready: bool,
}

pub struct FrameAllocator {
    inner: Mutex<FrameAllocatorInner>,
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(FrameAllocatorInner {
                base_frame: 0,
                refcount: [0; NR_FRAMES],
                ready: false,
            }),
        }
    }

    /// Reserve up to `NR_FRAMES` usable physical frames from the
    /// bootloader's memory map, starting at the first usable region at
    /// or above `min_phys` (so the pool never overlaps the kernel image
    /// or the kernel page pool, which are reserved separately).
    pub fn init(&self, memory_regions: &'static MemoryRegions, min_phys: u64) {
        let mut inner = self.inner.lock();

        let mut base_frame = None;
        let mut claimed = 0u64;

        'regions: for region in memory_regions.iter() {
            if region.kind != MemoryRegionKind::Usable {
                continue;
            }
            let start = region.start.max(min_phys);
            if start >= region.end {
                continue;
            }
            let mut addr = start & !(PAGE_SIZE - 1);
            if addr < start {
                addr += PAGE_SIZE;
            }
            while addr + PAGE_SIZE <= region.end {
                if base_frame.is_none() {
                    base_frame = Some(addr / PAGE_SIZE);
                }
                claimed += 1;
                addr += PAGE_SIZE;
                if claimed >= NR_FRAMES as u64 {
                    break 'regions;
                }
            }
        }

        inner.base_frame = base_frame.unwrap_or(0);
        inner.ready = true;
    }

    /// Physical address one past this pool's claimed frames, assuming
    /// (as `init` does) that they form a single contiguous run. The
    /// buddy allocator claims the remaining usable memory; it must not
    /// see anything below this address or the two allocators would
    /// hand out the same physical memory.
    pub fn claimed_range(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        let start = inner.base_frame * PAGE_SIZE;
        (start, start + NR_FRAMES as u64 * PAGE_SIZE)
    }

    /// Allocate a frame. Returns 0 (never a valid frame number, since
    /// frame 0 of physical memory is reserved for the BIOS/bootloader
    /// and is never part of this pool) on exhaustion.
    pub fn frame_alloc(&self) -> u64 {
        let mut inner = self.inner.lock();
        debug_assert!(inner.ready, "frame_allocator: alloc before init");
        match inner.refcount.iter().position(|&rc| rc == 0) {
            Some(slot) => {
                inner.refcount[slot] = 1;
                inner.base_frame + slot as u64
            }
            None => 0,
        }
    }

    fn slot(&self, inner: &FrameAllocatorInner, frame_number: u64) -> usize {
        (frame_number - inner.base_frame) as usize
    }

    /// Decrement a frame's reference count. Dropping it below zero is a
    /// fatal invariant violation (double free).
    pub fn frame_free(&self, frame_number: u64) {
        let mut inner = self.inner.lock();
        let slot = self.slot(&inner, frame_number);
        if inner.refcount[slot] == 0 {
            panic!("frame_allocator: double free of frame {}", frame_number);
        }
        inner.refcount[slot] -= 1;
    }

    /// Record an additional PTE referencing this frame (COW duplication).
    pub fn frame_share(&self, frame_number: u64) {
        let mut inner = self.inner.lock();
        let slot = self.slot(&inner, frame_number);
        inner.refcount[slot] += 1;
    }

    pub fn frame_is_shared(&self, frame_number: u64) -> bool {
        let inner = self.inner.lock();
        let slot = self.slot(&inner, frame_number);
        inner.refcount[slot] > 1
    }

    pub fn frame_to_phys_frame(&self, frame_number: u64) -> PhysFrame<Size4KiB> {
        PhysFrame::containing_address(PhysAddr::new(frame_number * PAGE_SIZE))
    }

    pub fn phys_frame_to_frame(&self, frame: PhysFrame<Size4KiB>) -> u64 {
        frame.start_address().as_u64() / PAGE_SIZE
    }

    #[cfg(test)]
    pub fn free_count(&self) -> usize {
        self.inner.lock().refcount.iter().filter(|&&rc| rc == 0).count()
    }
}

pub static FA: FrameAllocator = FrameAllocator::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn alloc_then_free_restores_free_count() {
        let before = FA.free_count();
        let f = FA.frame_alloc();
        assert_ne!(f, 0, "pool should not be exhausted");
        assert_eq!(FA.free_count(), before - 1);
        FA.frame_free(f);
        assert_eq!(FA.free_count(), before);
    }

    #[test_case]
    fn share_makes_frame_shared_until_both_owners_free_it() {
        let f = FA.frame_alloc();
        assert_ne!(f, 0);
        assert!(!FA.frame_is_shared(f));
        FA.frame_share(f);
        assert!(FA.frame_is_shared(f));
        FA.frame_free(f);
        assert!(!FA.frame_is_shared(f));
        FA.frame_free(f);
    }
}
