// kernel/src/init/memory.rs
//
// Physical memory offset → frame allocator → buddy → kernel page pool.
//
// The frame allocator and the buddy allocator must never be handed
// the same physical frame: the frame allocator claims its run of user
// frames first (starting at hal::UBASE_PHYS), and the buddy allocator
// only ever sees what's left of each usable region once that claim is
// clipped out. A prior version of this boot path let both allocators
// walk the same regions independently, which could hand out the same
// frame twice; this is the fix.

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use x86_64::VirtAddr;

use crate::{
    allocator,
    hal::{KPOOL_SIZE, UBASE_PHYS},
    memory::{self, frame_allocator::FA, kpage_pool::KPP},
    serial_println,
};

/// Initialize all memory subsystems in dependency order: physical
/// offset, then the two physical-frame allocators (user frames via
/// `FA`, everything else via the buddy), then the kernel page pool,
/// which is carved out of the buddy's share.
pub fn init_core(phys_mem_offset: VirtAddr, memory_regions: &'static MemoryRegions) {
    serial_println!(
        "physical memory offset: {:#x} (PML4 entry {})",
        phys_mem_offset.as_u64(),
        phys_mem_offset.as_u64() >> 39
    );

    memory::init(phys_mem_offset);

    FA.init(memory_regions, UBASE_PHYS);
    let (fa_start, fa_end) = FA.claimed_range();
    serial_println!("frame allocator claimed [{:#x}, {:#x})", fa_start, fa_end);

    {
        let mut buddy = allocator::buddy_allocator::BUDDY.lock();
        for region in memory_regions.iter() {
            if region.kind != MemoryRegionKind::Usable {
                continue;
            }
            let lo = region.start.max(UBASE_PHYS);
            let hi = region.end;
            if lo >= hi {
                continue;
            }
            for (start, end) in clip(lo, hi, fa_start, fa_end) {
                unsafe {
                    buddy.add_region(start, end);
                }
            }
        }
    }

    serial_println!("buddy stats:");
    allocator::buddy_allocator::BUDDY.lock().debug_print_stats();

    let kpool_order = KPOOL_SIZE.trailing_zeros() as usize;
    let kpool_phys = unsafe { allocator::buddy_allocator::BUDDY.lock().allocate(kpool_order) }
        .expect("init_core: buddy allocator has no room for the kernel page pool");
    KPP.init(kpool_phys);
    serial_println!("kernel page pool backed at {:#x}", kpool_phys.as_u64());
}

/// Split `[lo, hi)` around `[excl_start, excl_end)`, returning the
/// (up to two) sub-ranges of `[lo, hi)` that fall outside the
/// exclusion window.
fn clip(lo: u64, hi: u64, excl_start: u64, excl_end: u64) -> [(u64, u64); 2] {
    if excl_end <= lo || excl_start >= hi {
        return [(lo, hi), (0, 0)];
    }
    let before = if excl_start > lo { (lo, excl_start) } else { (0, 0) };
    let after = if excl_end < hi { (excl_end, hi) } else { (0, 0) };
    [before, after]
}

/// Allocator smoke test: a raw `alloc`/`dealloc` round trip plus a
/// couple of `alloc::collections` sanity checks, run once at boot
/// before anything depends on the heap.
pub fn test_allocators() {
    use alloc::{string::String, vec::Vec};
    use core::alloc::Layout;

    let layout = Layout::from_size_align(8, 8).unwrap();
    let ptr = unsafe { alloc::alloc::alloc(layout) };
    assert!(!ptr.is_null(), "heap allocation failed");
    unsafe {
        *(ptr as *mut u64) = 0xDEAD_BEEF;
        assert_eq!(*(ptr as *const u64), 0xDEAD_BEEF);
        alloc::alloc::dealloc(ptr, layout);
    }

    let mut v: Vec<u8> = Vec::new();
    v.push(1);
    v.push(2);
    v.push(3);
    assert_eq!(v.len(), 3);

    let s = String::from("kernel heap is alive");
    serial_println!("{}", s);
}
