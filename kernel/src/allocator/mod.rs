// kernel/src/allocator/mod.rs
//
// Kernel heap: the buddy allocator is the sole physical-memory
// allocator and backs `alloc`/`Box`/`Vec` directly through
// `BuddyGlobalAlloc`. Trimmed from a version that additionally ran a
// slab cache in front of the buddy for small fixed-size objects; the
// paging engine and its collaborators only ever allocate page-sized
// kernel structures, so the slab layer had nothing left to cache.

pub mod buddy_allocator;

use core::alloc::{GlobalAlloc, Layout};

use x86_64::PhysAddr;

use buddy_allocator::BUDDY;

/// Smallest block the buddy allocator hands out (4 KiB, `MIN_ORDER`).
const MIN_ORDER: usize = 12;
const MAX_ORDER: usize = 28;

/// The order the buddy allocator would need for `layout`, or `None` if
/// that exceeds `MAX_ORDER` (256 MiB — nothing this kernel allocates
/// should ever be that large).
fn order_for(layout: Layout) -> Option<usize> {
    let need = layout.size().max(layout.align()).max(1);
    let order = usize::BITS as usize - (need - 1).leading_zeros() as usize;
    if order > MAX_ORDER {
        return None;
    }
    Some(order.max(MIN_ORDER))
}

pub struct BuddyGlobalAlloc;

unsafe impl GlobalAlloc for BuddyGlobalAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let order = match order_for(layout) {
            Some(order) => order,
            None => return core::ptr::null_mut(),
        };
        match BUDDY.lock().allocate(order) {
            Some(phys) => phys_to_virt(phys),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let order = order_for(layout).expect("dealloc: layout was never successfully allocated");
        let phys = virt_to_phys(ptr);
        BUDDY.lock().deallocate(phys, order);
    }
}

fn phys_to_virt(phys: PhysAddr) -> *mut u8 {
    (crate::memory::physical_memory_offset() + phys.as_u64()).as_mut_ptr::<u8>()
}

fn virt_to_phys(ptr: *mut u8) -> PhysAddr {
    PhysAddr::new(ptr as u64 - crate::memory::physical_memory_offset().as_u64())
}

#[global_allocator]
static GLOBAL_ALLOCATOR: BuddyGlobalAlloc = BuddyGlobalAlloc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn order_for_rounds_up_to_a_page_at_minimum() {
        assert_eq!(order_for(Layout::from_size_align(1, 1).unwrap()), Some(MIN_ORDER));
        assert_eq!(order_for(Layout::from_size_align(4096, 8).unwrap()), Some(MIN_ORDER));
        assert_eq!(order_for(Layout::from_size_align(4097, 8).unwrap()), Some(MIN_ORDER + 1));
    }
}
