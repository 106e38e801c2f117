// kernel/src/memory/mod.rs

use x86_64::VirtAddr;
use core::sync::atomic::{AtomicU64, Ordering};

pub mod address_space;
pub mod fault;
pub mod frame_allocator;
pub mod kpage_pool;
pub mod pte;

static PHYSICAL_MEMORY_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the offset of the kernel's direct physical-memory map. Must
/// be called once, early in boot, before anything touches `physcpy`,
/// `getpte`, or the kernel page pool.
pub fn init(physical_memory_offset: VirtAddr) {
    PHYSICAL_MEMORY_OFFSET.store(physical_memory_offset.as_u64(), Ordering::Relaxed);
}

pub fn physical_memory_offset() -> VirtAddr {
    VirtAddr::new(PHYSICAL_MEMORY_OFFSET.load(Ordering::Relaxed))
}