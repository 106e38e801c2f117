// memory/kpage_pool.rs
//
// Kernel Page Pool: a fixed array of contiguous kernel-mapped pages,
// reference-counted. Backs page directories and per-process kernel
// stacks — anything the kernel needs in page-sized, page-aligned
// units that must never move.
//
// The pool's backing storage is a single run of physical frames
// reserved from the buddy allocator at boot and addressed through the
// kernel's direct physical map (see memory::physical_memory_offset),
// so "acquire" never needs to touch a page table.

use spin::Mutex;
use x86_64::{PhysAddr, VirtAddr};

use crate::hal::{KPOOL_SIZE, PAGE_SIZE};

const NR_KPAGES: usize = (KPOOL_SIZE / PAGE_SIZE) as usize;

/// A kernel page, identified by its kernel-virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KPg(pub VirtAddr);

impl KPg {
    pub fn as_virt(&self) -> VirtAddr {
        self.0
    }
}

struct KernelPagePoolInner {
    base_phys: PhysAddr,
    refcount: [u16; NR_KPAGES],
    ready: bool,
}

pub struct KernelPagePool {
    inner: Mutex<KernelPagePoolInner>,
}

impl KernelPagePool {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(KernelPagePoolInner {
                base_phys: PhysAddr::new(0),
                refcount: [0; NR_KPAGES],
                ready: false,
            }),
        }
    }

    /// Reserve `base_phys .. base_phys + KPOOL_SIZE` as the pool's backing
    /// storage. Called once at boot after the buddy allocator has handed
    /// out that run of physical memory.
    pub fn init(&self, base_phys: PhysAddr) {
        let mut inner = self.inner.lock();
        inner.base_phys = base_phys;
        inner.ready = true;
    }

    fn slot_virt(&self, inner: &KernelPagePoolInner, slot: usize) -> VirtAddr {
        let phys = inner.base_phys + (slot as u64) * PAGE_SIZE;
        crate::memory::physical_memory_offset() + phys.as_u64()
    }

    /// Acquire a free kernel page. Returns `None` on exhaustion — this is
    /// a normal, recoverable condition, never a panic.
    pub fn acquire(&self, clean: bool) -> Option<KPg> {
        let mut inner = self.inner.lock();
        debug_assert!(inner.ready, "kpage_pool: acquire before init");

        let slot = inner.refcount.iter().position(|&rc| rc == 0)?;
        inner.refcount[slot] = 1;
        let virt = self.slot_virt(&inner, slot);

        if clean {
            unsafe {
                core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, PAGE_SIZE as usize);
            }
        }

        Some(KPg(virt))
    }

    /// Release a previously-acquired kernel page. Releasing a page whose
    /// refcount is already zero is a fatal invariant violation.
    pub fn release(&self, kpg: KPg) {
        let mut inner = self.inner.lock();
        let slot = self.slot_of(&inner, kpg);
        if inner.refcount[slot] == 0 {
            panic!("kpage_pool: double release of slot {}", slot);
        }
        inner.refcount[slot] -= 1;
    }

    fn slot_of(&self, inner: &KernelPagePoolInner, kpg: KPg) -> usize {
        let base_virt = crate::memory::physical_memory_offset() + inner.base_phys.as_u64();
        let delta = kpg.0.as_u64() - base_virt.as_u64();
        (delta / PAGE_SIZE) as usize
    }

    #[cfg(test)]
    pub fn free_count(&self) -> usize {
        self.inner.lock().refcount.iter().filter(|&&rc| rc == 0).count()
    }
}

pub static KPP: KernelPagePool = KernelPagePool::new();

// The double-release invariant (a fatal panic) has no test below:
// custom_test_frameworks has no should_panic harness, and this crate is
// a single `[[bin]]` with no lib.rs, so a separate tests/ binary would
// have no way to reach kpage_pool internals anyway. Exercising that
// panic would need a crate split this kernel doesn't otherwise want, so
// it stays a manual invariant instead of an automated one.
#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test_case]
    fn acquire_then_release_restores_free_count() {
        let before = KPP.free_count();
        let page = KPP.acquire(true).expect("pool should not be exhausted");
        assert_eq!(KPP.free_count(), before - 1);
        KPP.release(page);
        assert_eq!(KPP.free_count(), before);
    }

    #[test_case]
    fn exhaustion_returns_none_without_mutating_state() {
        let mut pages = Vec::new();
        while let Some(p) = KPP.acquire(false) {
            pages.push(p);
        }
        assert_eq!(KPP.free_count(), 0);
        assert!(KPP.acquire(false).is_none());
        assert_eq!(KPP.free_count(), 0);
        for p in pages {
            KPP.release(p);
        }
    }
}
