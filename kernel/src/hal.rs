// hal.rs
//
// Architecture-specific primitives the paging engine needs but should
// never inline: raw physical-memory copies, TLB invalidation, and the
// handful of constants that describe where the kernel lives in the
// virtual address space.
//
// Everything here is x86_64-specific.  A port to another architecture
// only needs to replace this file.

use x86_64::{PhysAddr, VirtAddr};

/// 4 KiB pages only — this kernel does not use huge pages.
pub const PAGE_SIZE: u64 = 4096;
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Base of the kernel's own code/data mapping.
pub const KBASE_VIRT: u64 = 0xFFFF_8000_0000_0000;
/// Base of the kernel page pool (see memory::kpage_pool).
pub const KPOOL_VIRT: u64 = 0xFFFF_8800_0000_0000;
/// Base of the boot-time initrd mapping.
pub const INITRD_VIRT: u64 = 0xFFFF_9000_0000_0000;

/// Lowest physical address handed out to user frames.  Anything below
/// this is reserved for the kernel image and early boot structures.
pub const UBASE_PHYS: u64 = 0x0010_0000;

/// Size of a process kernel stack (one KPg).
pub const KSTACK_SIZE: u64 = PAGE_SIZE;
/// Size of the kernel page pool, in bytes.
pub const KPOOL_SIZE: u64 = 4 * 1024 * 1024;
/// Size of the user-frame pool, in bytes.
pub const UMEM_SIZE: u64 = 64 * 1024 * 1024;

/// Round `va` down to the start of its containing page.
#[inline]
pub const fn page_align_down(va: u64) -> u64 {
    va & !PAGE_MASK
}

/// Top-level page-directory index covering `va` — on this x86_64
/// kernel that's the PML4 index (bits 47:39), which is the directory
/// slot `crtpgdir`/`mappgtab`/`umappgtab` operate on.
#[inline]
pub const fn pgtab_index(va: u64) -> usize {
    ((va >> 39) & 0x1FF) as usize
}

/// Copy `len` bytes between two physical addresses via the kernel's
/// direct physical-memory map. Neither range may be unmapped.
///
/// # Safety
/// Caller guarantees `dst`/`src` each denote `len` physical bytes that
/// are backed by real memory and that the ranges do not overlap.
pub unsafe fn physcpy(dst: PhysAddr, src: PhysAddr, len: usize) {
    let offset = crate::memory::physical_memory_offset();
    let dst_ptr = (offset + dst.as_u64()).as_mut_ptr::<u8>();
    let src_ptr = (offset + src.as_u64()).as_ptr::<u8>();
    core::ptr::copy_nonoverlapping(src_ptr, dst_ptr, len);
}

/// Zero `len` bytes at the given physical address.
///
/// # Safety
/// Same requirements as `physcpy`.
pub unsafe fn physzero(dst: PhysAddr, len: usize) {
    let offset = crate::memory::physical_memory_offset();
    let dst_ptr = (offset + dst.as_u64()).as_mut_ptr::<u8>();
    core::ptr::write_bytes(dst_ptr, 0, len);
}

/// Invalidate the TLB entry covering `va` on this CPU.
///
/// Single-CPU kernel: no cross-CPU shootdown is needed.
#[inline]
pub fn tlb_flush(va: VirtAddr) {
    x86_64::instructions::tlb::flush(va);
}

/// Invalidate the whole TLB (used after swapping CR3).
#[inline]
pub fn tlb_flush_all() {
    use x86_64::registers::control::{Cr3, Cr3Flags};
    let (frame, flags) = Cr3::read();
    unsafe { Cr3::write(frame, flags.union(Cr3Flags::empty())) };
}

/// Saved kernel-mode execution context that `crtpgdir` must relocate
/// when it copies a kernel stack: the frame pointer chain on the new
/// stack still points at addresses on the *old* stack unless rebased.
///
/// `was_kernel_running` mirrors the source kernel's `KERNEL_RUNNING`
/// flag — the child is itself mid-syscall (e.g. a fork of a fork)
/// rather than freshly created.
pub fn rebase_kernel_context(
    new_kstack: VirtAddr,
    old_kstack: VirtAddr,
    kesp_old: VirtAddr,
    was_kernel_running: bool,
) -> VirtAddr {
    let delta = new_kstack.as_u64() as i64 - old_kstack.as_u64() as i64;
    let kesp_new = VirtAddr::new((kesp_old.as_u64() as i64 + delta) as u64);

    if was_kernel_running {
        unsafe {
            let ebp_slot = kesp_new.as_mut_ptr::<u64>();
            let saved_ebp = *ebp_slot;
            if saved_ebp >= old_kstack.as_u64() && saved_ebp < old_kstack.as_u64() + KSTACK_SIZE {
                *ebp_slot = (saved_ebp as i64 + delta) as u64;
            }
        }
    }

    kesp_new
}
