// memory/address_space.rs
//
// Paging Engine: per-process page directories. A "directory" here is
// the process's PML4; `getpde`/`mappgtab`/`umappgtab` address PML4
// slots directly, while `getpte` walks (and, when asked, fills in)
// the PDPT/PD levels beneath a slot using kernel pages from the
// kernel page pool, collapsing what the original design treats as a
// single intermediate "page table" level into however many the
// hardware actually needs. Callers never see the PDPT/PD split.

use x86_64::{
    structures::paging::{PageTable, PageTableEntry, PageTableFlags, PhysFrame, Size4KiB},
    PhysAddr, VirtAddr,
};

use crate::hal::{self, INITRD_VIRT, KBASE_VIRT, KPOOL_VIRT, KSTACK_SIZE};
use crate::memory::kpage_pool::{KPg, KPP};
use crate::process::{self, Process, ProcessState};

fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    crate::memory::physical_memory_offset() + phys.as_u64()
}

fn virt_to_phys(virt: VirtAddr) -> PhysAddr {
    PhysAddr::new(virt.as_u64() - crate::memory::physical_memory_offset().as_u64())
}

fn kpg_phys(kpg: KPg) -> PhysAddr {
    virt_to_phys(kpg.as_virt())
}

fn pml4_table(proc: &Process) -> &'static mut PageTable {
    unsafe { &mut *phys_to_virt(proc.pgdir.start_address()).as_mut_ptr::<PageTable>() }
}

fn is_current(proc: &Process) -> bool {
    process::try_curr_proc().map_or(false, |cur| cur.pid == proc.pid)
}

/// The four PML4 slots every process directory must mirror from the
/// currently-running process: low memory (slot 0), the kernel image,
/// the kernel page pool, and the boot-time initrd.
fn kernel_slots() -> [usize; 4] {
    [
        0,
        hal::pgtab_index(KBASE_VIRT),
        hal::pgtab_index(KPOOL_VIRT),
        hal::pgtab_index(INITRD_VIRT),
    ]
}

/// Return the PML4 entry covering `va`.
pub fn getpde(proc: &Process, va: VirtAddr) -> &'static mut PageTableEntry {
    let idx = hal::pgtab_index(va.as_u64());
    &mut pml4_table(proc)[idx]
}

/// Install `pgtab` (a kernel page acquired from the KPP) as the page
/// table backing the PML4 slot covering `va`.
///
/// Panics if the slot is already mapped — installing a page table
/// over a busy directory entry is a caller bug, not a recoverable
/// condition.
pub fn mappgtab(proc: &Process, va: VirtAddr, pgtab: KPg) {
    let idx = hal::pgtab_index(va.as_u64());
    let pml4 = pml4_table(proc);
    if !pml4[idx].is_unused() {
        panic!("mappgtab: pde {} already mapped", idx);
    }
    let frame = PhysFrame::containing_address(kpg_phys(pgtab));
    pml4[idx].set_frame(
        frame,
        PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE,
    );
    if is_current(proc) {
        hal::tlb_flush(va);
    }
}

/// Clear the PML4 slot covering `va`.
///
/// Panics if the slot is already clear — unmapping what was never
/// mapped indicates a bookkeeping bug upstream.
pub fn umappgtab(proc: &Process, va: VirtAddr) {
    let idx = hal::pgtab_index(va.as_u64());
    let pml4 = pml4_table(proc);
    if pml4[idx].is_unused() {
        panic!("umappgtab: pde {} already clear", idx);
    }
    pml4[idx].set_unused();
    if is_current(proc) {
        hal::tlb_flush(va);
    }
}

/// Return the leaf PTE for `va`, walking (and optionally creating)
/// the intermediate PDPT/PD levels below the PML4 slot. Returns
/// `None` only if `create` is set and the kernel page pool is
/// exhausted partway through the walk.
pub fn getpte(proc: &Process, va: VirtAddr, create: bool) -> Option<&'static mut PageTableEntry> {
    let mut table: &mut PageTable = pml4_table(proc);
    let addr = va.as_u64();
    for shift in [39u32, 30, 21] {
        let idx = ((addr >> shift) & 0x1FF) as usize;
        let entry = &mut table[idx];
        if entry.is_unused() {
            if !create {
                return None;
            }
            let kpg = KPP.acquire(true)?;
            let frame = PhysFrame::containing_address(kpg_phys(kpg));
            entry.set_frame(
                frame,
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE,
            );
        }
        let next = entry.frame().expect("getpte: present entry without a frame");
        table = unsafe { &mut *phys_to_virt(next.start_address()).as_mut_ptr::<PageTable>() };
    }
    let pt_idx = ((addr >> 12) & 0x1FF) as usize;
    Some(&mut table[pt_idx])
}

/// Clone the current process's address space: a fresh directory that
/// mirrors the four kernel PML4 slots, plus a private copy of the
/// kernel stack with its saved stack/frame pointers rebased.
///
/// User mappings are NOT cloned here — that is the region subsystem's
/// job via `linkupg`, once this returns.
pub fn crtpgdir() -> Result<Process, &'static str> {
    let current = process::curr_proc();

    let dir_kpg = KPP.acquire(true).ok_or("crtpgdir: kernel page pool exhausted (pgdir)")?;
    let kstack_kpg = match KPP.acquire(false) {
        Some(k) => k,
        None => {
            KPP.release(dir_kpg);
            return Err("crtpgdir: kernel page pool exhausted (kstack)");
        }
    };

    let new_pml4: &mut PageTable = unsafe { &mut *dir_kpg.as_virt().as_mut_ptr::<PageTable>() };
    let cur_pml4: &PageTable = unsafe { &*phys_to_virt(current.pgdir.start_address()).as_ptr::<PageTable>() };
    for idx in kernel_slots() {
        new_pml4[idx] = cur_pml4[idx].clone();
    }

    unsafe {
        hal::physcpy(kpg_phys(kstack_kpg), kpg_phys(current.kstack), KSTACK_SIZE as usize);
    }

    let kesp_new = hal::rebase_kernel_context(
        kstack_kpg.as_virt(),
        current.kstack.as_virt(),
        current.kesp,
        current.kernel_running,
    );

    Ok(Process {
        pid: 0,
        state: ProcessState::Ready,
        pgdir: PhysFrame::containing_address(kpg_phys(dir_kpg)),
        kstack: kstack_kpg,
        kesp: kesp_new,
        kernel_running: false,
    })
}

/// Release a process's directory and kernel stack. The caller must
/// have already freed every user PTE (via `freeupg`) — this does not
/// walk the directory looking for leftover mappings.
pub fn dstrypgdir(proc: &Process) {
    KPP.release(proc.kstack);
    KPP.release(KPg(phys_to_virt(proc.pgdir.start_address())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn crtpgdir_mirrors_kernel_slots_and_dstrypgdir_releases_them() {
        let before = KPP.free_count();
        let child = crtpgdir().expect("kernel page pool should not be exhausted");

        let current = process::curr_proc();
        let cur_pml4: &PageTable = unsafe { &*phys_to_virt(current.pgdir.start_address()).as_ptr::<PageTable>() };
        let new_pml4: &PageTable = unsafe { &*phys_to_virt(child.pgdir.start_address()).as_ptr::<PageTable>() };
        for idx in kernel_slots() {
            assert_eq!(new_pml4[idx].addr(), cur_pml4[idx].addr());
        }

        dstrypgdir(&child);
        assert_eq!(KPP.free_count(), before);
    }
}
