// memory/fault.rs
//
// The paging engine's lazy-population and copy-on-write machinery:
// the two fault handlers (`vfault`, `pfault`) and the primitives they
// share with region setup (`freeupg`, `markpg`, `linkupg`).
//
// `vfault`/`pfault` never kill a process themselves — they return
// `Err` and leave that decision to whoever dispatches the trap
// (see interrupts::trap), matching the rest of the kernel's split
// between "resource exhaustion is a Result" and "invariant violation
// is a panic".

use x86_64::{
    structures::paging::{PageTableEntry, PhysFrame, Size4KiB},
    PhysAddr, VirtAddr,
};

use crate::fs;
use crate::hal::{self, PAGE_SIZE};
use crate::memory::address_space::getpte;
use crate::memory::frame_allocator::FA;
use crate::memory::pte::{DemandMark, PteExt};
use crate::process::Process;
use crate::region::{self, Region, RegionHandle, RegionMode};

/// Why a fault could not be resolved. The caller turns this into a
/// killed process (user mode) or a kernel panic (kernel mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NoRegion,
    NotDemandPageable,
    NotCow,
    OutOfFrames,
    ReadFailed,
}

fn frame_to_phys(frame_number: u64) -> PhysAddr {
    PhysAddr::new(frame_number * PAGE_SIZE)
}

fn phys_frame_of(frame_number: u64) -> PhysFrame<Size4KiB> {
    PhysFrame::containing_address(frame_to_phys(frame_number))
}

/// Allocate a frame and install it at `va`, present and zeroed.
/// Internal: callers are `readpg` (which then overwrites the content)
/// and `vfault`'s demand-zero path.
fn allocupg(proc: &Process, va: VirtAddr, writable: bool) -> Result<(), Fault> {
    let frame_number = FA.frame_alloc();
    if frame_number == 0 {
        return Err(Fault::OutOfFrames);
    }

    let pte = match getpte(proc, va, true) {
        Some(pte) => pte,
        None => {
            FA.frame_free(frame_number);
            return Err(Fault::OutOfFrames);
        }
    };

    pte.install(phys_frame_of(frame_number), writable, true);
    hal::tlb_flush(va);

    unsafe {
        hal::physzero(frame_to_phys(frame_number), PAGE_SIZE as usize);
    }

    Ok(())
}

/// Fill a freshly-`allocupg`'d page from its region's backing file.
/// A short read is not an error: the tail of the page was already
/// zeroed by `allocupg`, which is exactly the ELF-BSS-style behavior
/// a demand-fill region wants.
fn readpg(proc: &Process, region: &Region, va: VirtAddr) -> Result<(), Fault> {
    let writable = region.mode.contains(RegionMode::MAY_WRITE);
    allocupg(proc, va, writable)?;

    let file = region.file().ok_or(Fault::NotDemandPageable)?;
    let page_index = (va.as_u64() - region.start) / PAGE_SIZE;
    let offset = file.off + page_index * PAGE_SIZE;

    let n = fs::file_read(file.inode, va.as_mut_ptr::<u8>(), PAGE_SIZE as usize, offset);
    if n < 0 {
        freeupg(getpte(proc, va, false).expect("readpg: pte vanished"), va);
        return Err(Fault::ReadFailed);
    }
    Ok(())
}

/// Release whatever `pte` holds: a present mapping frees its frame, a
/// demand marking is simply cleared, and an already-clear PTE is a
/// no-op. Any other combination is a bookkeeping bug.
pub fn freeupg(pte: &mut PageTableEntry, va: VirtAddr) {
    if pte.is_clear() {
        return;
    }
    if pte.is_present() {
        let frame_number = pte.frame().expect("freeupg: present pte without frame").start_address().as_u64() / PAGE_SIZE;
        FA.frame_free(frame_number);
        pte.clear();
        hal::tlb_flush(va);
        return;
    }
    if pte.is_demand_fill() || pte.is_demand_zero() {
        pte.clear();
        hal::tlb_flush(va);
        return;
    }
    panic!("freeupg: pte in an invalid state");
}

/// Mark a not-yet-present PTE as demand-fill or demand-zero. Panics
/// if the PTE is already present — marking a live mapping means the
/// caller mixed up allocation order.
pub fn markpg(pte: &mut PageTableEntry, mark: DemandMark) {
    pte.mark(mark);
}

/// Duplicate `src` into `dst` for address-space cloning. Used by the
/// region subsystem when it clones a process's regions; the paging
/// engine only supplies the per-PTE policy:
///
/// - clear source: leave `dst` untouched.
/// - demand source (fill/zero, not present): byte copy, nothing to share.
/// - present + writable source: becomes COW in both copies, frame shared.
/// - present + already-read-only source: shared as-is.
pub fn linkupg(src: &mut PageTableEntry, dst: &mut PageTableEntry) {
    if src.is_clear() {
        return;
    }
    if !src.is_present() {
        if src.is_demand_fill() {
            dst.mark(DemandMark::Fill);
        } else if src.is_demand_zero() {
            dst.mark(DemandMark::Zero);
        } else {
            panic!("linkupg: non-present src pte in an invalid state");
        }
        return;
    }

    if src.is_writable() {
        src.enable_cow();
    } else if !src.cow_enabled() {
        panic!("linkupg: present src pte with invalid flag combination");
    }

    let frame_number = src.frame().expect("linkupg: present pte without frame").start_address().as_u64() / PAGE_SIZE;
    FA.frame_share(frame_number);

    let flags = src.flags();
    dst.set_frame(src.frame().unwrap(), flags);
}

pub fn cow_enable(pte: &mut PageTableEntry) {
    pte.enable_cow();
}

pub fn cow_enabled(pte: &PageTableEntry) -> bool {
    pte.cow_enabled()
}

/// Allocate a private copy of `src_pte`'s frame into `dst_pte` with
/// the given flags. Internal to `cow_disable`.
fn cpypg(src_pte: &PageTableEntry, dst_pte: &mut PageTableEntry, writable: bool) -> Result<(), Fault> {
    let src_frame_number = src_pte.frame().expect("cpypg: src pte not present").start_address().as_u64() / PAGE_SIZE;
    let new_frame_number = FA.frame_alloc();
    if new_frame_number == 0 {
        return Err(Fault::OutOfFrames);
    }

    unsafe {
        hal::physcpy(frame_to_phys(new_frame_number), frame_to_phys(src_frame_number), PAGE_SIZE as usize);
    }

    dst_pte.install(phys_frame_of(new_frame_number), writable, true);
    Ok(())
}

/// Break copy-on-write on `pte`: if its frame is shared, give it a
/// private copy; if not, it was the last reference, so just restore
/// write access.
pub fn cow_disable(pte: &mut PageTableEntry, va: VirtAddr) -> Result<(), Fault> {
    let frame_number = pte.frame().expect("cow_disable: pte not present").start_address().as_u64() / PAGE_SIZE;

    if FA.frame_is_shared(frame_number) {
        let mut scratch = PageTableEntry::new();
        cpypg(pte, &mut scratch, true)?;
        FA.frame_free(frame_number);
        *pte = scratch;
    } else {
        let mut flags = pte.flags();
        flags.insert(x86_64::structures::paging::PageTableFlags::WRITABLE);
        flags.remove(x86_64::structures::paging::PageTableFlags::BIT_9);
        let frame = pte.frame().unwrap();
        pte.set_frame(frame, flags);
    }

    hal::tlb_flush(va);
    Ok(())
}

/// Validity fault: `va` has no present mapping at all.
///
/// Resolves demand-fill/demand-zero pages, and grows the stack region
/// one page at a time when the fault lands just below it.
pub fn vfault(proc: &Process, va: VirtAddr) -> Result<(), Fault> {
    let handle = match region::findreg(proc.pid, va.as_u64()) {
        Some(h) => h,
        None => {
            let probe = va + PAGE_SIZE;
            let stack_handle = region::findreg(proc.pid, probe.as_u64()).filter(|h| h.region.is_stack());
            match stack_handle {
                Some(mut h) => {
                    region::lockreg(&h);
                    let result = match region::growreg(&mut h, 1) {
                        Ok(_) => {
                            let page_va = VirtAddr::new(hal::page_align_down(va.as_u64()));
                            match getpte(proc, page_va, true) {
                                Some(pte) => {
                                    markpg(pte, DemandMark::Zero);
                                    Ok(())
                                }
                                None => Err(Fault::OutOfFrames),
                            }
                        }
                        Err(_) => Err(Fault::NoRegion),
                    };
                    region::unlockreg(&h);
                    result?;
                    h
                }
                None => return Err(Fault::NoRegion),
            }
        }
    };

    region::lockreg(&handle);
    let result = resolve_demand_fault(proc, &handle.region, va);
    region::unlockreg(&handle);
    result
}

fn resolve_demand_fault(proc: &Process, region: &Region, va: VirtAddr) -> Result<(), Fault> {
    let pte = getpte(proc, va, false).ok_or(Fault::NotDemandPageable)?;
    if pte.is_demand_fill() {
        readpg(proc, region, va)
    } else if pte.is_demand_zero() {
        allocupg(proc, va, region.mode.contains(RegionMode::MAY_WRITE))
    } else {
        Err(Fault::NotDemandPageable)
    }
}

/// Protection fault: `va` has a present mapping but the write was
/// rejected by the CPU (read-only PTE).
pub fn pfault(proc: &Process, va: VirtAddr) -> Result<(), Fault> {
    let handle = region::findreg(proc.pid, va.as_u64()).ok_or(Fault::NoRegion)?;
    region::lockreg(&handle);

    let result = (|| {
        let pte = getpte(proc, va, false).ok_or(Fault::NotCow)?;
        if !cow_enabled(pte) {
            return Err(Fault::NotCow);
        }
        cow_disable(pte, va)
    })();

    region::unlockreg(&handle);
    result
}

/// Handle type re-exported for the trap dispatcher, which needs to
/// name it when logging a killed process's last fault.
pub type FaultHandle = RegionHandle;
