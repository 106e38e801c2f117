// memory/pte.rs
//
// Extra page-table-entry state the hardware doesn't define on its own:
// copy-on-write, demand-fill and demand-zero. x86_64 reserves bits 9-11
// of every PTE for OS use; we claim them here and give the three
// logical states named accessors so call sites never juggle raw bits.

use x86_64::{
    structures::paging::{page_table::FrameError, PageTableEntry, PageTableFlags, PhysFrame, Size4KiB},
};

/// Page is shared with another address space; writes must copy first.
const COW: PageTableFlags = PageTableFlags::BIT_9;
/// Page is not yet backed; populate by zero-filling on first touch.
const ZERO: PageTableFlags = PageTableFlags::BIT_10;
/// Page is not yet backed; populate from its region's file on first touch.
const FILL: PageTableFlags = PageTableFlags::BIT_11;

/// One of the three logical "not yet present" markings a clear PTE can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemandMark {
    Fill,
    Zero,
}

pub trait PteExt {
    /// No mapping and no demand marking at all.
    fn is_clear(&self) -> bool;
    fn is_demand_fill(&self) -> bool;
    fn is_demand_zero(&self) -> bool;
    fn is_present(&self) -> bool;
    fn is_writable(&self) -> bool;
    fn cow_enabled(&self) -> bool;
    fn frame(&self) -> Result<PhysFrame<Size4KiB>, FrameError>;

    /// Mark a clear PTE as demand-fill or demand-zero. Panics if the
    /// PTE is already present — marking only applies to absent pages.
    fn mark(&mut self, mark: DemandMark);

    /// Install a fresh present mapping, replacing whatever was there.
    fn install(&mut self, frame: PhysFrame<Size4KiB>, writable: bool, user: bool);

    /// Flip a present, writable PTE into COW (read-only, cow bit set).
    fn enable_cow(&mut self);

    /// Release the mapping entirely (used by freeupg once the frame has
    /// been freed, and to clear a stale demand marking).
    fn clear(&mut self);
}

impl PteExt for PageTableEntry {
    fn is_clear(&self) -> bool {
        self.is_unused()
    }

    fn is_demand_fill(&self) -> bool {
        !self.flags().contains(PageTableFlags::PRESENT) && self.flags().contains(FILL)
    }

    fn is_demand_zero(&self) -> bool {
        !self.flags().contains(PageTableFlags::PRESENT) && self.flags().contains(ZERO)
    }

    fn is_present(&self) -> bool {
        self.flags().contains(PageTableFlags::PRESENT)
    }

    fn is_writable(&self) -> bool {
        self.flags().contains(PageTableFlags::WRITABLE)
    }

    fn cow_enabled(&self) -> bool {
        self.flags().contains(COW) && !self.flags().contains(PageTableFlags::WRITABLE)
    }

    fn frame(&self) -> Result<PhysFrame<Size4KiB>, FrameError> {
        self.frame()
    }

    fn mark(&mut self, mark: DemandMark) {
        if self.is_present() {
            panic!("markpg: PTE already present");
        }
        let bits = match mark {
            DemandMark::Fill => FILL,
            DemandMark::Zero => ZERO,
        };
        self.set_addr(x86_64::PhysAddr::new(0), bits);
    }

    fn install(&mut self, frame: PhysFrame<Size4KiB>, writable: bool, user: bool) {
        let mut flags = PageTableFlags::PRESENT;
        if writable {
            flags |= PageTableFlags::WRITABLE;
        }
        if user {
            flags |= PageTableFlags::USER_ACCESSIBLE;
        }
        self.set_frame(frame, flags);
    }

    fn enable_cow(&mut self) {
        let frame = self.frame().expect("enable_cow: PTE not present");
        let mut flags = self.flags();
        flags.remove(PageTableFlags::WRITABLE);
        flags.insert(COW);
        self.set_frame(frame, flags);
    }

    fn clear(&mut self) {
        self.set_unused();
    }
}
