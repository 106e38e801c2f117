// region.rs
//
// Region subsystem — the external collaborator that tells the paging
// engine which virtual address ranges are valid for a process, what
// access they permit, and (for file-backed regions) where their bytes
// live on disk.
//
// This is explicitly NOT the subject of this crate: a real kernel
// would grow/shrink/merge/split regions, reference-count them across
// `fork`, and back them with VFS inodes.  What's here is the minimal
// surface the paging engine's fault handlers actually call —
// `findreg`, `lockreg`/`unlockreg`, `growreg` — kept as a fixed-size
// per-process table so it never needs the heap.

use bitflags::bitflags;
use spin::Mutex;

use crate::hal::PAGE_SIZE;

pub const MAX_PROCESSES: usize = 64;
const MAX_REGIONS_PER_PROCESS: usize = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionMode: u32 {
        const MAY_READ  = 1 << 0;
        const MAY_WRITE = 1 << 1;
        const MAY_EXEC  = 1 << 2;
    }
}

/// Backing-file coordinates for a demand-fill region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionFile {
    pub inode: u32,
    pub off: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Zero-filled on first touch.
    Anonymous,
    /// Filled from `RegionFile` on first touch.
    FileBacked(RegionFile),
    /// Anonymous, and eligible for `growreg` on a validity fault just
    /// below it (stack growth).
    Stack,
}

#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub start: u64,
    pub size_pages: usize,
    pub mode: RegionMode,
    pub kind: RegionKind,
}

impl Region {
    #[inline]
    pub fn end(&self) -> u64 {
        self.start + (self.size_pages as u64) * PAGE_SIZE
    }

    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end()
    }

    #[inline]
    pub fn is_stack(&self) -> bool {
        matches!(self.kind, RegionKind::Stack)
    }

    #[inline]
    pub fn file(&self) -> Option<RegionFile> {
        match self.kind {
            RegionKind::FileBacked(f) => Some(f),
            _ => None,
        }
    }
}

/// A found region, identified by process and slot so `lockreg`/
/// `growreg` can find it again without a second scan.
#[derive(Debug, Clone, Copy)]
pub struct RegionHandle {
    pid: usize,
    slot: usize,
    pub region: Region,
}

struct RegionList {
    entries: [Option<Region>; MAX_REGIONS_PER_PROCESS],
    locked: [bool; MAX_REGIONS_PER_PROCESS],
}

impl RegionList {
    const fn new() -> Self {
        Self {
            entries: [None; MAX_REGIONS_PER_PROCESS],
            locked: [false; MAX_REGIONS_PER_PROCESS],
        }
    }

    fn add(&mut self, region: Region) -> Result<(), &'static str> {
        for slot in self.entries.iter_mut() {
            if slot.is_none() {
                *slot = Some(region);
                return Ok(());
            }
        }
        Err("region list full")
    }

    fn find(&self, addr: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|r| r.map_or(false, |r| r.contains(addr)))
    }

    fn clear(&mut self) {
        self.entries = [None; MAX_REGIONS_PER_PROCESS];
        self.locked = [false; MAX_REGIONS_PER_PROCESS];
    }
}

static REGION_TABLE: Mutex<[RegionList; MAX_PROCESSES]> =
    Mutex::new([const { RegionList::new() }; MAX_PROCESSES]);

/// Register a region for `pid`. Used by process setup, never by the
/// fault path itself.
pub fn register_region(pid: usize, region: Region) -> Result<(), &'static str> {
    if pid >= MAX_PROCESSES {
        return Err("pid out of range for region table");
    }
    REGION_TABLE.lock()[pid].add(region)
}

/// Drop all regions for `pid` (process exit).
pub fn clear_regions(pid: usize) {
    if pid < MAX_PROCESSES {
        REGION_TABLE.lock()[pid].clear();
    }
}

/// Find the region containing `addr`, if any. Returns a handle the
/// caller can pass to `lockreg`/`unlockreg`/`growreg`.
pub fn findreg(pid: usize, addr: u64) -> Option<RegionHandle> {
    if pid >= MAX_PROCESSES {
        return None;
    }
    let table = REGION_TABLE.lock();
    let slot = table[pid].find(addr)?;
    let region = table[pid].entries[slot]?;
    Some(RegionHandle { pid, slot, region })
}

/// Mark a region locked for the duration of a fault. Single-CPU,
/// non-preemptive kernel: this can never contend with itself, so a
/// lock already held on entry is a bug, not a reason to block.
pub fn lockreg(handle: &RegionHandle) {
    let mut table = REGION_TABLE.lock();
    let locked = &mut table[handle.pid].locked[handle.slot];
    if *locked {
        panic!("lockreg: region already locked (pid={}, slot={})", handle.pid, handle.slot);
    }
    *locked = true;
}

pub fn unlockreg(handle: &RegionHandle) {
    let mut table = REGION_TABLE.lock();
    table[handle.pid].locked[handle.slot] = false;
}

/// Grow a stack region downward by `extra_pages`, returning the new
/// low address. Fails if `handle` does not name a stack region.
pub fn growreg(handle: &mut RegionHandle, extra_pages: usize) -> Result<u64, &'static str> {
    let mut table = REGION_TABLE.lock();
    let slot = table[handle.pid].entries[handle.slot]
        .as_mut()
        .ok_or("growreg: region vanished")?;
    if !slot.is_stack() {
        return Err("growreg: not a stack region");
    }
    slot.start -= (extra_pages as u64) * PAGE_SIZE;
    slot.size_pages += extra_pages;
    handle.region = *slot;
    Ok(slot.start)
}

pub fn dump_regions(pid: usize) {
    if pid >= MAX_PROCESSES {
        return;
    }
    let table = REGION_TABLE.lock();
    crate::serial_println!("regions for pid {}:", pid);
    for r in table[pid].entries.iter().flatten() {
        crate::serial_println!(
            "  {:#x}..{:#x} ({} pages) mode={:?} kind={:?}",
            r.start, r.end(), r.size_pages, r.mode, r.kind,
        );
    }
}
