// process/mod.rs
//
// Process Control Block and the single piece of process-subsystem
// state the paging engine actually depends on: "who is the current
// process". Scheduling policy, syscalls, ring-3 entry/exit and signal
// delivery belong to a process subsystem this crate does not build;
// what's here is the minimal PCB + a fixed process table so the
// paging engine (crtpgdir, the fault handlers) has somewhere real to
// read `curr_proc` from.

use spin::Mutex;
use x86_64::{
    structures::paging::{PhysFrame, Size4KiB},
    VirtAddr,
};

use crate::memory::kpage_pool::KPg;

pub mod scheduler;

pub const NPROC: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Unused,
    Ready,
    Running,
    Zombie,
}

/// Process Control Block.
///
/// `pgdir`/`kstack`/`kesp`/`kernel_running` are exactly the fields the
/// paging engine's External Interfaces section names — this struct
/// intentionally carries nothing else.
#[derive(Debug, Clone, Copy)]
pub struct Process {
    pub pid: usize,
    pub state: ProcessState,
    /// Physical root of this process's PML4 (the cr3 value while running).
    pub pgdir: PhysFrame<Size4KiB>,
    pub kstack: KPg,
    /// Saved kernel stack pointer while not running.
    pub kesp: VirtAddr,
    /// True if this process was itself executing kernel code (e.g. a
    /// nested syscall) at the moment it was cloned by `crtpgdir`.
    pub kernel_running: bool,
}

struct ProcTable {
    slots: [Option<Process>; NPROC],
    current: Option<usize>,
    next_pid: usize,
}

static PROC_TABLE: Mutex<ProcTable> = Mutex::new(ProcTable {
    slots: [None; NPROC],
    current: None,
    next_pid: 1,
});

/// Allocate a fresh PID. Does not install a process under it.
pub fn allocate_pid() -> usize {
    let mut table = PROC_TABLE.lock();
    let pid = table.next_pid;
    table.next_pid += 1;
    pid
}

/// Install (or overwrite) the process table entry for `proc.pid`.
pub fn install(proc: Process) {
    let mut table = PROC_TABLE.lock();
    let pid = proc.pid;
    assert!(pid < NPROC, "install: pid {} out of range", pid);
    table.slots[pid] = Some(proc);
}

/// Mark `pid` as the process the CPU is currently executing on behalf of.
pub fn set_current(pid: usize) {
    PROC_TABLE.lock().current = Some(pid);
}

pub fn clear(pid: usize) {
    let mut table = PROC_TABLE.lock();
    table.slots[pid] = None;
    if table.current == Some(pid) {
        table.current = None;
    }
}

/// The running process. Panics if none is current — every fault and
/// every `crtpgdir` call happens on behalf of some process, so an
/// absent current process is a boot-sequencing bug.
pub fn curr_proc() -> Process {
    try_curr_proc().expect("curr_proc: no current process")
}

/// Non-panicking form of `curr_proc`, used by code paths (like the
/// paging engine's own TLB-flush decisions) that run both with and
/// without a process context established.
pub fn try_curr_proc() -> Option<Process> {
    let table = PROC_TABLE.lock();
    let idx = table.current?;
    table.slots[idx]
}

pub fn lookup(pid: usize) -> Option<Process> {
    if pid >= NPROC {
        return None;
    }
    PROC_TABLE.lock().slots[pid]
}

pub fn set_state(pid: usize, state: ProcessState) {
    let mut table = PROC_TABLE.lock();
    if let Some(slot) = table.slots.get_mut(pid).and_then(|s| s.as_mut()) {
        slot.state = state;
    }
}

/// First Ready pid strictly after `after` (wrapping), or the first
/// Ready pid at all if `after` is `None`.
pub fn next_ready(after: Option<usize>) -> Option<usize> {
    let table = PROC_TABLE.lock();
    let start = after.map_or(0, |p| p + 1);
    (0..NPROC)
        .map(|i| (start + i) % NPROC)
        .find(|&i| matches!(table.slots[i], Some(p) if p.state == ProcessState::Ready))
}
