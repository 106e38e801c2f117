// process/scheduler.rs
//
// Round-robin scheduling policy, trimmed to the two decisions the
// paging engine actually depends on: who runs next, and how to tear
// a process down after a fault its region couldn't resolve.

use super::ProcessState;
use crate::memory::address_space;
use crate::region;

/// Switch `curr_proc` to the next Ready process, round-robin.
/// Returns the pid switched to, or `None` if no other process is ready.
pub fn schedule() -> Option<usize> {
    let current = super::try_curr_proc().map(|p| p.pid);
    let next = super::next_ready(current)?;
    super::set_current(next);
    super::set_state(next, ProcessState::Running);
    Some(next)
}

/// Tear down the current process after an unrecoverable fault and
/// schedule the next one. Only the trap dispatcher calls this — the
/// paging engine's fault handlers just return `Err` and leave the
/// kill-or-panic decision to the caller.
pub fn kill_current(reason: &str) -> Option<usize> {
    let current = super::curr_proc();
    crate::serial_println!("process {} killed: {}", current.pid, reason);

    region::clear_regions(current.pid);
    address_space::dstrypgdir(&current);
    super::set_state(current.pid, ProcessState::Zombie);
    super::clear(current.pid);

    schedule()
}
