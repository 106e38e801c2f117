// kernel/src/interrupts/mod.rs
//
// IDT construction and trap dispatch. The page fault handler lives
// here rather than under memory:: because it is the one piece of code
// that has to decide, rather than just resolve — `fault::vfault` and
// `fault::pfault` return a `Result` and leave the kill-or-panic call
// to whoever dispatches the trap, which is this file.

pub mod exception;
pub mod idt;

use spin::Once;
use x86_64::{registers::control::Cr2, VirtAddr};

use exception::ExceptionStackFrame;
use idt::InterruptDescriptorTable;

use crate::memory::fault::{self, Fault};
use crate::process::{self, scheduler};
use crate::serial_println;

static IDT: Once<InterruptDescriptorTable> = Once::new();

pub fn init() {
    IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        idt.add_handler(0, divide_by_zero_handler);
        idt.add_handler(6, invalid_opcode_handler);
        idt.add_double_fault_handler(8, double_fault_handler);
        idt.add_handler_with_error(13, general_protection_fault_handler);
        idt.add_handler_with_error(14, page_fault_handler);
        idt
    });
    IDT.get().unwrap().load();
}

fn in_user_mode(sf: &ExceptionStackFrame) -> bool {
    sf.code_segment & 0x3 != 0
}

extern "x86-interrupt" fn divide_by_zero_handler(sf: &mut ExceptionStackFrame) {
    if in_user_mode(sf) {
        scheduler::kill_current("divide by zero");
        return;
    }
    panic!("divide by zero at {:#x}", { sf.instruction_pointer });
}

extern "x86-interrupt" fn invalid_opcode_handler(sf: &mut ExceptionStackFrame) {
    if in_user_mode(sf) {
        scheduler::kill_current("invalid opcode");
        return;
    }
    panic!("invalid opcode at {:#x}", { sf.instruction_pointer });
}

extern "x86-interrupt" fn double_fault_handler(sf: &mut ExceptionStackFrame, error_code: u64) -> ! {
    panic!("double fault (error code {}) at {:#x}", error_code, { sf.instruction_pointer });
}

extern "x86-interrupt" fn general_protection_fault_handler(sf: &mut ExceptionStackFrame, error_code: u64) {
    if in_user_mode(sf) {
        scheduler::kill_current("general protection fault");
        return;
    }
    panic!("general protection fault (error code {}) at {:#x}", error_code, { sf.instruction_pointer });
}

/// Bit 0 of the page fault error code: 0 means the faulting page was
/// not present at all (a validity fault), 1 means it was present but
/// the access violated its protection (a protection fault).
const PF_PRESENT: u64 = 1 << 0;
const PF_USER: u64 = 1 << 2;

extern "x86-interrupt" fn page_fault_handler(sf: &mut ExceptionStackFrame, error_code: u64) {
    let va = VirtAddr::new(Cr2::read_raw());
    let proc = match process::try_curr_proc() {
        Some(p) => p,
        None => panic!("page fault at {:#x} with no current process", va.as_u64()),
    };

    let result = if error_code & PF_PRESENT != 0 {
        fault::pfault(&proc, va)
    } else {
        fault::vfault(&proc, va)
    };

    if let Err(reason) = result {
        if error_code & PF_USER != 0 {
            serial_println!("page fault at {:#x}: {:?}", va.as_u64(), reason);
            scheduler::kill_current(fault_reason(reason));
            return;
        }
        panic!("unresolved kernel page fault at {:#x}: {:?}", va.as_u64(), reason);
    }
}

fn fault_reason(fault: Fault) -> &'static str {
    match fault {
        Fault::NoRegion => "page fault: no region",
        Fault::NotDemandPageable => "page fault: not demand pageable",
        Fault::NotCow => "page fault: not copy-on-write",
        Fault::OutOfFrames => "page fault: out of frames",
        Fault::ReadFailed => "page fault: backing read failed",
    }
}
