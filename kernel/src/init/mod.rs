// kernel/src/init/mod.rs
//
// Boot orchestration: IDT, then the memory subsystem in its
// dependency order, then a single bootstrap process so `curr_proc`
// has somewhere real to read from. No scheduler runs after this —
// there is exactly one process, and the kernel halts waiting for
// interrupts once it is installed.

pub mod memory;

use bootloader_api::BootInfo;
use x86_64::{registers::control::Cr3, VirtAddr};

use crate::{
    hal::KSTACK_SIZE,
    interrupts,
    memory::kpage_pool::KPP,
    process::{self, Process, ProcessState},
    serial_println,
};

pub fn boot(boot_info: &'static mut BootInfo) -> ! {
    early_init(boot_info);

    loop {
        x86_64::instructions::hlt();
    }
}

/// Everything boot needs before either entering the idle loop (normal
/// boot) or running the `#[test_case]` harness (test builds): IDT,
/// memory subsystems, and a bootstrap process so `curr_proc` resolves.
///
/// Split out from `boot` so the test binary — which never reaches the
/// idle loop — still boots a real address space before its tests touch
/// the kernel page pool, the frame allocator, or `process::curr_proc`.
pub fn early_init(boot_info: &'static mut BootInfo) {
    interrupts::init();

    let phys_mem_offset = VirtAddr::new(boot_info.physical_memory_offset.into_option().unwrap());

    memory::init_core(phys_mem_offset, &boot_info.memory_regions);
    memory::test_allocators();

    serial_println!("starting bootstrap process");
    let pid = start_bootstrap_process();
    serial_println!("bootstrap process is pid {}", pid);
}

/// Install the process the boot CPU is already running as the one and
/// only entry in the process table. Its page directory is whatever
/// CR3 the bootloader left active; it did not arrive via `crtpgdir`,
/// so there is nothing to clone here.
fn start_bootstrap_process() -> usize {
    let pid = process::allocate_pid();
    let (pgdir, _) = Cr3::read();
    let kstack = KPP.acquire(true).expect("start_bootstrap_process: kernel page pool exhausted");

    process::install(Process {
        pid,
        state: ProcessState::Running,
        pgdir,
        kstack,
        kesp: kstack.as_virt() + KSTACK_SIZE,
        kernel_running: true,
    });
    process::set_current(pid);

    pid
}
