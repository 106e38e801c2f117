#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

mod allocator;
mod fs;
mod hal;
mod init;
mod interrupts;
mod memory;
mod panic;
mod process;
mod region;
mod serial;

use bootloader_api::{BootInfo, BootloaderConfig, config::Mapping, entry_point};
use x86_64::instructions::port::Port;

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    #[cfg(test)]
    {
        init::early_init(boot_info);
        test_main();
        test_exit(QemuExitCode::Success);
    }
    #[cfg(not(test))]
    init::boot(boot_info)
}

/// Exit code written to the `isa-debug-exit` device. QEMU reports
/// `(code << 1) | 1` as its process exit status — see the
/// `test-success-exit-code` in Cargo.toml, which expects `Success`.
#[repr(u32)]
#[derive(Debug, Clone, Copy)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn test_exit(code: QemuExitCode) -> ! {
    unsafe {
        Port::new(0xf4).write(code as u32);
    }
    loop {
        unsafe {
            core::arch::asm!("hlt");
        }
    }
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
}