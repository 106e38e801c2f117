// panic.rs
//
// Trimmed from a version that additionally drew a panic screen to the
// framebuffer; the framebuffer is out of scope here, so this logs over
// serial only. Uses `serial_println_raw!`, not the locked `Serial`
// writer — a panic can happen while that lock is held.

use core::panic::PanicInfo;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    unsafe {
        core::arch::asm!("cli");
    }

    crate::serial_println_raw!("KERNEL PANIC!");
    crate::serial_println_raw!("========================================");
    if let Some(location) = info.location() {
        crate::serial_println_raw!("at {}:{}:{}", location.file(), location.line(), location.column());
    }
    crate::serial_println_raw!("{}", info.message());

    loop {
        unsafe {
            core::arch::asm!("hlt");
        }
    }
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crate::serial_println_raw!("[failed]");
    crate::serial_println_raw!("{}", info);
    crate::test_exit(crate::QemuExitCode::Failed)
}
