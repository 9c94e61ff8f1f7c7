//! Verifies the panic path itself: the panic handler reports success to
//! QEMU when the kernel panics as expected, failure if it doesn't.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use veridian_kernel::{exit_qemu, serial_println, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("should_panic: expecting a panic from the assertion below");
    should_fail();
    serial_println!("[test did not panic]");
    exit_qemu(QemuExitCode::Failed)
}

fn should_fail() {
    assert_eq!(1, 2, "intentional failure to exercise the panic path");
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[ok] {}", info);
    exit_qemu(QemuExitCode::Success)
}
