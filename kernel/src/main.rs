//! Kernel binary entry point.
//!
//! All real startup logic lives in the `veridian_kernel` library: this
//! binary only needs to link it in so the `entry_point!` macro inside
//! `arch::x86_64::boot` (and the asm `_start_rust` stubs on the other
//! architectures) resolve to the real `_start` symbol the bootloader jumps
//! to, and supply the one panic handler a final binary needs.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use veridian_kernel as _;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    veridian_kernel::serial_println!("[KERNEL PANIC] {}", info);
    loop {
        core::hint::spin_loop();
    }
}
