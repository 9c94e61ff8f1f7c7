//! Bootstrap module for kernel initialization.
//!
//! Multi-stage init sequence, kept separate from `main.rs` so each
//! architecture's entry point can call `bootstrap::run()` once its own
//! early asm/paging setup (and frame allocator handoff from the
//! bootloader's memory map, via [`crate::mm::bootloader`]) has run.

use crate::{arch, error::KernelResult, ipc, process, sched};

#[cfg(feature = "alloc")]
extern crate alloc;

/// Macro to generate the 6 bootstrap stage tracking functions.
///
/// Each architecture provides its own `$print_fn` macro that accepts a single
/// string literal and outputs it (with a trailing newline) to the
/// architecture's early console. This eliminates the otherwise-identical
/// stage function bodies duplicated across x86_64, AArch64, and RISC-V.
///
/// # Usage
///
/// ```ignore
/// // In arch/<arch>/bootstrap.rs:
/// macro_rules! arch_boot_print {
///     ($s:expr) => { /* arch-specific print */ };
/// }
/// crate::bootstrap::define_bootstrap_stages!(arch_boot_print);
/// ```
#[macro_export]
macro_rules! define_bootstrap_stages {
    ($print_fn:ident) => {
        pub fn stage1_start() {
            $print_fn!("[BOOTSTRAP] Starting multi-stage kernel initialization...");
            $print_fn!("[BOOTSTRAP] Stage 1: Hardware initialization");
        }

        pub fn stage1_complete() {
            $print_fn!("[BOOTSTRAP] Architecture initialized");
        }

        pub fn stage2_start() {
            $print_fn!("[BOOTSTRAP] Stage 2: Memory management");
        }

        pub fn stage2_complete() {
            $print_fn!("[BOOTSTRAP] Memory management initialized");
        }

        pub fn stage3_start() {
            $print_fn!("[BOOTSTRAP] Stage 3: Process management");
        }

        pub fn stage3_complete() {
            $print_fn!("[BOOTSTRAP] Process management initialized");
        }

        pub fn stage4_start() {
            $print_fn!("[BOOTSTRAP] Stage 4: IPC and scheduler");
        }

        pub fn stage4_complete() {
            $print_fn!("[BOOTSTRAP] Scheduler activated - entering main scheduling loop");
        }
    };
}

/// Bootstrap task ID (runs before scheduler is fully initialized).
pub const BOOTSTRAP_PID: u64 = 0;
pub const BOOTSTRAP_TID: u64 = 0;

/// Multi-stage kernel initialization: hardware, address-space engine,
/// process table, IPC, then the scheduler. Each subsystem's own `init`
/// panics on failure since there is no recovery path this early in boot.
pub fn kernel_init() -> KernelResult<()> {
    #[cfg(target_arch = "x86_64")]
    arch::x86_64::bootstrap::stage1_start();
    #[cfg(target_arch = "aarch64")]
    arch::aarch64::bootstrap::stage1_start();
    #[cfg(target_arch = "riscv64")]
    arch::riscv64::bootstrap::stage1_start();

    arch::init();

    #[cfg(target_arch = "x86_64")]
    arch::x86_64::bootstrap::stage1_complete();
    #[cfg(target_arch = "aarch64")]
    arch::aarch64::bootstrap::stage1_complete();
    #[cfg(target_arch = "riscv64")]
    arch::riscv64::bootstrap::stage1_complete();

    // Stage 2: the frame allocator is seeded from the architecture's own
    // entry point, which is where the bootloader's memory map is
    // available (see `mm::bootloader::process_memory_map`); by the time
    // `kernel_init` runs it is ready for `process::init`'s address-space
    // allocation.
    #[cfg(target_arch = "x86_64")]
    arch::x86_64::bootstrap::stage2_start();
    #[cfg(target_arch = "aarch64")]
    arch::aarch64::bootstrap::stage2_start();
    #[cfg(target_arch = "riscv64")]
    arch::riscv64::bootstrap::stage2_start();

    #[cfg(target_arch = "x86_64")]
    arch::x86_64::bootstrap::stage2_complete();
    #[cfg(target_arch = "aarch64")]
    arch::aarch64::bootstrap::stage2_complete();
    #[cfg(target_arch = "riscv64")]
    arch::riscv64::bootstrap::stage2_complete();

    // Stage 3: process table and the init process's PCB.
    #[cfg(target_arch = "x86_64")]
    arch::x86_64::bootstrap::stage3_start();
    #[cfg(target_arch = "aarch64")]
    arch::aarch64::bootstrap::stage3_start();
    #[cfg(target_arch = "riscv64")]
    arch::riscv64::bootstrap::stage3_start();

    process::init();

    #[cfg(target_arch = "x86_64")]
    arch::x86_64::bootstrap::stage3_complete();
    #[cfg(target_arch = "aarch64")]
    arch::aarch64::bootstrap::stage3_complete();
    #[cfg(target_arch = "riscv64")]
    arch::riscv64::bootstrap::stage3_complete();

    // Stage 4: IPC handle/object plumbing, then the scheduler.
    #[cfg(target_arch = "x86_64")]
    arch::x86_64::bootstrap::stage4_start();
    #[cfg(target_arch = "aarch64")]
    arch::aarch64::bootstrap::stage4_start();
    #[cfg(target_arch = "riscv64")]
    arch::riscv64::bootstrap::stage4_start();

    ipc::init();
    sched::init();

    #[cfg(target_arch = "x86_64")]
    arch::x86_64::bootstrap::stage4_complete();
    #[cfg(target_arch = "aarch64")]
    arch::aarch64::bootstrap::stage4_complete();
    #[cfg(target_arch = "riscv64")]
    arch::riscv64::bootstrap::stage4_complete();

    Ok(())
}

/// Run the bootstrap sequence, then hand off to the scheduler. Never
/// returns: `sched::run()` is the kernel's idle loop once the ready queue
/// has at least one runnable task.
pub fn run() -> ! {
    if let Err(e) = kernel_init() {
        // Panic is intentional: kernel_init failure during boot is
        // unrecoverable. No subsystems are available for graceful error
        // handling at this point.
        panic!("Bootstrap failed: {:?}", e);
    }

    println!("[BOOTSTRAP] Boot sequence complete, entering scheduler");
    sched::run();
}
