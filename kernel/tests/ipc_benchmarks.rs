//! IPC performance checks: measures stream buffer and context churn cost
//! with the kernel's own cycle-counter benchmark runner, rather than just
//! asserting correctness like `ipc_integration_tests`.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(veridian_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use veridian_kernel::{
    error::KernelError,
    handle::table::HANDLES,
    ipc::context::IpcContext,
    serial_println,
    test_framework::BenchmarkRunner,
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    veridian_kernel::test_panic_handler(info)
}

#[test_case]
fn context_create_destroy_churn() -> Result<(), KernelError> {
    let runner = BenchmarkRunner::new();
    let result = runner.run_benchmark("ipc_context_create_destroy", || {
        if let Ok(handle) = IpcContext::create(1, 4096) {
            let _ = HANDLES.destroy(handle.as_u64());
        }
    });
    serial_println!(
        "ipc_context_create_destroy: avg {} ns (min {} ns, max {} ns)",
        result.avg_time_ns,
        result.min_time_ns,
        result.max_time_ns
    );
    Ok(())
}

#[test_case]
fn stream_buffer_reserve_commit_read_cycle() -> Result<(), KernelError> {
    let handle = IpcContext::create(1, 4096)?;
    let ctx = veridian_kernel::ipc::context::lookup(handle)?;

    let runner = BenchmarkRunner::new();
    let result = runner.run_benchmark("ipc_stream_reserve_commit_read", || {
        if let Ok(mut reservation) = ctx.stream.reserve(8) {
            reservation.as_mut_slice().copy_from_slice(&[0u8; 8]);
            reservation.commit();
            let mut out = [0u8; 8];
            let _ = ctx.stream.read(&mut out);
        }
    });
    serial_println!(
        "ipc_stream_reserve_commit_read: avg {} ns (min {} ns, max {} ns)",
        result.avg_time_ns,
        result.min_time_ns,
        result.max_time_ns
    );

    HANDLES.destroy(handle.as_u64())?;
    Ok(())
}
