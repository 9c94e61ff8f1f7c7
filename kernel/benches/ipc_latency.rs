//! IPC latency benchmark for VeridianOS
//!
//! Measures the baseline latency for inter-process communication

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]

extern crate alloc;

use core::panic::PanicInfo;

use veridian_kernel::{
    bench::{cycles_to_ns, read_timestamp, BenchmarkResult},
    handle::table::HANDLES,
    ipc::context::{self, IpcContext},
    serial_println,
};

const IPC_TARGET_NS: u64 = 5000; // 5μs target
const ITERATIONS: u64 = 1000;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("IPC Latency Benchmark");
    serial_println!("=====================");
    serial_println!(
        "Target: < {} ns ({}μs)",
        IPC_TARGET_NS,
        IPC_TARGET_NS / 1000
    );
    serial_println!();

    let context_result = benchmark_context_create_destroy();
    let roundtrip_result = benchmark_stream_roundtrip();

    serial_println!("\nResults:");
    serial_println!("--------");
    print_result("Context Create/Destroy", &context_result);
    print_result("Stream Round Trip", &roundtrip_result);

    serial_println!("\nTarget Analysis:");
    serial_println!("----------------");
    check_target("Context Create/Destroy", &context_result, IPC_TARGET_NS);
    check_target("Stream Round Trip", &roundtrip_result, IPC_TARGET_NS);

    veridian_kernel::exit_qemu(veridian_kernel::QemuExitCode::Success);
}

fn benchmark_context_create_destroy() -> BenchmarkResult {
    let start = read_timestamp();
    for _ in 0..ITERATIONS {
        if let Ok(handle) = IpcContext::create(1, 4096) {
            let _ = HANDLES.destroy(handle.as_u64());
        }
    }
    let end = read_timestamp();

    let total_cycles = end - start;
    let avg_cycles = total_cycles / ITERATIONS;
    let avg_ns = cycles_to_ns(avg_cycles);

    BenchmarkResult {
        name: alloc::string::String::from("Context Create/Destroy"),
        iterations: ITERATIONS,
        total_time_ns: cycles_to_ns(total_cycles),
        avg_time_ns: avg_ns,
        min_time_ns: avg_ns,
        max_time_ns: avg_ns,
    }
}

fn benchmark_stream_roundtrip() -> BenchmarkResult {
    let handle = match IpcContext::create(1, 4096) {
        Ok(h) => h,
        Err(_) => {
            return BenchmarkResult {
                name: alloc::string::String::from("Stream Round Trip"),
                iterations: 0,
                total_time_ns: 0,
                avg_time_ns: 0,
                min_time_ns: 0,
                max_time_ns: 0,
            }
        }
    };
    let ctx = context::lookup(handle).expect("just created");

    let start = read_timestamp();
    for _ in 0..ITERATIONS {
        if let Ok(mut reservation) = ctx.stream.reserve(8) {
            reservation.as_mut_slice().copy_from_slice(&[0u8; 8]);
            reservation.commit();
            let mut out = [0u8; 8];
            let _ = ctx.stream.read(&mut out);
        }
    }
    let end = read_timestamp();

    let _ = HANDLES.destroy(handle.as_u64());

    let total_cycles = end - start;
    let avg_cycles = total_cycles / ITERATIONS;
    let avg_ns = cycles_to_ns(avg_cycles);

    BenchmarkResult {
        name: alloc::string::String::from("Stream Round Trip"),
        iterations: ITERATIONS,
        total_time_ns: cycles_to_ns(total_cycles),
        avg_time_ns: avg_ns,
        min_time_ns: avg_ns,
        max_time_ns: avg_ns,
    }
}

fn print_result(name: &str, result: &BenchmarkResult) {
    serial_println!(
        "{:<20} Avg: {:>6} ns, Min: {:>6} ns, Max: {:>6} ns",
        name,
        result.avg_time_ns,
        result.min_time_ns,
        result.max_time_ns
    );
}

fn check_target(name: &str, result: &BenchmarkResult, target_ns: u64) {
    if result.meets_target(target_ns) {
        serial_println!(
            "{:<20} PASS ({}ns < {}ns)",
            name,
            result.avg_time_ns,
            target_ns
        );
    } else {
        serial_println!(
            "{:<20} FAIL ({}ns > {}ns)",
            name,
            result.avg_time_ns,
            target_ns
        );
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("Benchmark panic: {}", info);
    veridian_kernel::exit_qemu(veridian_kernel::QemuExitCode::Failed)
}
