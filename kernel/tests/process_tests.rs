//! Process control block and table tests.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(veridian_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;
use alloc::string::String;

use veridian_kernel::{
    error::KernelError,
    process::{
        pcb::{ProcessBuilder, ProcessPriority, ProcessState},
        table,
    },
    serial_println,
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
fn fresh_process_starts_in_creating_state() -> Result<(), KernelError> {
    let process = ProcessBuilder::new(String::from("test-creating"))
        .priority(ProcessPriority::Normal)
        .build()?;

    let state = process.get_state();
    if state != ProcessState::Creating {
        serial_println!("expected Creating, got {:?}", state);
        return Err(KernelError::InvalidParam {
            name: "state",
            value: state as usize,
        });
    }
    Ok(())
}

#[test_case]
fn table_round_trips_a_process_by_pid() -> Result<(), KernelError> {
    let process = ProcessBuilder::new(String::from("test-roundtrip"))
        .priority(ProcessPriority::Low)
        .build()?;
    let pid = process.pid;

    table::add_process(process)?;
    let found = table::get_process(pid).ok_or(KernelError::NotFound {
        resource: "process",
        id: pid.0,
    })?;

    if found.name != "test-roundtrip" || found.priority != ProcessPriority::Low {
        serial_println!(
            "table entry mismatch: name={} priority={:?}",
            found.name,
            found.priority
        );
        return Err(KernelError::InvalidParam {
            name: "process",
            value: pid.0 as usize,
        });
    }
    Ok(())
}

#[test_case]
fn duplicate_pid_registration_is_rejected() -> Result<(), KernelError> {
    let process = ProcessBuilder::new(String::from("test-dup")).build()?;
    let pid = process.pid;
    let dup = veridian_kernel::process::pcb::Process::new(
        pid,
        None,
        String::from("test-dup-2"),
        ProcessPriority::Normal,
    )?;

    table::add_process(process)?;
    let result = table::add_process(dup);

    match result {
        Err(KernelError::Exists { .. }) => Ok(()),
        other => {
            serial_println!("expected Exists, got {:?}", other);
            Err(KernelError::InvalidParam {
                name: "add_process",
                value: pid.0 as usize,
            })
        }
    }
}

#[test_case]
fn pending_signals_are_queued_and_taken_in_order() -> Result<(), KernelError> {
    let process = ProcessBuilder::new(String::from("test-signals")).build()?;

    process.raise_signal(5);
    process.raise_signal(2);
    process.raise_signal(9);

    let first = process.take_pending_signal();
    let second = process.take_pending_signal();
    let third = process.take_pending_signal();
    let fourth = process.take_pending_signal();

    if (first, second, third, fourth) != (Some(2), Some(5), Some(9), None) {
        serial_println!(
            "unexpected signal order: {:?} {:?} {:?} {:?}",
            first,
            second,
            third,
            fourth
        );
        return Err(KernelError::InvalidParam {
            name: "pending_signal",
            value: 0,
        });
    }
    Ok(())
}
