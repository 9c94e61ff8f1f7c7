//! Scheduler-adjacent blocking primitive tests: futex wake bookkeeping and
//! handle sets, exercised without actually driving the per-CPU run queues
//! (these binaries run their body straight from `_start`, with no
//! scheduler loop behind them to make a blocking wait ever return).

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(veridian_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;
use alloc::sync::Arc;

use veridian_kernel::{
    error::KernelError,
    handle::{
        object::{HandleKind, KernelObject},
        set::{HandleSet, SetOperation},
        table::HANDLES,
    },
    mm::MemoryRegion,
    process::{self, ProcessId},
    sched::FUTEX_TABLE,
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
fn thread_ids_are_allocated_monotonically() -> Result<(), KernelError> {
    let a = process::alloc_tid();
    let b = process::alloc_tid();
    if b <= a {
        serial_println!("tid did not advance: {} -> {}", a, b);
        return Err(KernelError::InvalidParam {
            name: "tid",
            value: b as usize,
        });
    }
    Ok(())
}

#[test_case]
fn futex_wake_with_no_waiters_reports_zero() -> Result<(), KernelError> {
    let woken = FUTEX_TABLE.wake(ProcessId(1), 0xdead_beef, u32::MAX);
    if woken != 0 {
        serial_println!("expected 0 woken, got {}", woken);
        return Err(KernelError::InvalidParam {
            name: "woken",
            value: woken,
        });
    }
    Ok(())
}

#[test_case]
fn handle_set_control_rejects_duplicate_members() -> Result<(), KernelError> {
    let set = HandleSet::new(ProcessId(1));
    let region = MemoryRegion::new(4096, true)?;
    let handle = HANDLES.create(KernelObject::MemoryRegion(Arc::new(region)));

    set.control(SetOperation::Add, handle, 0)?;
    let result = set.control(SetOperation::Add, handle, 0);
    HANDLES.destroy(handle.as_u64())?;

    match result {
        Err(KernelError::Exists { .. }) => Ok(()),
        other => {
            serial_println!("expected Exists, got {:?}", other);
            Err(KernelError::InvalidParam {
                name: "control",
                value: 0,
            })
        }
    }
}

#[test_case]
fn handle_set_listen_returns_immediately_for_an_already_active_member() -> Result<(), KernelError> {
    let set = HandleSet::new(ProcessId(1));
    let region = MemoryRegion::new(4096, true)?;
    let handle = HANDLES.create(KernelObject::MemoryRegion(Arc::new(region)));

    set.control(SetOperation::Add, handle, 99)?;
    // `listen` polls membership activity before ever futex-waiting, so a
    // member marked active up front never blocks this call.
    HANDLES.set_active(handle, true)?;

    let context = set.listen(Some(0))?;
    HANDLES.destroy(handle.as_u64())?;

    if context != 99 {
        serial_println!("expected context 99, got {}", context);
        return Err(KernelError::InvalidParam {
            name: "context",
            value: context as usize,
        });
    }
    Ok(())
}

#[test_case]
fn handle_set_survives_as_its_own_kind() -> Result<(), KernelError> {
    let set = Arc::new(HandleSet::new(ProcessId(1)));
    let handle = HANDLES.create(KernelObject::HandleSet(set));
    let kind = HANDLES.kind_of(handle)?;
    HANDLES.destroy(handle.as_u64())?;

    if kind != HandleKind::HandleSet {
        serial_println!("expected HandleSet, got {:?}", kind);
        return Err(KernelError::InvalidParam {
            name: "kind",
            value: kind as usize,
        });
    }
    Ok(())
}
