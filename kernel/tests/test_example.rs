//! A small smoke-test binary exercising the handle table and IPC stream
//! buffer end to end, separate from the larger suites.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(veridian_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use veridian_kernel::{
    error::KernelError,
    handle::{object::KernelObject, table::HANDLES},
    mm::MemoryRegion,
};

#[test_case]
fn basic_arithmetic_holds() -> Result<(), KernelError> {
    let result = 2 + 2;
    if result != 4 {
        return Err(KernelError::InvalidParam {
            name: "result",
            value: result,
        });
    }
    Ok(())
}

#[test_case]
fn memory_region_reports_its_page_count() -> Result<(), KernelError> {
    let region = MemoryRegion::new(4096 * 3, true)?;
    if region.page_count() != 3 {
        return Err(KernelError::InvalidParam {
            name: "page_count",
            value: region.page_count(),
        });
    }
    Ok(())
}

#[test_case]
fn handle_table_round_trips_a_memory_region() -> Result<(), KernelError> {
    let region = MemoryRegion::new(4096, true)?;
    let handle = HANDLES.create(KernelObject::MemoryRegion(alloc::sync::Arc::new(region)));
    let looked_up = HANDLES.lookup(handle)?;
    let ok = matches!(looked_up, KernelObject::MemoryRegion(_));
    HANDLES.destroy(handle.as_u64())?;
    if !ok {
        return Err(KernelError::InvalidParam {
            name: "kind",
            value: 0,
        });
    }
    Ok(())
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    veridian_kernel::serial_println!("\n=== Running smoke tests ===\n");
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    veridian_kernel::test_panic_handler(info)
}
