//! IPC context lifecycle and stream buffer round-trip tests.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(veridian_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use veridian_kernel::{
    error::KernelError,
    handle::{object::HandleKind, table::HANDLES},
    ipc::context::{self, IpcContext},
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
fn context_create_registers_a_live_handle() -> Result<(), KernelError> {
    let handle = IpcContext::create(7, 4096)?;
    let kind = HANDLES.kind_of(handle)?;
    if kind != HandleKind::IpcContext {
        serial_println!("expected IpcContext, got {:?}", kind);
        return Err(KernelError::InvalidParam {
            name: "kind",
            value: kind as usize,
        });
    }
    HANDLES.destroy(handle.as_u64())?;
    Ok(())
}

#[test_case]
fn stream_write_then_read_round_trips_a_message() -> Result<(), KernelError> {
    let handle = IpcContext::create(7, 4096)?;
    let ctx = context::lookup(handle)?;

    let payload = b"ping";
    let mut reservation = ctx.stream.reserve(payload.len())?;
    reservation.as_mut_slice().copy_from_slice(payload);
    reservation.commit();

    let mut out = [0u8; 4];
    let n = ctx.stream.read(&mut out);
    if n != payload.len() || &out != payload {
        serial_println!("round trip mismatch: n={} out={:?}", n, out);
        return Err(KernelError::InvalidParam {
            name: "stream_read",
            value: n,
        });
    }

    HANDLES.destroy(handle.as_u64())?;
    Ok(())
}

#[test_case]
fn stream_buffer_oversized_reservation_is_rejected() -> Result<(), KernelError> {
    let handle = IpcContext::create(7, 64)?;
    let ctx = context::lookup(handle)?;
    let too_big = ctx.stream.capacity() + 1;

    let result = ctx.stream.reserve(too_big);
    HANDLES.destroy(handle.as_u64())?;

    match result {
        Err(KernelError::InvalidParam { .. }) => Ok(()),
        _ => {
            serial_println!("expected reserve({}) to fail", too_big);
            Err(KernelError::InvalidParam {
                name: "reserve",
                value: too_big,
            })
        }
    }
}

#[test_case]
fn destroying_a_context_frees_its_backing_region() -> Result<(), KernelError> {
    let handle = IpcContext::create(7, 4096)?;
    let region = context::lookup(handle)?.region;

    HANDLES.destroy(handle.as_u64())?;

    // The context's `Drop` impl destroys its region handle; nothing else
    // holds a reference once the context itself is gone.
    match HANDLES.kind_of(region) {
        Err(KernelError::NotFound { .. }) => Ok(()),
        other => {
            serial_println!("expected the region handle to be gone, got {:?}", other);
            Err(KernelError::InvalidParam {
                name: "region",
                value: region.as_u64() as usize,
            })
        }
    }
}

#[test_case]
fn destroyed_context_handle_is_not_found() -> Result<(), KernelError> {
    let handle = IpcContext::create(7, 4096)?;
    HANDLES.destroy(handle.as_u64())?;
    match HANDLES.kind_of(handle) {
        Err(KernelError::NotFound { .. }) => Ok(()),
        other => {
            serial_println!("expected NotFound, got {:?}", other);
            Err(KernelError::InvalidParam {
                name: "handle",
                value: handle.as_u64() as usize,
            })
        }
    }
}
