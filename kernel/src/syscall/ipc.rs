//! IPC system calls: `IpcContextCreate`, `IpcContextSend`, and
//! `IpcContextRespond`.
//!
//! A context's stream buffer is a single-consumer ring (see
//! [`crate::ipc::stream_buffer`]): any thread holding the context's handle
//! can `Send` a framed message into it, and the context's own thread drains
//! the ring with `Respond`, handling one message per call in the order it
//! was written. `Send` marshals each `Param` by kind: VALUE travels
//! inline in the header the caller already built, BUFFER bytes are copied
//! out of the caller's address space and appended after the header
//! (shortened silently if the ring can't hold the whole thing), and SHM
//! attaches the named region read-only into the recipient's address space,
//! rewriting the param to the recipient-side handle.

extern crate alloc;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::userspace::{validate_user_buffer, validate_user_ptr_typed};
use super::{SyscallError, SyscallResult};
use crate::handle::object::KernelObject;
use crate::handle::table::HANDLES;
use crate::handle::Handle;
use crate::ipc::context::{self, IpcContext, DEFAULT_STREAM_SIZE};
use crate::ipc::message::{BaseHeader, ParamKind, ResponseHeader, MAX_PARAMS};
use crate::mm::region::MemoryRegion;
use crate::process;

fn region_of(handle: Handle) -> Result<Arc<MemoryRegion>, SyscallError> {
    match HANDLES.lookup(handle).map_err(SyscallError::from)? {
        KernelObject::MemoryRegion(region) => Ok(region),
        _ => Err(SyscallError::InvalidState),
    }
}

/// `IpcContextCreate(size) -> (handle, user-ptr)`. The backing region is
/// also mapped into the caller's own address space so the creator can read
/// straight out of the ring without a syscall round trip; `out_addr_ptr`
/// receives that mapped address.
pub fn sys_ipc_context_create(size_hint: usize, out_addr_ptr: usize) -> SyscallResult {
    let size = if size_hint == 0 { DEFAULT_STREAM_SIZE } else { size_hint };
    if out_addr_ptr != 0 {
        validate_user_ptr_typed::<u64>(out_addr_ptr)?;
    }

    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    let tid = process::get_thread_tid();
    let handle = IpcContext::create(tid, size).map_err(SyscallError::from)?;

    if out_addr_ptr != 0 {
        let ctx = context::lookup(handle).map_err(SyscallError::from)?;
        let region = region_of(ctx.region)?;
        let mapped = region
            .attach(&process.memory_space, true)
            .map_err(SyscallError::from)?;
        unsafe {
            *(out_addr_ptr as *mut u64) = mapped.as_u64();
        }
    }

    Ok(handle.as_u64() as usize)
}

/// `IpcContextSend(handle, header, header_len, timeout_ms)`. `header_ptr`
/// points at a caller-built [`BaseHeader`]; its `Param`s describe what
/// follows. Reserves `sizeof(ResponseHeader) + base.length` bytes in the
/// destination's stream under the MPMC reservation protocol, blocking with
/// `timeout_ms` if the ring is full, then writes the response descriptor,
/// the (param-resolved) base header, and any inlined BUFFER bytes as one
/// packet.
pub fn sys_ipc_context_send(handle: usize, header_ptr: usize, header_len: usize, timeout_ms: usize) -> SyscallResult {
    if header_len != core::mem::size_of::<BaseHeader>() {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_buffer::<u8>(header_ptr, header_len)?;

    // SAFETY: validated above; `BaseHeader` is `repr(C)` and `Copy`.
    let mut header = unsafe { core::ptr::read_unaligned(header_ptr as *const BaseHeader) };
    if header.param_in as usize > MAX_PARAMS {
        return Err(SyscallError::InvalidArgument);
    }

    let ctx = context::lookup(Handle::from_u64(handle as u64)).map_err(SyscallError::from)?;
    let recipient = process::process_of_thread(ctx.creator).ok_or(SyscallError::ResourceNotFound)?;

    let header_size = core::mem::size_of::<BaseHeader>();
    let response_size = core::mem::size_of::<ResponseHeader>();
    let max_inline = ctx.stream.capacity().saturating_sub(response_size + header_size);
    let mut inline_bytes: Vec<u8> = Vec::new();

    for i in 0..header.param_in as usize {
        match header.params[i].kind() {
            Some(ParamKind::Value) => {}
            Some(ParamKind::Buffer) => {
                let user_ptr = header.params[i].value_or_offset as usize;
                let requested = header.params[i].length as usize;
                validate_user_buffer::<u8>(user_ptr, requested)?;
                let take = requested.min(max_inline.saturating_sub(inline_bytes.len()));
                // SAFETY: `validate_user_buffer` just checked `requested`
                // bytes at `user_ptr`; `take <= requested`.
                let src = unsafe { core::slice::from_raw_parts(user_ptr as *const u8, take) };
                header.params[i].value_or_offset = inline_bytes.len() as u64;
                header.params[i].length = take as u32;
                inline_bytes.extend_from_slice(src);
            }
            Some(ParamKind::Shm) => {
                let region = region_of(Handle::from_u64(header.params[i].value_or_offset))?;
                let mapped = region
                    .attach(&recipient.memory_space, false)
                    .map_err(SyscallError::from)?;
                header.params[i].value_or_offset = mapped.as_u64();
            }
            None => return Err(SyscallError::InvalidArgument),
        }
    }

    header.length = (header_size + inline_bytes.len()) as u32;
    let total_len = response_size + header.length as usize;
    let timeout = if timeout_ms == 0 { None } else { Some(timeout_ms as u64) };

    let mut reservation = ctx
        .stream
        .reserve_blocking(total_len, timeout)
        .map_err(SyscallError::from)?;
    let response = ResponseHeader::new(0);
    let buf = reservation.as_mut_slice();
    // SAFETY: `buf` is exactly `total_len` bytes, reserved for this
    // writer alone; both header types are `repr(C)`.
    unsafe {
        core::ptr::write_unaligned(buf.as_mut_ptr() as *mut ResponseHeader, response);
        core::ptr::write_unaligned(buf.as_mut_ptr().add(response_size) as *mut BaseHeader, header);
    }
    if !inline_bytes.is_empty() {
        let start = response_size + header_size;
        buf[start..start + inline_bytes.len()].copy_from_slice(&inline_bytes);
    }
    reservation.commit();
    Ok(total_len)
}

/// `IpcContextRespond(handle, buf, len) -> bytes_read`. Drains up to `len`
/// bytes of the next committed message into the caller's buffer. A context
/// owner calls this in a loop to service requests as they arrive.
pub fn sys_ipc_context_respond(handle: usize, buf_ptr: usize, buf_len: usize) -> SyscallResult {
    if buf_len == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_buffer::<u8>(buf_ptr, buf_len)?;

    let ctx = context::lookup(Handle::from_u64(handle as u64)).map_err(SyscallError::from)?;
    let dst = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, buf_len) };
    let n = ctx.stream.read(dst);
    Ok(n)
}
