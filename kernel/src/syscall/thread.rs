//! Thread system calls: create, exit, join, signal, sleep, yield, and the
//! id/name accessors.

extern crate alloc;
use alloc::string::String;

use super::userspace::{validate_user_buffer, validate_user_ptr_typed};
use super::{SyscallError, SyscallResult};
use crate::process::{self, signal, ThreadId};

/// `ThreadCreate(name, entry, arg, flags)`. `name`, `arg`, and `flags` are
/// accepted for ABI compatibility but not yet threaded through to the
/// scheduler's task object; only `entry` selects where the new thread
/// starts running.
pub fn sys_thread_create(entry: usize, _arg: usize, _flags: usize, _name_ptr: usize) -> SyscallResult {
    if entry == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    process::create_thread(entry)
        .map(|tid| tid as usize)
        .map_err(SyscallError::from)
}

/// `ThreadExit`: never returns.
pub fn sys_thread_exit(exit_code: usize) -> SyscallResult {
    process::exit_thread(exit_code as i32)
}

/// `ThreadJoin`: block until `tid` finishes, with an optional millisecond
/// timeout (`0` means wait forever).
pub fn sys_thread_join(tid: usize, timeout_ms: usize, retval_ptr: usize) -> SyscallResult {
    if retval_ptr != 0 {
        validate_user_ptr_typed::<i32>(retval_ptr)?;
    }
    let timeout = if timeout_ms == 0 { None } else { Some(timeout_ms as u64) };
    let exit_code = process::join_thread(tid as ThreadId, timeout).map_err(SyscallError::from)?;
    if retval_ptr != 0 {
        unsafe {
            *(retval_ptr as *mut i32) = exit_code;
        }
    }
    Ok(0)
}

/// `ThreadSignal`: queue a signal for delivery to another thread's
/// process. Signals are process-wide in this kernel slice; `tid` is
/// accepted for ABI compatibility and resolved back to its owning
/// process.
pub fn sys_thread_signal(tid: usize, signum: usize) -> SyscallResult {
    if signum == 0 || signum > 63 {
        return Err(SyscallError::InvalidArgument);
    }
    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    if process.get_thread(tid as ThreadId).is_none() {
        return Err(SyscallError::ResourceNotFound);
    }
    if signal::raise(process.pid, signum as u8) {
        Ok(0)
    } else {
        Err(SyscallError::ResourceNotFound)
    }
}

/// `ThreadSleep`: block the calling thread for `millis` milliseconds.
pub fn sys_thread_sleep(millis: usize) -> SyscallResult {
    crate::sched::block_current(Some(millis as u64));
    Ok(0)
}

/// `ThreadYield`.
pub fn sys_thread_yield() -> SyscallResult {
    process::yield_thread();
    Ok(0)
}

/// `ThreadGetId`.
pub fn sys_thread_get_id() -> SyscallResult {
    Ok(process::get_thread_tid() as usize)
}

/// `ThreadSetName`: copies up to 31 bytes plus a NUL terminator from
/// `name_ptr` and stores it as the thread's scheduler-visible name.
pub fn sys_thread_set_name(name_ptr: usize, name_len: usize) -> SyscallResult {
    const MAX_NAME: usize = 32;
    if name_len == 0 || name_len >= MAX_NAME {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_buffer::<u8>(name_ptr, name_len)?;

    let bytes = unsafe { core::slice::from_raw_parts(name_ptr as *const u8, name_len) };
    let name = core::str::from_utf8(bytes)
        .map(String::from)
        .map_err(|_| SyscallError::InvalidArgument)?;

    let mut thread = process::current_thread().ok_or(SyscallError::InvalidState)?;
    unsafe {
        thread.as_mut().name = name;
    }
    Ok(0)
}

/// `ThreadGetName`: writes up to `buf_len` bytes (NUL-terminated) of the
/// current thread's name into `buf_ptr`, returning the full name length.
pub fn sys_thread_get_name(buf_ptr: usize, buf_len: usize) -> SyscallResult {
    if buf_len == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_buffer::<u8>(buf_ptr, buf_len)?;

    let thread = process::current_thread().ok_or(SyscallError::InvalidState)?;
    let name = unsafe { &thread.as_ref().name };
    let copy_len = core::cmp::min(name.len(), buf_len - 1);
    unsafe {
        let dst = core::slice::from_raw_parts_mut(buf_ptr as *mut u8, buf_len);
        dst[..copy_len].copy_from_slice(&name.as_bytes()[..copy_len]);
        dst[copy_len] = 0;
    }
    Ok(name.len())
}
