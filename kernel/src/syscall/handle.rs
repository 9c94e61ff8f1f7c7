//! Handle system calls: `HandleDestroy`, `HandleLookup`, `HandleSetActivity`,
//! and the handle-set trio `Create`/`Control`/`Listen`.
//!
//! Handles themselves are minted by the subsystem that creates the object
//! behind them (`IpcContext::create`, [`super::shm`]'s region wrapping,
//! and so on) rather than by a freestanding "allocate empty handle" call,
//! so there is no `sys_handle_create` here — only the operations generic
//! enough to apply to any handle kind.

extern crate alloc;
use alloc::sync::Arc;

use super::{SyscallError, SyscallResult};
use crate::handle::object::KernelObject;
use crate::handle::set::SetOperation;
use crate::handle::table::HANDLES;
use crate::handle::{Handle, HandleSet};
use crate::process;

/// `HandleDestroy(handle)`.
pub fn sys_handle_destroy(raw: usize) -> SyscallResult {
    HANDLES.destroy(raw as u64).map_err(SyscallError::from)?;
    Ok(0)
}

/// `HandleLookup(handle) -> kind`. Reports the object's type tag; full
/// object access only ever happens through the syscall that understands
/// that kind (`ipc`, `shm`, `thread`, ...), never generically here.
pub fn sys_handle_lookup(raw: usize) -> SyscallResult {
    let handle = Handle::from_u64(raw as u64);
    let kind = HANDLES.kind_of(handle).map_err(SyscallError::from)?;
    Ok(kind as usize)
}

/// `HandleSetActivity(handle, active)`.
pub fn sys_handle_set_activity(raw: usize, active: usize) -> SyscallResult {
    let handle = Handle::from_u64(raw as u64);
    HANDLES
        .set_active(handle, active != 0)
        .map_err(SyscallError::from)?;
    Ok(0)
}

fn set_operation_from(op: usize) -> Result<SetOperation, SyscallError> {
    match op {
        0 => Ok(SetOperation::Add),
        1 => Ok(SetOperation::Remove),
        2 => Ok(SetOperation::Modify),
        _ => Err(SyscallError::InvalidArgument),
    }
}

fn lookup_set(raw: usize) -> Result<Arc<HandleSet>, SyscallError> {
    let handle = Handle::from_u64(raw as u64);
    match HANDLES.lookup(handle).map_err(SyscallError::from)? {
        KernelObject::HandleSet(set) => Ok(set),
        _ => Err(SyscallError::InvalidArgument),
    }
}

/// `HandleSetCreate() -> handle`.
pub fn sys_handle_set_create() -> SyscallResult {
    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    let set = HandleSet::new(process.pid);
    let handle = HANDLES.create(KernelObject::HandleSet(Arc::new(set)));
    Ok(handle.as_u64() as usize)
}

/// `HandleSetControl(set, op, member, context)`.
pub fn sys_handle_set_control(
    set_handle: usize,
    op: usize,
    member_handle: usize,
    context: usize,
) -> SyscallResult {
    let set = lookup_set(set_handle)?;
    let operation = set_operation_from(op)?;
    let member = Handle::from_u64(member_handle as u64);
    set.control(operation, member, context as u64)
        .map_err(SyscallError::from)?;
    Ok(0)
}

/// `HandleSetListen(set, timeout_ms) -> context`. Blocks until any member
/// handle is marked active via `HandleSetActivity`, or the timeout elapses.
pub fn sys_handle_set_listen(set_handle: usize, timeout_ms: usize) -> SyscallResult {
    let set = lookup_set(set_handle)?;
    let timeout = if timeout_ms == 0 { None } else { Some(timeout_ms as u64) };
    let context = set.listen(timeout).map_err(SyscallError::from)?;
    Ok(context as usize)
}
