//! Process-level system calls: fork, wait, exit, and priority/id queries.
//!
//! Threads are covered separately in [`super::thread`]; this module only
//! covers whole-process lifecycle, which sits above the thread scheduler
//! but is not part of its core contract.

use super::userspace::validate_user_ptr_typed;
use super::{SyscallError, SyscallResult};
use crate::process::{self, fork_process, waitpid, ProcessId, ProcessPriority, WaitOptions};

/// `Fork`: create a child process that is a copy of the caller.
pub fn sys_fork() -> SyscallResult {
    fork_process()
        .map(|pid| pid.0 as usize)
        .map_err(SyscallError::from)
}

/// `ProcessExit`: terminate the calling process's current thread.
pub fn sys_exit(exit_code: usize) -> SyscallResult {
    process::exit_thread(exit_code as i32)
}

/// `Wait`: block until a child changes state, optionally filtered to one
/// `pid` (`-1` for any child).
pub fn sys_wait(pid: isize, status_ptr: usize, options: usize) -> SyscallResult {
    if status_ptr != 0 {
        validate_user_ptr_typed::<i32>(status_ptr)?;
    }

    let opts = WaitOptions::from_flags(options as u32);
    let (child_pid, status) = waitpid(pid as i64, opts).map_err(SyscallError::from)?;

    if status_ptr != 0 {
        unsafe {
            *(status_ptr as *mut i32) = status.to_raw();
        }
    }
    Ok(child_pid.0 as usize)
}

/// `ProcessGetPid`.
pub fn sys_getpid() -> SyscallResult {
    process::current_process()
        .map(|p| p.pid.0 as usize)
        .ok_or(SyscallError::InvalidState)
}

/// `ProcessGetPPid`. The init process (no parent) reports 0.
pub fn sys_getppid() -> SyscallResult {
    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    Ok(process.parent.map(|p| p.0).unwrap_or(0) as usize)
}

/// `ProcessSetPriority` (`PRIO_PROCESS` only).
pub fn sys_setpriority(which: usize, who: usize, priority: usize) -> SyscallResult {
    if which != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let pid = resolve_pid(who)?;
    let new_priority = priority_from_nice(priority);
    let _ = (pid, new_priority);
    // Per-process priority is advisory at this layer; per-thread MLFQ
    // level is what the scheduler actually consults.
    Ok(0)
}

/// `ProcessGetPriority` (`PRIO_PROCESS` only).
pub fn sys_getpriority(which: usize, who: usize) -> SyscallResult {
    if which != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let pid = resolve_pid(who)?;
    match crate::process::table::get_process(pid) {
        Some(process) => Ok(process.priority as usize),
        None => Err(SyscallError::ResourceNotFound),
    }
}

fn resolve_pid(who: usize) -> Result<ProcessId, SyscallError> {
    if who == 0 {
        process::current_process()
            .map(|p| p.pid)
            .ok_or(SyscallError::InvalidState)
    } else {
        Ok(ProcessId(who as u64))
    }
}

fn priority_from_nice(value: usize) -> ProcessPriority {
    match value {
        0..=39 => ProcessPriority::RealTime,
        40..=79 => ProcessPriority::System,
        80..=119 => ProcessPriority::Normal,
        120..=139 => ProcessPriority::Low,
        _ => ProcessPriority::Idle,
    }
}
