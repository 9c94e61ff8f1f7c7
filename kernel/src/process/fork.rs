//! Process forking.
//!
//! Clones the calling process's address space and current thread into a
//! new child process. Uses a full copy of the address space rather than
//! copy-on-write; see `VirtualAddressSpace::fork_copy`.

extern crate alloc;
use alloc::format;
use alloc::string::String;

use crate::error::{KernelError, KernelResult};

use super::pcb::{ProcessBuilder, ProcessState};
use super::{table, ProcessId};

/// `Fork`: create a child process that is a copy of the caller, with a
/// single thread resuming at the caller's current instruction, returning
/// `0` there. The parent sees the child's pid as this call's return value.
pub fn fork_process() -> KernelResult<ProcessId> {
    let current_process = super::current_process().ok_or(KernelError::NotFound {
        resource: "process",
        id: 0,
    })?;
    let current_thread = super::current_thread().ok_or(KernelError::NotFound {
        resource: "thread",
        id: 0,
    })?;
    // SAFETY: the running thread's task pointer is always valid while it
    // executes this syscall.
    let parent_task = unsafe { current_thread.as_ref() };

    let new_process = ProcessBuilder::new(format!("{}-fork", current_process.name))
        .parent(current_process.pid)
        .priority(current_process.priority)
        .build()?;
    let new_pid = new_process.pid;

    current_process.memory_space.fork_copy(&new_process.memory_space)?;

    let new_thread = super::thread::spawn_forked(new_pid, String::from("main"), parent_task.context.arch())?;
    new_process
        .add_thread(new_thread)
        .map_err(|_| KernelError::Busy {
            resource: "process thread table",
        })?;

    current_process.add_child(new_pid);
    table::add_process(new_process)?;

    if let Some(process) = table::get_process(new_pid) {
        process.set_state(ProcessState::Ready);
    }

    Ok(new_pid)
}
