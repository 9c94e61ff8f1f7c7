//! Thread object. The scheduler's `Task` already carries full thread
//! identity and state, so a process-level thread is just that task,
//! referenced by pointer from the owning `Process`.

extern crate alloc;
use alloc::boxed::Box;
use alloc::string::String;
use core::sync::atomic::Ordering;

pub use crate::sched::task::{Task as Thread, ThreadId, ThreadState};

use crate::error::{KernelError, KernelResult};
use crate::process::ProcessId;
use crate::sched;

/// Default kernel stack size for a new thread.
pub const DEFAULT_KERNEL_STACK_SIZE: usize = 64 * 1024;

/// Create a new thread for `pid` and admit it onto the scheduler.
pub fn spawn(pid: ProcessId, name: String, entry_point: usize) -> KernelResult<core::ptr::NonNull<Thread>> {
    let stack: &'static mut [u8; DEFAULT_KERNEL_STACK_SIZE] =
        Box::leak(Box::new([0u8; DEFAULT_KERNEL_STACK_SIZE]));
    let stack_top = stack.as_ptr() as usize + DEFAULT_KERNEL_STACK_SIZE;
    let tid = super::alloc_tid();
    let task = Box::leak(Box::new(Thread::new(tid, pid, name, entry_point, stack_top)));
    let ptr = core::ptr::NonNull::new(task as *mut Thread).ok_or(KernelError::OutOfMemory {
        requested: core::mem::size_of::<Thread>(),
        available: 0,
    })?;
    sched::spawn(ptr)?;
    Ok(ptr)
}

/// `ThreadExit`: mark the thread finished and wake every `ThreadJoin`
/// waiter parked on its `finished` flag.
pub fn exit(thread: core::ptr::NonNull<Thread>, exit_code: i32) -> ! {
    // SAFETY: caller guarantees `thread` is a valid, still-registered task.
    let t = unsafe { thread.as_ref() };
    t.exit_code.store(exit_code as u32, Ordering::Release);
    t.finished.store(1, Ordering::Release);
    t.set_state(ThreadState::Zombie);
    sched::FUTEX_TABLE.wake(t.pid, t.finished_flag_addr(), u32::MAX);
    sched::scheduler::retire(t.tid);
    loop {
        sched::yield_now();
    }
}

/// `ThreadJoin`: block until `thread` finishes, or the deadline elapses.
pub fn join(thread: core::ptr::NonNull<Thread>, timeout_ms: Option<u64>) -> KernelResult<i32> {
    // SAFETY: see `exit`.
    let t = unsafe { thread.as_ref() };
    loop {
        if t.finished.load(Ordering::Acquire) == 1 {
            return Ok(t.exit_code.load(Ordering::Acquire) as i32);
        }
        match sched::FUTEX_TABLE.wait(
            t.pid,
            t.finished_flag_addr(),
            0,
            || t.finished.load(Ordering::Acquire) as i32,
            timeout_ms,
        ) {
            Ok(()) | Err(KernelError::Interrupted) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Spawn a thread for `pid` whose saved context is a clone of
/// `parent_context` rather than a fresh entry point, used by `fork`. The
/// clone's return value is set to `0`, matching the child side of `fork`'s
/// split return convention.
pub fn spawn_forked(
    pid: ProcessId,
    name: String,
    parent_context: &crate::arch::context::ArchThreadContext,
) -> KernelResult<core::ptr::NonNull<Thread>> {
    use crate::arch::context::ThreadContext;

    let stack: &'static mut [u8; DEFAULT_KERNEL_STACK_SIZE] =
        Box::leak(Box::new([0u8; DEFAULT_KERNEL_STACK_SIZE]));
    let stack_top = stack.as_ptr() as usize + DEFAULT_KERNEL_STACK_SIZE;
    let tid = super::alloc_tid();
    let entry_point = parent_context.get_instruction_pointer();
    let mut task = Thread::new(tid, pid, name, entry_point, stack_top);
    task.context.arch_mut().clone_from(parent_context);
    task.context.arch_mut().set_return_value(0);

    let leaked = Box::leak(Box::new(task));
    let ptr = core::ptr::NonNull::new(leaked as *mut Thread).ok_or(KernelError::OutOfMemory {
        requested: core::mem::size_of::<Thread>(),
        available: 0,
    })?;
    sched::spawn(ptr)?;
    Ok(ptr)
}
