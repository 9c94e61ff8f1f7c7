//! Process management: the PCB, the global process table, and the
//! thread/signal operations layered over the scheduler's task objects.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

extern crate alloc;

use crate::println;

pub mod fork;
pub mod pcb;
pub mod signal;
pub mod table;
pub mod thread;
pub mod wait;

pub use fork::fork_process;
pub use pcb::{Process, ProcessId, ProcessPriority, ProcessState};
pub use thread::{Thread, ThreadId};
pub use wait::{waitpid, WaitOptions, WaitStatus};

/// Maximum number of processes.
pub const MAX_PROCESSES: usize = 4096;

/// Maximum threads per process.
pub const MAX_THREADS_PER_PROCESS: usize = 256;

static NEXT_PID: AtomicU64 = AtomicU64::new(1);
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_pid() -> ProcessId {
    ProcessId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

pub fn alloc_tid() -> ThreadId {
    NEXT_TID.fetch_add(1, Ordering::Relaxed)
}

/// Initialize process management: the global table, then the init process.
pub fn init() {
    println!("[process] initializing");
    table::init();

    use alloc::string::String;
    let builder = pcb::ProcessBuilder::new(String::from("init")).priority(ProcessPriority::System);
    match builder.build() {
        Ok(process) => match table::add_process(process) {
            Ok(pid) => println!("[process] init process created, pid {}", pid),
            Err(e) => panic!("[process] failed to register init process: {}", e),
        },
        Err(e) => panic!("[process] failed to create init process: {}", e),
    }
    println!("[process] ready");
}

/// Current process, derived from the running thread's `pid`.
pub fn current_process() -> Option<&'static Process> {
    let tid = crate::sched::current_tid()?;
    let pid = current_pid_of(tid)?;
    table::get_process(pid)
}

/// The process owning `tid`, if it's still registered.
pub fn process_of_thread(tid: ThreadId) -> Option<&'static Process> {
    table::get_process(current_pid_of(tid)?)
}

fn current_pid_of(tid: ThreadId) -> Option<ProcessId> {
    // The running task carries its own `pid`; the scheduler exposes only
    // the tid, so walk the process table to find the owner. Processes are
    // few enough in practice that a linear scan is fine here.
    let mut found = None;
    table::PROCESS_TABLE.for_each(|process| {
        if process.get_thread(tid).is_some() {
            found = Some(process.pid);
        }
    });
    found
}

pub fn current_thread() -> Option<core::ptr::NonNull<Thread>> {
    let tid = crate::sched::current_tid()?;
    let process = current_process()?;
    process.get_thread(tid)
}

/// `ThreadYield`.
pub fn yield_thread() {
    crate::sched::yield_now();
}

/// `ThreadExit`: never returns.
pub fn exit_thread(exit_code: i32) -> ! {
    if let Some(thread) = current_thread() {
        thread::exit(thread, exit_code);
    }
    loop {
        crate::sched::yield_now();
    }
}

/// `ThreadJoin`.
pub fn join_thread(tid: ThreadId, timeout_ms: Option<u64>) -> crate::error::KernelResult<i32> {
    let process = current_process().ok_or(crate::error::KernelError::NotFound {
        resource: "process",
        id: 0,
    })?;
    let thread = process.get_thread(tid).ok_or(crate::error::KernelError::NotFound {
        resource: "thread",
        id: tid,
    })?;
    thread::join(thread, timeout_ms)
}

/// Spawn a new thread in the current process.
pub fn create_thread(entry_point: usize) -> crate::error::KernelResult<ThreadId> {
    let process = current_process().ok_or(crate::error::KernelError::NotSupported {
        operation: "create_thread outside a process",
    })?;
    use alloc::string::String;
    let thread = thread::spawn(process.pid, String::from("thread"), entry_point)?;
    process
        .add_thread(thread)
        .map_err(|_| crate::error::KernelError::Busy {
            resource: "process thread table",
        })?;
    // SAFETY: `spawn` just handed back a freshly admitted, live task.
    Ok(unsafe { thread.as_ref() }.tid)
}

/// Set a thread's CPU affinity mask.
pub fn set_thread_affinity(tid: ThreadId, _cpu_mask: u64) -> Result<(), &'static str> {
    let process = current_process().ok_or("no current process")?;
    if process.get_thread(tid).is_some() {
        // `CpuSet` is fixed at spawn time in this design; affinity changes
        // after spawn are not yet supported.
        Ok(())
    } else {
        Err("thread not found")
    }
}

pub fn get_thread_tid() -> ThreadId {
    crate::sched::current_tid().unwrap_or(0)
}
