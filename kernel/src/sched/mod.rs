//! Thread scheduling: the 61-level MLFQ scheduler, the per-CPU core table,
//! and the futex blocking-primitive layer built on top of them.

pub mod futex;
pub mod init;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod smp;
pub mod task;
pub mod task_ptr;

pub use futex::FUTEX_TABLE;
pub use init::{init, init_with_bootstrap};
pub use scheduler::{block_current, current_tid, wake, BlockOutcome, Scheduler};
pub use task::{Task, ThreadId, ThreadState};

use crate::error::KernelResult;

/// Timer-tick entry point, called from each architecture's preemption
/// timer interrupt handler.
pub fn on_tick() {
    let now = crate::arch::timer::get_ticks();
    smp::this_core().scheduler.tick(now, 10);
}

/// Voluntarily give up the remainder of the current time slice.
pub fn yield_now() {
    smp::this_core().scheduler.schedule();
}

/// Spawn `task` onto the least-loaded online CPU within its affinity mask.
pub fn spawn(task: core::ptr::NonNull<task::Task>) -> KernelResult<()> {
    // SAFETY: caller hands over a freshly constructed, uniquely owned task.
    let affinity_mask = unsafe { task.as_ref() }.cpu_affinity_mask();
    let target = smp::find_least_loaded_cpu_with_affinity(affinity_mask);
    smp::core(target).scheduler.admit(task);
    Ok(())
}

/// Enter the idle loop on the current CPU; only ever called by the
/// boot-time idle task.
pub fn run() -> ! {
    loop {
        crate::arch::idle();
    }
}
