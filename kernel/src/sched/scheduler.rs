//! MLFQ scheduling: pick-next, time-slice accounting, the periodic
//! anti-starvation boost, and the block/wake primitives the futex and IPC
//! layers build on.

extern crate alloc;
use alloc::collections::BTreeMap;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

use super::metrics::SchedulerMetrics;
use super::queue::{MlfqQueues, SleepQueue};
use super::task::{Task, ThreadId, ThreadState};
use super::task_ptr::TaskPtr;

/// Why a blocked thread resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Woken,
    TimedOut,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum WakeReason {
    Pending = 0,
    Woken = 1,
    TimedOut = 2,
    Interrupted = 3,
}

/// Per-thread wake-reason slot, read by `block_current` once it resumes.
static WAKE_REASONS: Mutex<BTreeMap<ThreadId, AtomicU32>> = Mutex::new(BTreeMap::new());

lazy_static! {
    /// Every live thread, for O(log n) lookup by id from `wake`/`block_current`.
    static ref THREAD_REGISTRY: Mutex<BTreeMap<ThreadId, TaskPtr>> = Mutex::new(BTreeMap::new());
}

/// Per-CPU scheduler state: its MLFQ ready queues, the thread it is
/// currently running, and its sleep queue for timed waits.
pub struct Scheduler {
    ready: Mutex<MlfqQueues>,
    sleeping: Mutex<SleepQueue>,
    current: Mutex<Option<TaskPtr>>,
    idle: Mutex<Option<TaskPtr>>,
    last_boost_tick: AtomicU64,
    preemption_enabled: AtomicBool,
    pub metrics: SchedulerMetrics,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            ready: Mutex::new(MlfqQueues::new()),
            sleeping: Mutex::new(SleepQueue::new()),
            current: Mutex::new(None),
            idle: Mutex::new(None),
            last_boost_tick: AtomicU64::new(0),
            preemption_enabled: AtomicBool::new(true),
            metrics: SchedulerMetrics::new(),
        }
    }

    pub fn set_idle(&self, task: NonNull<Task>) {
        *self.idle.lock() = Some(TaskPtr::new(task));
    }

    /// Register a freshly created thread as runnable.
    pub fn admit(&self, task: NonNull<Task>) {
        // SAFETY: caller guarantees `task` stays valid while registered.
        let queue = unsafe { task.as_ref().queue() };
        unsafe { task.as_ref().set_state(ThreadState::Ready) };
        self.ready.lock().enqueue(task, queue);
        let tid = unsafe { task.as_ref().tid };
        THREAD_REGISTRY.lock().insert(tid, TaskPtr::new(task));
        WAKE_REASONS
            .lock()
            .insert(tid, AtomicU32::new(WakeReason::Pending as u32));
    }

    /// Pick the next runnable thread, falling back to the idle task.
    fn pick_next(&self) -> Option<NonNull<Task>> {
        self.ready
            .lock()
            .dequeue()
            .or_else(|| self.idle.lock().map(|t| t.as_ptr()))
    }

    /// Run one scheduling decision: wake any expired sleepers, requeue the
    /// outgoing thread if it is still runnable, and switch to whichever
    /// thread is picked next. Returns without switching if the next pick
    /// is the same thread already running.
    pub fn schedule(&self) {
        self.wake_expired_sleepers();

        let outgoing = self.current.lock().take();
        if let Some(out) = outgoing {
            // SAFETY: pointer came from `THREAD_REGISTRY`/`current`, both
            // only ever hold pointers to live, pinned `Task`s.
            let task = unsafe { out.as_ptr().as_ref() };
            if task.state() == ThreadState::Running {
                task.set_state(ThreadState::Ready);
                self.ready.lock().enqueue(out.as_ptr(), task.queue());
            }
        }

        let Some(mut next) = self.pick_next() else {
            return;
        };
        if Some(next) == outgoing.map(|o| o.as_ptr()) {
            // Nothing else runnable; keep running the same thread.
            // SAFETY: see above.
            unsafe { next.as_ref() }.set_state(ThreadState::Running);
            *self.current.lock() = Some(TaskPtr::new(next));
            return;
        }

        // SAFETY: see above.
        let task = unsafe { next.as_ref() };
        task.set_state(ThreadState::Running);
        task.set_current_cpu(Some(super::smp::current_cpu_id()));
        task.mark_scheduled(true);
        *self.current.lock() = Some(TaskPtr::new(next));

        if let Some(out) = outgoing {
            // SAFETY: both pointers reference live, pinned `Task`s for the
            // duration of the switch; interrupts are assumed disabled by
            // the timer/trap entry calling into `schedule`.
            unsafe {
                let mut old_ptr = out.as_ptr();
                let old_ctx = old_ptr.as_mut().context.arch_mut();
                let new_ctx = next.as_ref().context.arch();
                crate::arch::context::switch_context(old_ctx, new_ctx);
            }
        }
    }

    /// Timer-tick entry point: decrement the running thread's slice,
    /// demote it on exhaustion, and apply the anti-starvation boost every
    /// `BOOST_INTERVAL_MS`.
    pub fn tick(&self, now_tick: u64, tick_ms: u64) {
        if now_tick.saturating_sub(self.last_boost_tick.load(Ordering::Acquire)) * tick_ms
            >= super::task::BOOST_INTERVAL_MS
        {
            self.boost_all();
            self.last_boost_tick.store(now_tick, Ordering::Release);
        }

        let current = *self.current.lock();
        if let Some(ptr) = current {
            // SAFETY: see `schedule`.
            let task = unsafe { ptr.as_ptr().as_ref() };
            task.update_runtime(1, now_tick);
            let remaining = task.time_slice_remaining.fetch_sub(1, Ordering::AcqRel);
            if remaining <= 1 {
                task.demote();
                self.schedule();
            }
        }
    }

    fn boost_all(&self) {
        let mut ready = self.ready.lock();
        let mut boosted = alloc::vec::Vec::new();
        while let Some(ptr) = ready.dequeue() {
            boosted.push(ptr);
        }
        for ptr in boosted {
            // SAFETY: see `schedule`.
            let task = unsafe { ptr.as_ref() };
            task.boost_to_top();
            ready.enqueue(ptr, task.queue());
        }
    }

    fn wake_expired_sleepers(&self) {
        let now = crate::arch::timer::get_ticks();
        let expired = self.sleeping.lock().expire(now);
        for ptr in expired {
            // SAFETY: see `schedule`.
            let task = unsafe { ptr.as_ref() };
            set_wake_reason(task.tid, WakeReason::TimedOut);
            task.set_state(ThreadState::Ready);
            task.boost_to_top();
            self.ready.lock().enqueue(ptr, task.queue());
        }
    }

    pub fn current_tid(&self) -> Option<ThreadId> {
        // SAFETY: see `schedule`.
        self.current.lock().map(|t| unsafe { t.as_ptr().as_ref().tid })
    }

    pub fn sleep_until(&self, task: NonNull<Task>, deadline_tick: u64) {
        self.sleeping.lock().insert(deadline_tick, task);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn set_wake_reason(tid: ThreadId, reason: WakeReason) {
    if let Some(slot) = WAKE_REASONS.lock().get(&tid) {
        slot.store(reason as u32, Ordering::Release);
    }
}

fn take_wake_reason(tid: ThreadId) -> WakeReason {
    match WAKE_REASONS.lock().get(&tid) {
        Some(slot) => match slot.swap(WakeReason::Pending as u32, Ordering::AcqRel) {
            1 => WakeReason::Woken,
            2 => WakeReason::TimedOut,
            3 => WakeReason::Interrupted,
            _ => WakeReason::Pending,
        },
        None => WakeReason::Pending,
    }
}

/// The id of the thread running on the current CPU, if the scheduler has
/// started.
pub fn current_tid() -> Option<ThreadId> {
    super::smp::this_core().scheduler.current_tid()
}

/// Block the calling thread, optionally until `timeout_ms` elapses.
/// Returns once woken, timed out, or (in the error-path case) interrupted.
pub fn block_current(timeout_ms: Option<u64>) -> BlockOutcome {
    let core = super::smp::this_core();
    let tid = core.scheduler.current_tid();

    if let (Some(tid), Some(ms)) = (tid, timeout_ms) {
        let ticks_per_ms = crate::arch::timer::ticks_per_ms().max(1);
        let deadline = crate::arch::timer::get_ticks() + ms * ticks_per_ms;
        if let Some(ptr) = THREAD_REGISTRY.lock().get(&tid).copied() {
            core.scheduler.sleep_until(ptr.as_ptr(), deadline);
        }
    }

    core.scheduler.schedule();

    match tid.map(take_wake_reason) {
        Some(WakeReason::TimedOut) => BlockOutcome::TimedOut,
        Some(WakeReason::Interrupted) => BlockOutcome::Interrupted,
        _ => BlockOutcome::Woken,
    }
}

/// Wake the thread `tid` if it is currently blocked or sleeping.
pub fn wake(tid: ThreadId) {
    let Some(ptr) = THREAD_REGISTRY.lock().get(&tid).copied() else {
        return;
    };
    // SAFETY: registry only ever holds pointers to live, pinned `Task`s.
    let task = unsafe { ptr.as_ptr().as_ref() };
    if task.state() != ThreadState::Blocked && task.state() != ThreadState::Sleeping {
        return;
    }
    set_wake_reason(tid, WakeReason::Woken);
    task.set_state(ThreadState::Ready);
    task.boost_to_top();
    super::smp::this_core().scheduler.ready.lock().enqueue(ptr.as_ptr(), task.queue());
}

/// Remove a thread from the registry and wake queues on exit.
pub fn retire(tid: ThreadId) {
    THREAD_REGISTRY.lock().remove(&tid);
    WAKE_REASONS.lock().remove(&tid);
}
