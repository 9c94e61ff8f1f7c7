//! The schedulable thread object: identity, context, and MLFQ scheduling
//! state combined into a single structure (there is no separate "thread"
//! object layered above the scheduler's task — the two are the same
//! entity, per `ipc_context.c`/`Scheduler.c` treating `Thread_t` as both).

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::string::String;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::process::ProcessId;

/// Number of MLFQ priority levels. Queue 0 is highest priority, `SCHED_LEVELS
/// - 1` is the bottom queue new threads start in. Matches
/// `MCORE_SCHEDULER_LEVELS` ("priority 61 is system priority" in the
/// original scheduler).
pub const SCHED_LEVELS: u8 = 61;

/// Base time slice in timer ticks, before the per-level growth term.
pub const INITIAL_TIMESLICE: u32 = 10;

/// How often (in milliseconds) every thread is boosted back to queue 0,
/// preventing starvation of threads stuck at the bottom of the MLFQ.
pub const BOOST_INTERVAL_MS: u64 = 1000;

/// A thread's run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ThreadState {
    /// Newly created, never scheduled.
    New = 0,
    Ready = 1,
    Running = 2,
    /// Blocked on a futex, IPC receive, or wait queue.
    Blocked = 3,
    Sleeping = 4,
    Zombie = 5,
}

impl ThreadState {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => ThreadState::New,
            1 => ThreadState::Ready,
            2 => ThreadState::Running,
            3 => ThreadState::Blocked,
            4 => ThreadState::Sleeping,
            _ => ThreadState::Zombie,
        }
    }
}

/// Thread identifier, unique system-wide.
pub type ThreadId = u64;

/// CPU affinity mask.
#[derive(Debug, Clone, Copy)]
pub struct CpuSet {
    mask: u64,
}

impl CpuSet {
    pub fn all() -> Self {
        Self { mask: !0u64 }
    }

    pub fn single(cpu: u8) -> Self {
        Self { mask: 1u64 << cpu }
    }

    pub fn contains(&self, cpu: u8) -> bool {
        (self.mask & (1u64 << cpu)) != 0
    }

    pub fn add(&mut self, cpu: u8) {
        self.mask |= 1u64 << cpu;
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }
}

impl Default for CpuSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Running totals surfaced for `SYS_THREAD_INFO`/metrics.
#[derive(Debug, Default)]
pub struct TaskStats {
    pub runtime_ticks: AtomicU64,
    pub run_count: AtomicU64,
    pub voluntary_switches: AtomicU64,
    pub involuntary_switches: AtomicU64,
    pub last_run_tick: AtomicU64,
}

/// Architecture-specific saved register state.
#[derive(Debug)]
pub enum TaskContext {
    #[cfg(target_arch = "x86_64")]
    X86_64(crate::arch::x86_64::context::X86_64Context),
    #[cfg(target_arch = "aarch64")]
    AArch64(crate::arch::aarch64::context::AArch64Context),
    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    RiscV(crate::arch::riscv::context::RiscVContext),
}

impl TaskContext {
    #[cfg(target_arch = "x86_64")]
    pub fn new(entry_point: usize, stack_top: usize) -> Self {
        TaskContext::X86_64(crate::arch::x86_64::context::X86_64Context::new(entry_point, stack_top))
    }

    #[cfg(target_arch = "aarch64")]
    pub fn new(entry_point: usize, stack_top: usize) -> Self {
        TaskContext::AArch64(crate::arch::aarch64::context::AArch64Context::new(entry_point, stack_top))
    }

    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    pub fn new(entry_point: usize, stack_top: usize) -> Self {
        TaskContext::RiscV(crate::arch::riscv::context::RiscVContext::new(entry_point, stack_top))
    }

    #[cfg(target_arch = "x86_64")]
    pub fn arch_mut(&mut self) -> &mut crate::arch::x86_64::context::X86_64Context {
        let TaskContext::X86_64(c) = self;
        c
    }

    #[cfg(target_arch = "x86_64")]
    pub fn arch(&self) -> &crate::arch::x86_64::context::X86_64Context {
        let TaskContext::X86_64(c) = self;
        c
    }

    #[cfg(target_arch = "aarch64")]
    pub fn arch_mut(&mut self) -> &mut crate::arch::aarch64::context::AArch64Context {
        let TaskContext::AArch64(c) = self;
        c
    }

    #[cfg(target_arch = "aarch64")]
    pub fn arch(&self) -> &crate::arch::aarch64::context::AArch64Context {
        let TaskContext::AArch64(c) = self;
        c
    }

    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    pub fn arch_mut(&mut self) -> &mut crate::arch::riscv::context::RiscVContext {
        let TaskContext::RiscV(c) = self;
        c
    }

    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    pub fn arch(&self) -> &crate::arch::riscv::context::RiscVContext {
        let TaskContext::RiscV(c) = self;
        c
    }
}

/// Sentinel meaning "not currently queued anywhere" for `current_cpu`.
pub const NO_CPU: u8 = u8::MAX;

/// The thread control block: identity, saved context, and MLFQ state.
pub struct Task {
    pub tid: ThreadId,
    pub pid: ProcessId,
    #[cfg(feature = "alloc")]
    pub name: String,
    state: AtomicU32,
    /// Current MLFQ queue, 0 (highest) ..= `SCHED_LEVELS - 1` (lowest).
    /// New threads start at the bottom queue and are promoted by the
    /// periodic boost, never by yielding early.
    queue: AtomicU8,
    pub time_slice_remaining: AtomicU32,
    pub cpu_affinity: CpuSet,
    current_cpu: AtomicU8,
    pub stats: TaskStats,
    pub context: TaskContext,
    pub kernel_stack_top: usize,
    pub user_stack_top: usize,
    /// Futex key or IPC handle this thread is parked on, for diagnostics.
    pub blocked_on: AtomicU64,
    /// Set to 1 once the thread has exited; `ThreadJoin` futex-waits on
    /// this field's address and is woken by `ThreadExit`.
    pub finished: AtomicU32,
    pub exit_code: AtomicU32,
}

/// Time slice granted at a given MLFQ level: lower (more favored) queues
/// get shorter slices, per the original scheduler's
/// `(Priority * 2) + MCORE_INITIAL_TIMESLICE` growth term.
pub fn timeslice_for_queue(queue: u8) -> u32 {
    (queue as u32) * 2 + INITIAL_TIMESLICE
}

impl Task {
    #[cfg(feature = "alloc")]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tid: ThreadId,
        pid: ProcessId,
        name: String,
        entry_point: usize,
        kernel_stack_top: usize,
    ) -> Self {
        let queue = SCHED_LEVELS - 1;
        Self {
            tid,
            pid,
            name,
            state: AtomicU32::new(ThreadState::New as u32),
            queue: AtomicU8::new(queue),
            time_slice_remaining: AtomicU32::new(timeslice_for_queue(queue)),
            cpu_affinity: CpuSet::default(),
            current_cpu: AtomicU8::new(NO_CPU),
            stats: TaskStats::default(),
            context: TaskContext::new(entry_point, kernel_stack_top),
            kernel_stack_top,
            user_stack_top: 0,
            blocked_on: AtomicU64::new(0),
            finished: AtomicU32::new(0),
            exit_code: AtomicU32::new(0),
        }
    }

    /// Address used as the futex key for `ThreadJoin`/`ThreadExit`.
    pub fn finished_flag_addr(&self) -> u64 {
        &self.finished as *const AtomicU32 as u64
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn queue(&self) -> u8 {
        self.queue.load(Ordering::Acquire)
    }

    /// Move to the bottom of the next-lower queue and refill its slice;
    /// called when a thread exhausts its time slice without blocking.
    pub fn demote(&self) {
        let next = (self.queue().saturating_add(1)).min(SCHED_LEVELS - 1);
        self.queue.store(next, Ordering::Release);
        self.time_slice_remaining
            .store(timeslice_for_queue(next), Ordering::Release);
    }

    /// Reset to the top queue; called by the periodic anti-starvation
    /// boost and on thread creation for interactive workloads that block
    /// quickly (in this implementation: never automatically, only via
    /// `boost_to_top`).
    pub fn boost_to_top(&self) {
        self.queue.store(0, Ordering::Release);
        self.time_slice_remaining
            .store(timeslice_for_queue(0), Ordering::Release);
    }

    pub fn can_run_on(&self, cpu: u8) -> bool {
        self.cpu_affinity.contains(cpu)
    }

    pub fn current_cpu(&self) -> Option<u8> {
        match self.current_cpu.load(Ordering::Acquire) {
            NO_CPU => None,
            cpu => Some(cpu),
        }
    }

    pub fn set_current_cpu(&self, cpu: Option<u8>) {
        self.current_cpu
            .store(cpu.unwrap_or(NO_CPU), Ordering::Release);
    }

    pub fn update_runtime(&self, ticks: u64, now: u64) {
        self.stats.runtime_ticks.fetch_add(ticks, Ordering::Relaxed);
        self.stats.last_run_tick.store(now, Ordering::Relaxed);
    }

    pub fn cpu_affinity_mask(&self) -> u64 {
        self.cpu_affinity.mask()
    }

    pub fn mark_scheduled(&self, voluntary: bool) {
        self.stats.run_count.fetch_add(1, Ordering::Relaxed);
        if voluntary {
            self.stats.voluntary_switches.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.involuntary_switches.fetch_add(1, Ordering::Relaxed);
        }
    }
}
