//! Process Control Block (PCB).
//!
//! The PCB owns a process's address space, handle table, and thread list.
//! Threads are scheduler [`Task`](crate::sched::task::Task)s; the PCB only
//! keeps pointers to the ones it owns, since the scheduler's per-CPU core
//! tables are the threads' real home.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use core::ptr::NonNull;

extern crate alloc;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::handle::table::HandleTable;
use crate::mm::{SpaceFlags, VirtualAddressSpace};

use super::thread::{Thread, ThreadId};

/// Process ID type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Creating = 0,
    Ready = 1,
    Running = 2,
    Blocked = 3,
    Sleeping = 4,
    Zombie = 5,
    Dead = 6,
}

/// Process scheduling priority class, independent of per-thread MLFQ level.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessPriority {
    RealTime = 0,
    System = 1,
    Normal = 2,
    Low = 3,
    Idle = 4,
}

/// Process Control Block.
pub struct Process {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub name: String,
    state: AtomicU32,
    pub priority: ProcessPriority,
    pub memory_space: VirtualAddressSpace,
    /// Handles this process has created or been granted: address spaces,
    /// memory regions, threads, IPC contexts, handle sets.
    pub handles: HandleTable,
    threads: Mutex<BTreeMap<ThreadId, NonNull<Thread>>>,
    children: Mutex<Vec<ProcessId>>,
    exit_code: AtomicU32,
    cpu_time: AtomicU64,
    /// Bitmask of pending signal numbers (bit `n` set means signal `n` is
    /// queued), consulted by [`super::signal`].
    pending_signals: AtomicU64,
    pub memory_stats: MemoryStats,
    pub created_at: u64,
    pub uid: u32,
    pub gid: u32,
}

// SAFETY: the raw `NonNull<Thread>` pointers in `threads` reference tasks
// owned by the scheduler's own pinned allocations (see `TaskPtr`); the PCB
// only ever dereferences them through the scheduler's synchronized state.
unsafe impl Send for Process {}
unsafe impl Sync for Process {}

/// Memory usage statistics, updated by the address-space engine.
#[derive(Debug, Default)]
pub struct MemoryStats {
    pub virtual_size: AtomicU64,
    pub resident_size: AtomicU64,
    pub shared_size: AtomicU64,
}

impl Process {
    pub fn new(
        pid: ProcessId,
        parent: Option<ProcessId>,
        name: String,
        priority: ProcessPriority,
    ) -> crate::error::KernelResult<Self> {
        let flags = if parent.is_none() {
            SpaceFlags::KERNEL
        } else {
            SpaceFlags::APPLICATION
        };
        Ok(Self {
            pid,
            parent,
            name,
            state: AtomicU32::new(ProcessState::Creating as u32),
            priority,
            memory_space: VirtualAddressSpace::new(flags)?,
            handles: HandleTable::new(),
            threads: Mutex::new(BTreeMap::new()),
            children: Mutex::new(Vec::new()),
            exit_code: AtomicU32::new(0),
            cpu_time: AtomicU64::new(0),
            pending_signals: AtomicU64::new(0),
            memory_stats: MemoryStats::default(),
            created_at: crate::arch::timer::get_ticks(),
            uid: 0,
            gid: 0,
        })
    }

    pub fn get_state(&self) -> ProcessState {
        match self.state.load(Ordering::Acquire) {
            0 => ProcessState::Creating,
            1 => ProcessState::Ready,
            2 => ProcessState::Running,
            3 => ProcessState::Blocked,
            4 => ProcessState::Sleeping,
            5 => ProcessState::Zombie,
            _ => ProcessState::Dead,
        }
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn add_thread(&self, thread: NonNull<Thread>) -> Result<(), &'static str> {
        // SAFETY: caller hands us a live task pointer it just spawned.
        let tid = unsafe { thread.as_ref() }.tid;
        let mut threads = self.threads.lock();
        if threads.len() >= super::MAX_THREADS_PER_PROCESS {
            return Err("too many threads in process");
        }
        if threads.contains_key(&tid) {
            return Err("thread id already exists");
        }
        threads.insert(tid, thread);
        Ok(())
    }

    pub fn remove_thread(&self, tid: ThreadId) -> Option<NonNull<Thread>> {
        self.threads.lock().remove(&tid)
    }

    pub fn get_thread(&self, tid: ThreadId) -> Option<NonNull<Thread>> {
        self.threads.lock().get(&tid).copied()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn add_child(&self, pid: ProcessId) {
        self.children.lock().push(pid);
    }

    pub fn children(&self) -> Vec<ProcessId> {
        self.children.lock().clone()
    }

    pub fn remove_child(&self, pid: ProcessId) {
        self.children.lock().retain(|&p| p != pid);
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.get_state(), ProcessState::Dead | ProcessState::Zombie)
    }

    pub fn add_cpu_time(&self, microseconds: u64) {
        self.cpu_time.fetch_add(microseconds, Ordering::Relaxed);
    }

    pub fn get_cpu_time(&self) -> u64 {
        self.cpu_time.load(Ordering::Relaxed)
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code as u32, Ordering::Release);
    }

    pub fn get_exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire) as i32
    }

    pub fn raise_signal(&self, signum: u8) {
        self.pending_signals.fetch_or(1u64 << (signum & 63), Ordering::AcqRel);
    }

    /// Take the lowest-numbered pending signal, if any, clearing it.
    pub fn take_pending_signal(&self) -> Option<u8> {
        loop {
            let bits = self.pending_signals.load(Ordering::Acquire);
            if bits == 0 {
                return None;
            }
            let signum = bits.trailing_zeros() as u8;
            let cleared = bits & !(1u64 << signum);
            if self
                .pending_signals
                .compare_exchange(bits, cleared, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(signum);
            }
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        crate::println!("[process] {} dropped", self.pid);
    }
}

/// Convenience builder for [`Process::new`].
pub struct ProcessBuilder {
    name: String,
    parent: Option<ProcessId>,
    priority: ProcessPriority,
    uid: u32,
    gid: u32,
}

impl ProcessBuilder {
    pub fn new(name: String) -> Self {
        Self {
            name,
            parent: None,
            priority: ProcessPriority::Normal,
            uid: 0,
            gid: 0,
        }
    }

    pub fn parent(mut self, pid: ProcessId) -> Self {
        self.parent = Some(pid);
        self
    }

    pub fn priority(mut self, priority: ProcessPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    pub fn build(self) -> crate::error::KernelResult<Process> {
        let pid = super::alloc_pid();
        let mut process = Process::new(pid, self.parent, self.name, self.priority)?;
        process.uid = self.uid;
        process.gid = self.gid;
        Ok(process)
    }
}
