//! MLFQ ready queues and the timed-sleep queue.

extern crate alloc;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ptr::NonNull;

use super::task::{Task, SCHED_LEVELS};
use super::task_ptr::TaskPtr;

const MAX_TASKS_PER_QUEUE: usize = 256;

/// Fixed-capacity circular buffer backing a single MLFQ level.
#[derive(Clone, Copy)]
struct LevelQueue {
    tasks: [Option<TaskPtr>; MAX_TASKS_PER_QUEUE],
    head: usize,
    tail: usize,
    count: usize,
}

impl LevelQueue {
    const fn new() -> Self {
        Self {
            tasks: [None; MAX_TASKS_PER_QUEUE],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, task: NonNull<Task>) -> bool {
        if self.count == MAX_TASKS_PER_QUEUE {
            return false;
        }
        self.tasks[self.tail] = Some(TaskPtr::new(task));
        self.tail = (self.tail + 1) % MAX_TASKS_PER_QUEUE;
        self.count += 1;
        true
    }

    fn pop(&mut self) -> Option<NonNull<Task>> {
        if self.count == 0 {
            return None;
        }
        let task = self.tasks[self.head].take();
        self.head = (self.head + 1) % MAX_TASKS_PER_QUEUE;
        self.count -= 1;
        task.map(|t| t.as_ptr())
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// One MLFQ instance: `SCHED_LEVELS` priority levels, strict priority
/// between levels and round-robin within a level.
pub struct MlfqQueues {
    levels: [LevelQueue; SCHED_LEVELS as usize],
    total: usize,
}

impl MlfqQueues {
    pub const fn new() -> Self {
        Self {
            levels: [LevelQueue::new(); SCHED_LEVELS as usize],
            total: 0,
        }
    }

    pub fn enqueue(&mut self, task: NonNull<Task>, queue: u8) -> bool {
        let ok = self.levels[queue as usize].push(task);
        if ok {
            self.total += 1;
        }
        ok
    }

    /// Dequeue the highest-priority runnable task (lowest queue index).
    pub fn dequeue(&mut self) -> Option<NonNull<Task>> {
        for level in self.levels.iter_mut() {
            if let Some(task) = level.pop() {
                self.total -= 1;
                return Some(task);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn len(&self) -> usize {
        self.total
    }
}

impl Default for MlfqQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Threads parked until a deadline (timed futex waits, `nanosleep`),
/// bucketed by wakeup tick.
pub struct SleepQueue {
    by_deadline: BTreeMap<u64, Vec<TaskPtr>>,
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self {
            by_deadline: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, deadline_tick: u64, task: NonNull<Task>) {
        self.by_deadline
            .entry(deadline_tick)
            .or_default()
            .push(TaskPtr::new(task));
    }

    /// Remove and return every thread whose deadline has elapsed by `now`.
    pub fn expire(&mut self, now: u64) -> Vec<NonNull<Task>> {
        let due: Vec<u64> = self
            .by_deadline
            .range(..=now)
            .map(|(&tick, _)| tick)
            .collect();
        let mut woken = Vec::new();
        for tick in due {
            if let Some(tasks) = self.by_deadline.remove(&tick) {
                woken.extend(tasks.into_iter().map(|t| t.as_ptr()));
            }
        }
        woken
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}
