//! Futex wait/wake queues.
//!
//! A fixed 64-bucket hash table of waiter lists keyed by `(scope, address)`,
//! grounded on `futex.c`'s `FUTEX_HASHTABLE_CAPACITY` and its
//! `GetIntegerHash` splitmix64-style mixer. `scope` is the caller's
//! `ProcessId` for a PRIVATE futex (address is process-local, virtual) or
//! `ProcessId(0)` for a SHARED one (address is the backing physical frame,
//! global across processes) — callers resolve which before reaching this
//! table; it only ever sees the already-resolved key.

extern crate alloc;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::process::ProcessId;

use super::scheduler;
use super::task::ThreadId;

/// Number of hash buckets; matches `futex.c`'s `FUTEX_HASHTABLE_CAPACITY`.
pub const FUTEX_HASHTABLE_CAPACITY: usize = 64;

/// `GetIntegerHash`: splitmix64 finalizer used to spread futex keys.
fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

fn key_of(scope: ProcessId, addr: u64) -> u64 {
    scope.0.rotate_left(32) ^ addr
}

fn bucket_index(scope: ProcessId, addr: u64) -> usize {
    (mix64(key_of(scope, addr)) as usize) & (FUTEX_HASHTABLE_CAPACITY - 1)
}

#[derive(Clone, Copy)]
struct Waiter {
    tid: ThreadId,
    scope: ProcessId,
    addr: u64,
}

/// Bitwise op a `WakeOp` applies to the secondary address, matching
/// `futex.c`'s `FUTEX_OP_*` encoding (teacher's `syscall/futex.rs`
/// `FUTEX_OP_MASK`/`FUTEX_CMP_MASK` bit layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexOp {
    Set,
    Add,
    Or,
    Andn,
    Xor,
}

impl FutexOp {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FutexOp::Set),
            1 => Some(FutexOp::Add),
            2 => Some(FutexOp::Or),
            3 => Some(FutexOp::Andn),
            4 => Some(FutexOp::Xor),
            _ => None,
        }
    }

    pub fn apply(self, cur: u32, arg: u32) -> u32 {
        match self {
            FutexOp::Set => arg,
            FutexOp::Add => cur.wrapping_add(arg),
            FutexOp::Or => cur | arg,
            FutexOp::Andn => cur & !arg,
            FutexOp::Xor => cur ^ arg,
        }
    }
}

/// Comparison predicate a `WakeOp` evaluates against the primary address's
/// prior value to decide whether the secondary wake happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexCmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FutexCmp {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FutexCmp::Eq),
            1 => Some(FutexCmp::Ne),
            2 => Some(FutexCmp::Lt),
            3 => Some(FutexCmp::Le),
            4 => Some(FutexCmp::Gt),
            5 => Some(FutexCmp::Ge),
            _ => None,
        }
    }

    pub fn holds(self, lhs: i32, rhs: i32) -> bool {
        match self {
            FutexCmp::Eq => lhs == rhs,
            FutexCmp::Ne => lhs != rhs,
            FutexCmp::Lt => lhs < rhs,
            FutexCmp::Le => lhs <= rhs,
            FutexCmp::Gt => lhs > rhs,
            FutexCmp::Ge => lhs >= rhs,
        }
    }
}

/// Global futex wait-queue table.
pub struct FutexTable {
    buckets: [Mutex<Vec<Waiter>>; FUTEX_HASHTABLE_CAPACITY],
}

impl FutexTable {
    fn new() -> Self {
        Self {
            buckets: core::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }

    /// `FutexWait`, step 2-3 of the wait/wake algorithm: under the bucket
    /// lock, re-read the watched word via `read_current` and compare
    /// against `expected` before enqueuing. Re-reading here rather than
    /// trusting a value the caller read before taking the lock is what
    /// closes the race against a concurrent `Wake`: either this re-read
    /// observes the waker's write and we return without blocking, or it
    /// doesn't and the waker's own bucket-lock acquisition in `wake` is
    /// serialized after our enqueue, so it finds and wakes us.
    pub fn wait<F>(&self, scope: ProcessId, addr: u64, expected: i32, read_current: F, timeout_ms: Option<u64>) -> KernelResult<()>
    where
        F: FnOnce() -> i32,
    {
        let tid = scheduler::current_tid().ok_or(KernelError::NotSupported {
            operation: "futex wait before scheduler init",
        })?;
        let idx = bucket_index(scope, addr);
        {
            let mut bucket = self.buckets[idx].lock();
            if read_current() != expected {
                return Err(KernelError::Interrupted);
            }
            bucket.push(Waiter { tid, scope, addr });
        }

        match scheduler::block_current(timeout_ms) {
            scheduler::BlockOutcome::Woken => Ok(()),
            scheduler::BlockOutcome::TimedOut => {
                self.remove_waiter(idx, tid);
                Err(KernelError::Timeout {
                    operation: "futex wait",
                    duration_ms: timeout_ms.unwrap_or(0),
                })
            }
            scheduler::BlockOutcome::Interrupted => {
                self.remove_waiter(idx, tid);
                Err(KernelError::Interrupted)
            }
        }
    }

    fn remove_waiter(&self, idx: usize, tid: ThreadId) {
        self.buckets[idx].lock().retain(|w| w.tid != tid);
    }

    /// `FutexWake`: wake up to `max_wake` threads parked on
    /// `(scope, addr)`, returning how many were actually woken.
    pub fn wake(&self, scope: ProcessId, addr: u64, max_wake: u32) -> usize {
        let idx = bucket_index(scope, addr);
        let mut bucket = self.buckets[idx].lock();
        let mut woken = 0usize;
        bucket.retain(|w| {
            if woken >= max_wake as usize || w.scope != scope || w.addr != addr {
                return true;
            }
            scheduler::wake(w.tid);
            woken += 1;
            false
        });
        woken
    }

    /// `WakeOp`: wake up to `count` waiters on `(scope, addr)`, and — if
    /// `secondary_wake` is true (the caller has already evaluated the
    /// comparison predicate over `addr`'s prior value) — also wake up to
    /// `count2` waiters on `(scope, addr2)`. The op itself (SET/ADD/OR/
    /// ANDN/XOR applied to `*addr2`) is performed by the caller before this
    /// is reached, since it touches raw user memory this table has no
    /// business dereferencing.
    pub fn wake_op(&self, scope: ProcessId, addr: u64, count: u32, addr2: u64, count2: u32, secondary_wake: bool) -> (usize, usize) {
        let woken = self.wake(scope, addr, count);
        let woken2 = if secondary_wake { self.wake(scope, addr2, count2) } else { 0 };
        (woken, woken2)
    }
}

lazy_static! {
    /// The system-wide futex table.
    pub static ref FUTEX_TABLE: FutexTable = FutexTable::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_index_is_stable_and_in_range() {
        let pid = ProcessId(7);
        let a = bucket_index(pid, 0x1000);
        let b = bucket_index(pid, 0x1000);
        assert_eq!(a, b);
        assert!(a < FUTEX_HASHTABLE_CAPACITY);
    }

    #[test]
    fn mismatched_expected_value_is_interrupted() {
        let table = FutexTable::new();
        let err = table.wait(ProcessId(1), 0x2000, 6, || 5, None).unwrap_err();
        assert_eq!(err, KernelError::Interrupted);
    }

    #[test]
    fn wake_op_always_wakes_primary_and_conditionally_secondary() {
        let table = FutexTable::new();
        let (primary, secondary) = table.wake_op(ProcessId(1), 0x1000, 1, 0x2000, 1, false);
        assert_eq!((primary, secondary), (0, 0));
        let (primary, secondary) = table.wake_op(ProcessId(1), 0x1000, 1, 0x2000, 1, true);
        assert_eq!((primary, secondary), (0, 0));
    }

    #[test]
    fn futex_op_apply_matches_bit_encoding() {
        assert_eq!(FutexOp::Set.apply(5, 9), 9);
        assert_eq!(FutexOp::Add.apply(5, 9), 14);
        assert_eq!(FutexOp::Or.apply(0b0100, 0b0001), 0b0101);
        assert_eq!(FutexOp::Andn.apply(0b0111, 0b0001), 0b0110);
        assert_eq!(FutexOp::Xor.apply(0b0110, 0b0011), 0b0101);
    }

    #[test]
    fn futex_cmp_holds_matches_predicates() {
        assert!(FutexCmp::Eq.holds(4, 4));
        assert!(FutexCmp::Ne.holds(4, 5));
        assert!(FutexCmp::Lt.holds(3, 4));
        assert!(FutexCmp::Le.holds(4, 4));
        assert!(FutexCmp::Gt.holds(5, 4));
        assert!(FutexCmp::Ge.holds(4, 4));
    }
}
