//! Handle sets: a `Listen`-able collection of member handles, used to block
//! on whichever of several handles becomes active first, the way an IPC
//! caller waits on a "notify handle" without pinning a single context.

extern crate alloc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::process::ProcessId;
use crate::sched;

use super::table::HANDLES;
use super::Handle;

/// What a `Control` call does to a set's membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    Add,
    Remove,
    Modify,
}

struct Member {
    handle: Handle,
    /// Caller-chosen tag returned by `Listen` so it can tell which member
    /// fired without re-querying activity on all of them.
    context: u64,
}

/// A set of handles a thread can block on collectively. Backed by the same
/// futex wait/wake primitive as `ThreadJoin`, keyed on the set's own
/// `signal` word rather than a per-member address.
///
/// Membership locking is internal (a `Mutex<Vec<Member>>`) rather than
/// wrapping the whole set, so [`listen`](Self::listen) can block without
/// holding a lock that [`notify`](Self::notify) or
/// [`control`](Self::control) would need to make progress.
pub struct HandleSet {
    members: Mutex<Vec<Member>>,
    signal: AtomicU32,
    owner: ProcessId,
}

impl HandleSet {
    pub fn new(owner: ProcessId) -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            signal: AtomicU32::new(0),
            owner,
        }
    }

    fn signal_addr(&self) -> u64 {
        &self.signal as *const AtomicU32 as u64
    }

    /// `Control`: add, remove, or re-tag a member handle.
    pub fn control(&self, op: SetOperation, handle: Handle, context: u64) -> KernelResult<()> {
        let mut members = self.members.lock();
        match op {
            SetOperation::Add => {
                if members.iter().any(|m| m.handle == handle) {
                    return Err(KernelError::Exists {
                        resource: "handle_set_member",
                        id: handle.as_u64(),
                    });
                }
                members.push(Member { handle, context });
                Ok(())
            }
            SetOperation::Remove => {
                let before = members.len();
                members.retain(|m| m.handle != handle);
                if members.len() == before {
                    return Err(KernelError::NotFound {
                        resource: "handle_set_member",
                        id: handle.as_u64(),
                    });
                }
                Ok(())
            }
            SetOperation::Modify => {
                let member = members
                    .iter_mut()
                    .find(|m| m.handle == handle)
                    .ok_or(KernelError::NotFound {
                        resource: "handle_set_member",
                        id: handle.as_u64(),
                    })?;
                member.context = context;
                Ok(())
            }
        }
    }

    /// Find the first active member, returning its caller-chosen context.
    fn poll(&self) -> Option<u64> {
        self.members
            .lock()
            .iter()
            .find(|m| HANDLES.is_active(m.handle).unwrap_or(false))
            .map(|m| m.context)
    }

    /// `Listen`: block until any member handle becomes active, or
    /// `timeout_ms` elapses.
    pub fn listen(&self, timeout_ms: Option<u64>) -> KernelResult<u64> {
        loop {
            if let Some(context) = self.poll() {
                return Ok(context);
            }
            let snapshot = self.signal.load(Ordering::Acquire) as i32;
            match sched::FUTEX_TABLE.wait(
                self.owner,
                self.signal_addr(),
                snapshot,
                || self.signal.load(Ordering::Acquire) as i32,
                timeout_ms,
            ) {
                Ok(()) | Err(KernelError::Interrupted) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Wake any thread parked in [`listen`](Self::listen) so it re-polls
    /// membership activity. Called after [`HANDLES::set_active`] flips a
    /// member handle this set is watching.
    pub fn notify(&self) {
        self.signal.fetch_add(1, Ordering::Release);
        sched::FUTEX_TABLE.wake(self.owner, self.signal_addr(), u32::MAX);
    }
}
