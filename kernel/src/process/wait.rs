//! `waitpid`-style semantics for parents collecting exited children.

extern crate alloc;

use crate::error::{KernelError, KernelResult};

use super::pcb::ProcessState;
use super::ProcessId;

/// Options controlling `waitpid` behavior, modeled after POSIX flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions {
    flags: u32,
}

impl WaitOptions {
    pub const WNOHANG: u32 = 1;
    pub const WUNTRACED: u32 = 2;
    pub const WCONTINUED: u32 = 8;

    pub fn from_flags(flags: u32) -> Self {
        Self { flags }
    }

    pub fn is_nohang(&self) -> bool {
        self.flags & Self::WNOHANG != 0
    }

    pub fn is_untraced(&self) -> bool {
        self.flags & Self::WUNTRACED != 0
    }

    pub fn is_continued(&self) -> bool {
        self.flags & Self::WCONTINUED != 0
    }
}

/// How a child changed state, returned by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
    Continued,
}

impl WaitStatus {
    /// Encode as a raw `i32` matching POSIX `wstatus` layout.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Exited(code) => (code & 0xFF) << 8,
            Self::Signaled(sig) => sig & 0x7F,
            Self::Stopped(sig) => 0x7F | (sig << 8),
            Self::Continued => 0xFFFF_u16 as i32,
        }
    }
}

/// `Wait`: wait for a child to change state.
///
/// - `pid > 0`: wait for that specific child.
/// - `pid <= 0`: wait for any child.
pub fn waitpid(pid: i64, options: WaitOptions) -> KernelResult<(ProcessId, WaitStatus)> {
    let current = super::current_process().ok_or(KernelError::NotFound {
        resource: "process",
        id: 0,
    })?;
    let parent_pid = current.pid;
    let target: Option<ProcessId> = if pid > 0 { Some(ProcessId(pid as u64)) } else { None };

    loop {
        let children = current.children();
        if children.is_empty() {
            return Err(KernelError::NotFound {
                resource: "child process",
                id: 0,
            });
        }

        let mut target_exists = false;
        for child_pid in &children {
            if let Some(t) = target {
                if *child_pid != t {
                    continue;
                }
            }
            target_exists = true;

            if let Some(child) = super::table::get_process(*child_pid) {
                let state = child.get_state();
                if state == ProcessState::Zombie {
                    let status = WaitStatus::Exited(child.get_exit_code());
                    collect_zombie(*child_pid, parent_pid);
                    return Ok((*child_pid, status));
                }
                if options.is_untraced() && state == ProcessState::Blocked {
                    return Ok((*child_pid, WaitStatus::Stopped(19)));
                }
                if options.is_continued() && matches!(state, ProcessState::Running | ProcessState::Ready) {
                    return Ok((*child_pid, WaitStatus::Continued));
                }
            }
        }

        if let Some(t) = target {
            if !target_exists {
                return Err(KernelError::NotFound {
                    resource: "child process",
                    id: t.0,
                });
            }
        }

        if options.is_nohang() {
            return Err(KernelError::Timeout {
                operation: "waitpid",
                duration_ms: 0,
            });
        }

        crate::sched::yield_now();
    }
}

/// Remove a reaped child from its parent's children list and the process
/// table.
fn collect_zombie(child_pid: ProcessId, parent_pid: ProcessId) {
    if let Some(parent) = super::table::get_process(parent_pid) {
        parent.remove_child(child_pid);
    }
    super::table::remove_process(child_pid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_status_encodes_per_posix() {
        assert_eq!(WaitStatus::Exited(42).to_raw(), 42 << 8);
        assert_eq!(WaitStatus::Signaled(11).to_raw(), 11);
        assert_eq!(WaitStatus::Stopped(19).to_raw(), 0x7F | (19 << 8));
        assert_eq!(WaitStatus::Continued.to_raw(), 0xFFFF_u16 as i32);
    }

    #[test]
    fn wait_options_parse_flags() {
        let opts = WaitOptions::from_flags(WaitOptions::WNOHANG | WaitOptions::WUNTRACED);
        assert!(opts.is_nohang());
        assert!(opts.is_untraced());
        assert!(!opts.is_continued());
    }
}
