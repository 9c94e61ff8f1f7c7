//! Minimal POSIX-style signal delivery: a 64-bit pending mask per process,
//! consulted after syscall return and by the page-fault handler's
//! fault-to-signal path.

pub const SIGHUP: u8 = 1;
pub const SIGINT: u8 = 2;
pub const SIGILL: u8 = 4;
pub const SIGABRT: u8 = 6;
pub const SIGFPE: u8 = 8;
pub const SIGKILL: u8 = 9;
pub const SIGSEGV: u8 = 11;
pub const SIGPIPE: u8 = 13;
pub const SIGALRM: u8 = 14;
pub const SIGTERM: u8 = 15;
pub const SIGCHLD: u8 = 17;
pub const SIGCONT: u8 = 18;
pub const SIGSTOP: u8 = 19;

/// Queue `signum` for delivery to `pid`. Returns `false` if the process no
/// longer exists.
pub fn raise(pid: super::ProcessId, signum: u8) -> bool {
    match super::table::get_process(pid) {
        Some(process) => {
            process.raise_signal(signum);
            true
        }
        None => false,
    }
}

/// Deliver whatever is pending to the calling thread's process, running the
/// default (terminating) disposition for the handful of signals this
/// kernel slice implements. User-installed handlers are out of scope here.
pub fn dispatch_pending() {
    let Some(process) = super::current_process() else {
        return;
    };
    let Some(signum) = process.take_pending_signal() else {
        return;
    };
    match signum {
        SIGKILL | SIGSEGV | SIGILL | SIGABRT | SIGFPE | SIGTERM => {
            process.set_exit_code(128 + signum as i32);
            process.set_state(super::pcb::ProcessState::Zombie);
            super::exit_thread(128 + signum as i32);
        }
        SIGCHLD | SIGCONT => {}
        _ => {}
    }
}
