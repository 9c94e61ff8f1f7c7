//! System call interface.
//!
//! Each syscall number indexes straight into [`SYSCALL_TABLE`], a fixed
//! array of function pointers built once at link time; the trap handler
//! reads five untyped argument slots out of the faulting frame and hands
//! them to whatever's at that index. After the handler returns, pending
//! signals are delivered to the calling thread before the trap frame is
//! restored, so a syscall can be the point a queued `SIGSEGV` or `SIGTERM`
//! actually takes effect.

#![allow(dead_code)]

pub mod futex;
pub mod handle;
pub mod ipc;
pub mod memory;
pub mod process;
pub mod shm;
pub mod system;
pub mod thread;
pub mod userspace;

use crate::error::KernelError;

/// System call result type: `Ok` carries whatever the call returns packed
/// into a `usize` (a pointer, a count, a handle, or just `0`).
pub type SyscallResult = Result<usize, SyscallError>;

type SyscallFn = fn(usize, usize, usize, usize, usize) -> SyscallResult;

/// Error codes returned to user space, negated into the trap frame's
/// return slot by [`dispatch`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall = -1,
    InvalidArgument = -2,
    PermissionDenied = -3,
    ResourceNotFound = -4,
    OutOfMemory = -5,
    WouldBlock = -6,
    Interrupted = -7,
    /// Caller has no current process/thread context (called from a code
    /// path that never went through `process::init`).
    InvalidState = -8,
    /// Resource busy; distinct from `WouldBlock` for calls that never
    /// block and instead report the conflict synchronously.
    Busy = -9,
    NotSupported = -10,
}

impl From<KernelError> for SyscallError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::InvalidParam { .. } => SyscallError::InvalidArgument,
            KernelError::OutOfMemory { .. } => SyscallError::OutOfMemory,
            KernelError::NotFound { .. } => SyscallError::ResourceNotFound,
            KernelError::Exists { .. } => SyscallError::InvalidArgument,
            KernelError::NotSupported { .. } => SyscallError::NotSupported,
            KernelError::Timeout { .. } => SyscallError::WouldBlock,
            KernelError::Interrupted => SyscallError::Interrupted,
            // Never crosses the syscall boundary; a bug if it does.
            KernelError::Forked => SyscallError::InvalidState,
            KernelError::Busy { .. } => SyscallError::Busy,
            KernelError::Permission { .. } => SyscallError::PermissionDenied,
        }
    }
}

/// System call numbers, grouped by subsystem. Gaps between groups leave
/// room to grow a category without renumbering its neighbors.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    MemoryAllocate = 0,
    MemoryFree = 1,
    MemoryProtect = 2,
    MemoryQuery = 3,

    ShmCreate = 10,
    ShmExport = 11,
    ShmAttach = 12,
    ShmMap = 13,
    ShmCommit = 14,
    ShmUnmap = 15,
    ShmDetach = 16,
    ShmMetrics = 17,

    ThreadCreate = 30,
    ThreadExit = 31,
    ThreadJoin = 32,
    ThreadSignal = 33,
    ThreadSleep = 34,
    ThreadYield = 35,
    ThreadGetId = 36,
    ThreadSetName = 37,
    ThreadGetName = 38,

    FutexWait = 50,
    FutexWake = 51,
    FutexWakeOp = 52,

    IpcContextCreate = 60,
    IpcContextSend = 61,
    IpcContextRespond = 62,

    HandleDestroy = 70,
    HandleLookup = 71,
    HandleSetActivity = 72,
    HandleSetCreate = 73,
    HandleSetControl = 74,
    HandleSetListen = 75,

    SystemQuery = 90,
    SystemTick = 91,
    PerformanceFrequency = 92,
    PerformanceTick = 93,

    Fork = 100,
    ProcessExit = 101,
    Wait = 102,
    GetPid = 103,
    GetPPid = 104,
    SetPriority = 105,
    GetPriority = 106,

    /// Privileged driver interface: interrupt routing, ACPI queries, I/O
    /// space, device load. Left as a stub entry point; the subsystems that
    /// would back it are an out-of-scope collaborator at this layer.
    DriverOp = 120,
}

impl Syscall {
    fn from_number(n: usize) -> Option<Self> {
        use Syscall::*;
        Some(match n {
            0 => MemoryAllocate,
            1 => MemoryFree,
            2 => MemoryProtect,
            3 => MemoryQuery,
            10 => ShmCreate,
            11 => ShmExport,
            12 => ShmAttach,
            13 => ShmMap,
            14 => ShmCommit,
            15 => ShmUnmap,
            16 => ShmDetach,
            17 => ShmMetrics,
            30 => ThreadCreate,
            31 => ThreadExit,
            32 => ThreadJoin,
            33 => ThreadSignal,
            34 => ThreadSleep,
            35 => ThreadYield,
            36 => ThreadGetId,
            37 => ThreadSetName,
            38 => ThreadGetName,
            50 => FutexWait,
            51 => FutexWake,
            52 => FutexWakeOp,
            60 => IpcContextCreate,
            61 => IpcContextSend,
            62 => IpcContextRespond,
            70 => HandleDestroy,
            71 => HandleLookup,
            72 => HandleSetActivity,
            73 => HandleSetCreate,
            74 => HandleSetControl,
            75 => HandleSetListen,
            90 => SystemQuery,
            91 => SystemTick,
            92 => PerformanceFrequency,
            93 => PerformanceTick,
            100 => Fork,
            101 => ProcessExit,
            102 => Wait,
            103 => GetPid,
            104 => GetPPid,
            105 => SetPriority,
            106 => GetPriority,
            120 => DriverOp,
            _ => return None,
        })
    }
}

fn driver_op_stub(_a: usize, _b: usize, _c: usize, _d: usize, _e: usize) -> SyscallResult {
    Err(SyscallError::NotSupported)
}

fn dispatch_table_entry(call: Syscall) -> SyscallFn {
    match call {
        Syscall::MemoryAllocate => |a, b, c, d, _| memory::sys_memory_allocate(a, b, c, d),
        Syscall::MemoryFree => |a, b, _, _, _| memory::sys_memory_free(a, b),
        Syscall::MemoryProtect => |a, b, c, _, _| memory::sys_memory_protect(a, b, c),
        Syscall::MemoryQuery => |a, _, _, _, _| memory::sys_memory_query(a),

        Syscall::ShmCreate => |a, b, _, _, _| shm::sys_shm_create(a, b),
        Syscall::ShmExport => |a, b, c, _, _| shm::sys_shm_export(a, b, c),
        Syscall::ShmAttach => |a, _, _, _, _| shm::sys_shm_attach(a),
        Syscall::ShmMap => |a, b, c, d, _| shm::sys_shm_map(a, b, c, d),
        Syscall::ShmCommit => |a, _, _, _, _| shm::sys_shm_commit(a),
        Syscall::ShmUnmap => |a, b, _, _, _| shm::sys_shm_unmap(a, b),
        Syscall::ShmDetach => |a, _, _, _, _| shm::sys_shm_detach(a),
        Syscall::ShmMetrics => |a, b, _, _, _| shm::sys_shm_metrics(a, b),

        Syscall::ThreadCreate => |a, b, c, d, _| thread::sys_thread_create(a, b, c, d),
        Syscall::ThreadExit => |a, _, _, _, _| thread::sys_thread_exit(a),
        Syscall::ThreadJoin => |a, b, c, _, _| thread::sys_thread_join(a, b, c),
        Syscall::ThreadSignal => |a, b, _, _, _| thread::sys_thread_signal(a, b),
        Syscall::ThreadSleep => |a, _, _, _, _| thread::sys_thread_sleep(a),
        Syscall::ThreadYield => |_, _, _, _, _| thread::sys_thread_yield(),
        Syscall::ThreadGetId => |_, _, _, _, _| thread::sys_thread_get_id(),
        Syscall::ThreadSetName => |a, b, _, _, _| thread::sys_thread_set_name(a, b),
        Syscall::ThreadGetName => |a, b, _, _, _| thread::sys_thread_get_name(a, b),

        Syscall::FutexWait => |a, b, c, d, _| futex::sys_futex_wait(a, b as u32, c, d),
        Syscall::FutexWake => |a, b, c, _, _| futex::sys_futex_wake(a, b, c),
        Syscall::FutexWakeOp => |a, b, c, d, e| futex::sys_futex_wake_op(a, b, c, d, e),

        Syscall::IpcContextCreate => |a, b, _, _, _| ipc::sys_ipc_context_create(a, b),
        Syscall::IpcContextSend => |a, b, c, d, _| ipc::sys_ipc_context_send(a, b, c, d),
        Syscall::IpcContextRespond => |a, b, c, _, _| ipc::sys_ipc_context_respond(a, b, c),

        Syscall::HandleDestroy => |a, _, _, _, _| handle::sys_handle_destroy(a),
        Syscall::HandleLookup => |a, _, _, _, _| handle::sys_handle_lookup(a),
        Syscall::HandleSetActivity => |a, b, _, _, _| handle::sys_handle_set_activity(a, b),
        Syscall::HandleSetCreate => |_, _, _, _, _| handle::sys_handle_set_create(),
        Syscall::HandleSetControl => |a, b, c, d, _| handle::sys_handle_set_control(a, b, c, d),
        Syscall::HandleSetListen => |a, b, _, _, _| handle::sys_handle_set_listen(a, b),

        Syscall::SystemQuery => |a, _, _, _, _| system::sys_system_query(a),
        Syscall::SystemTick => |_, _, _, _, _| system::sys_system_tick(),
        Syscall::PerformanceFrequency => |_, _, _, _, _| system::sys_performance_frequency(),
        Syscall::PerformanceTick => |_, _, _, _, _| system::sys_performance_tick(),

        Syscall::Fork => |_, _, _, _, _| process::sys_fork(),
        Syscall::ProcessExit => |a, _, _, _, _| process::sys_exit(a),
        Syscall::Wait => |a, b, c, _, _| process::sys_wait(a as isize, b, c),
        Syscall::GetPid => |_, _, _, _, _| process::sys_getpid(),
        Syscall::GetPPid => |_, _, _, _, _| process::sys_getppid(),
        Syscall::SetPriority => |a, b, c, _, _| process::sys_setpriority(a, b, c),
        Syscall::GetPriority => |a, b, _, _, _| process::sys_getpriority(a, b),

        Syscall::DriverOp => driver_op_stub,
    }
}

/// Trap handler entry point: reads the syscall number and five argument
/// slots out of the frame the architecture layer built, dispatches, and
/// returns a negative-errno-style value for the frame's return register.
#[no_mangle]
pub extern "C" fn syscall_handler(
    syscall_num: usize,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> isize {
    let result = dispatch(syscall_num, arg1, arg2, arg3, arg4, arg5);
    crate::process::signal::dispatch_pending();
    match result {
        Ok(value) => value as isize,
        Err(error) => error as i32 as isize,
    }
}

fn dispatch(
    syscall_num: usize,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> SyscallResult {
    let call = Syscall::from_number(syscall_num).ok_or(SyscallError::InvalidSyscall)?;
    dispatch_table_entry(call)(arg1, arg2, arg3, arg4, arg5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_number_is_rejected() {
        assert_eq!(Syscall::from_number(9999), None);
    }

    #[test]
    fn driver_op_is_a_stub() {
        assert_eq!(driver_op_stub(0, 0, 0, 0, 0), Err(SyscallError::NotSupported));
    }
}
