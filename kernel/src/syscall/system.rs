//! System information and timing queries: `SystemQuery`, `SystemTime`/
//! `Tick`, `PerformanceFrequency`/`Tick`.

use super::userspace::validate_user_ptr_typed;
use super::{SyscallError, SyscallResult};

/// Snapshot returned by `SystemQuery`, matching what a user-space `uname`
/// or system-info call wants: core count and page size are the only
/// values this kernel slice tracks that are useful to report.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SystemInfo {
    pub num_cpus: u32,
    pub page_size: u32,
    pub uptime_ticks: u64,
}

/// `SystemQuery`: fill a user-supplied [`SystemInfo`].
pub fn sys_system_query(info_ptr: usize) -> SyscallResult {
    validate_user_ptr_typed::<SystemInfo>(info_ptr)?;

    let num_cpus = (0..crate::sched::smp::MAX_CPUS as u8)
        .filter(|&id| crate::sched::smp::per_cpu(id).is_some())
        .count();
    let info = SystemInfo {
        num_cpus: num_cpus as u32,
        page_size: crate::mm::PAGE_SIZE as u32,
        uptime_ticks: crate::arch::timer::get_ticks(),
    };
    unsafe {
        *(info_ptr as *mut SystemInfo) = info;
    }
    Ok(core::mem::size_of::<SystemInfo>())
}

/// `SystemTime`/`Tick`: raw monotonic tick count since boot.
pub fn sys_system_tick() -> SyscallResult {
    Ok(crate::arch::timer::get_ticks() as usize)
}

/// `PerformanceFrequency`: ticks per second for `sys_system_tick`'s clock.
pub fn sys_performance_frequency() -> SyscallResult {
    Ok((crate::arch::timer::ticks_per_ms() * 1000) as usize)
}

/// `PerformanceTick`: alias of [`sys_system_tick`], kept as a distinct
/// entry point since the two syscall numbers are independent in the
/// dispatch table.
pub fn sys_performance_tick() -> SyscallResult {
    sys_system_tick()
}
