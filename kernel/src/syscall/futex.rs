//! `FutexWait`/`FutexWake`/`FutexWakeOp`, thin wrappers over
//! [`crate::sched::FUTEX_TABLE`] that additionally resolve each call's key:
//! PRIVATE futexes are scoped to the caller's process and its virtual
//! address, SHARED ones to the backing physical frame so two processes
//! mapping the same page via shared memory see each other's wakes.

use super::userspace::validate_user_ptr;
use super::{SyscallError, SyscallResult};
use crate::mm::VirtualAddress;
use crate::process::{self, ProcessId};
use crate::sched::futex::{FutexCmp, FutexOp};
use crate::sched::FUTEX_TABLE;

/// `flags` bit 0: 0 = PRIVATE (process-scoped, virtual address), 1 =
/// SHARED (global, resolved to the address's backing physical frame).
const FUTEX_SHARED: usize = 1;

const FUTEX_OP_MASK: u32 = 0xF << 24;
const FUTEX_CMP_MASK: u32 = 0xF << 28;
const FUTEX_OPARG_MASK: u32 = 0xFFFF;

/// Resolve `addr` to the key `FUTEX_TABLE` should use: `(pid, addr)` for
/// PRIVATE, `(0, paddr)` for SHARED.
fn resolve_key(addr: usize, shared: bool) -> Result<(ProcessId, u64), SyscallError> {
    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    if !shared {
        return Ok((process.pid, addr as u64));
    }

    let mapping = process
        .memory_space
        .get_mapping(VirtualAddress::new(addr as u64))
        .ok_or(SyscallError::InvalidArgument)?;
    let page_offset = addr as u64 - mapping.start.as_u64();
    let frame_index = (page_offset / crate::mm::PAGE_SIZE as u64) as usize;
    let frame = mapping.frames.get(frame_index).ok_or(SyscallError::InvalidArgument)?;
    let paddr = frame.as_addr().as_u64() + page_offset % crate::mm::PAGE_SIZE as u64;
    Ok((ProcessId(0), paddr))
}

/// `FutexWait(uaddr, expected, timeout_ms, flags)`: block while `*uaddr ==
/// expected`. The word is re-read under the futex table's bucket lock (not
/// here) so a `Wake` landing between this call and that lock acquisition is
/// never lost.
pub fn sys_futex_wait(uaddr: usize, expected: u32, timeout_ms: usize, flags: usize) -> SyscallResult {
    if uaddr == 0 || uaddr & 0x3 != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_ptr(uaddr as *const u32, core::mem::size_of::<u32>())?;

    let (scope, key_addr) = resolve_key(uaddr, flags & FUTEX_SHARED != 0)?;
    let timeout = if timeout_ms == 0 { None } else { Some(timeout_ms as u64) };

    FUTEX_TABLE
        .wait(
            scope,
            key_addr,
            expected as i32,
            || unsafe { core::ptr::read_volatile(uaddr as *const u32) as i32 },
            timeout,
        )
        .map_err(SyscallError::from)?;
    Ok(0)
}

/// `FutexWake(uaddr, max_wake, flags)`: wake up to `max_wake` threads
/// parked on `uaddr`, returning how many were actually woken.
pub fn sys_futex_wake(uaddr: usize, max_wake: usize, flags: usize) -> SyscallResult {
    if uaddr == 0 || uaddr & 0x3 != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_ptr(uaddr as *const u32, core::mem::size_of::<u32>())?;

    let (scope, key_addr) = resolve_key(uaddr, flags & FUTEX_SHARED != 0)?;
    let woken = FUTEX_TABLE.wake(scope, key_addr, max_wake as u32);
    Ok(woken)
}

/// `FutexWakeOp(uaddr, count, uaddr2, count2, op)`: apply the bit-packed
/// `op` to `*uaddr2`, wake up to `count` waiters on `uaddr`, and — if the
/// op's comparison predicate holds over `uaddr`'s value from before this
/// call and the op's embedded `cmparg` — also wake up to `count2` waiters
/// on `uaddr2`. `op` packs `oparg | (cmparg << 12) | (op_code << 24) |
/// (cmp_code << 28)`, the same layout the teacher's futex syscall handler
/// uses for `FUTEX_WAKE_OP`. Process-scoped only; unlike `Wait`/`Wake`
/// this call takes no PRIVATE/SHARED flag.
pub fn sys_futex_wake_op(uaddr: usize, count: usize, uaddr2: usize, count2: usize, op: usize) -> SyscallResult {
    if uaddr == 0 || uaddr & 0x3 != 0 || uaddr2 == 0 || uaddr2 & 0x3 != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_ptr(uaddr as *const u32, core::mem::size_of::<u32>())?;
    validate_user_ptr(uaddr2 as *const u32, core::mem::size_of::<u32>())?;

    let op = op as u32;
    let op_code = FutexOp::from_code((op & FUTEX_OP_MASK) >> 24).ok_or(SyscallError::InvalidArgument)?;
    let cmp_code = FutexCmp::from_code((op & FUTEX_CMP_MASK) >> 28).ok_or(SyscallError::InvalidArgument)?;
    let oparg = op & FUTEX_OPARG_MASK;
    let cmparg = ((op >> 12) & FUTEX_OPARG_MASK) as i32;

    let process = process::current_process().ok_or(SyscallError::InvalidState)?;

    let prior_primary = unsafe { core::ptr::read_volatile(uaddr as *const u32) } as i32;
    let cur_secondary = unsafe { core::ptr::read_volatile(uaddr2 as *const u32) };
    let new_secondary = op_code.apply(cur_secondary, oparg);
    unsafe {
        core::ptr::write_volatile(uaddr2 as *mut u32, new_secondary);
    }

    let secondary_wake = cmp_code.holds(prior_primary, cmparg);
    let (woken, woken2) = FUTEX_TABLE.wake_op(process.pid, uaddr as u64, count as u32, uaddr2 as u64, count2 as u32, secondary_wake);
    Ok(woken + woken2)
}
