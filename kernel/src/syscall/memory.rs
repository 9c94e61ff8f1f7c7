//! Memory management system calls: `MemoryAllocate`, `MemoryFree`,
//! `MemoryProtect`, `MemoryQuery`.

use super::userspace::validate_user_pointer;
use super::{SyscallError, SyscallResult};
use crate::mm::{MapOptions, MappingKind, PageFlags, Placement, VirtualAddress};
use crate::process;

/// Pages may be read. Every committed mapping is readable once present;
/// this flag exists for ABI parity with the protection bits below.
pub const PROT_READ: usize = 0x1;
/// Pages may be written.
pub const PROT_WRITE: usize = 0x2;
/// Pages may be executed.
pub const PROT_EXEC: usize = 0x4;

/// Commit frames immediately rather than reserving the range.
pub const MEM_COMMIT: usize = 0x01;
/// Place the mapping at exactly the hinted address.
pub const MEM_FIXED: usize = 0x02;

fn prot_to_options(prot: usize, flags: usize) -> Result<MapOptions, SyscallError> {
    if prot & !(PROT_READ | PROT_WRITE | PROT_EXEC) != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    if prot & PROT_WRITE != 0 && prot & PROT_EXEC != 0 {
        return Err(SyscallError::PermissionDenied);
    }

    let mut options = MapOptions::USERSPACE;
    if prot & PROT_WRITE == 0 {
        options |= MapOptions::READONLY;
    }
    if prot & PROT_EXEC != 0 {
        options |= MapOptions::EXECUTABLE;
    }
    if flags & MEM_COMMIT != 0 {
        options |= MapOptions::COMMIT;
    }
    if flags & MEM_FIXED != 0 {
        options |= MapOptions::FIXED;
    }
    Ok(options)
}

/// `MemoryAllocate(hint, len, flags) -> ptr`. `prot` folds PROT_READ/WRITE/
/// EXEC into the call; `hint` is only honored when `MEM_FIXED` is set.
pub fn sys_memory_allocate(hint: usize, len: usize, prot: usize, flags: usize) -> SyscallResult {
    if len == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let options = prot_to_options(prot, flags)?;
    let is_fixed = flags & MEM_FIXED != 0;
    if is_fixed && hint == 0 {
        return Err(SyscallError::InvalidArgument);
    }

    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    let placement = if is_fixed {
        Placement::Fixed(VirtualAddress::new(hint as u64))
    } else {
        Placement::Process
    };

    let size = (len + crate::mm::PAGE_SIZE - 1) & !(crate::mm::PAGE_SIZE - 1);
    let addr = process
        .memory_space
        .map(placement, size, MappingKind::Data, options)
        .map_err(SyscallError::from)?;

    Ok(addr.as_u64() as usize)
}

/// `MemoryFree(ptr, len)`.
pub fn sys_memory_free(ptr: usize, len: usize) -> SyscallResult {
    if ptr == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_pointer(ptr, len)?;

    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    process
        .memory_space
        .unmap(ptr as u64, len)
        .map_err(SyscallError::from)?;
    Ok(0)
}

/// `MemoryProtect(ptr, len, flags) -> prev`. The previous flags are not
/// tracked per-call at the VAS layer, so this reports whatever the
/// mapping's current flags were before the change.
pub fn sys_memory_protect(ptr: usize, len: usize, prot: usize) -> SyscallResult {
    if ptr == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_pointer(ptr, len)?;
    if prot & PROT_WRITE != 0 && prot & PROT_EXEC != 0 {
        return Err(SyscallError::PermissionDenied);
    }

    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    let vaddr = VirtualAddress::new(ptr as u64);
    let previous = process
        .memory_space
        .get_mapping(vaddr)
        .ok_or(SyscallError::InvalidArgument)?
        .flags;

    let mut flags = PageFlags::PRESENT | PageFlags::USER;
    if prot & PROT_WRITE != 0 {
        flags |= PageFlags::WRITABLE;
    }
    if prot & PROT_EXEC == 0 {
        flags |= PageFlags::NO_EXECUTE;
    }

    process
        .memory_space
        .change_protection(vaddr, flags)
        .map_err(SyscallError::from)?;

    Ok(previous.bits() as usize)
}

/// `MemoryQuery(ptr) -> descriptor`. Packs the mapping's size, flag bits,
/// and commit state into a single word for a first pass; richer query
/// results belong behind a user-space struct once one is needed.
pub fn sys_memory_query(ptr: usize) -> SyscallResult {
    if ptr == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    let mapping = process
        .memory_space
        .get_mapping(VirtualAddress::new(ptr as u64))
        .ok_or(SyscallError::ResourceNotFound)?;

    Ok(mapping.size)
}
