//! Page fault handling.
//!
//! Architecture trap handlers build a [`PageFaultInfo`] from their raw
//! fault registers and delegate to [`handle_page_fault`], which tries, in
//! order: a mapping-specific handler, commit-on-fault for reserved
//! mappings, downward stack growth, and finally signal delivery.

#![allow(dead_code)]

use crate::error::KernelError;
use crate::mm::{MapOptions, MappingKind, PageFlags, Placement, VirtualAddress, PAGE_SIZE};

/// Reason a page fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFaultReason {
    /// Page is not present in the page table.
    NotPresent,
    /// A protection violation was detected (e.g., access rights mismatch).
    ProtectionViolation,
    /// Write to a read-only page.
    WriteToReadOnly,
    /// Attempt to execute a page marked as no-execute.
    ExecuteNoExecute,
    /// User-mode code tried to access a kernel-only page.
    UserModeKernelAccess,
}

/// Information about a page fault collected by the architecture trap handler.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    /// The virtual address that caused the fault.
    pub faulting_address: u64,
    /// Why the fault occurred.
    pub reason: PageFaultReason,
    /// Whether the access was a write (true) or read (false).
    pub was_write: bool,
    /// Whether the fault occurred while executing in user mode.
    pub was_user_mode: bool,
    /// Instruction pointer at the time of the fault.
    pub instruction_pointer: u64,
}

/// Guard region kept below a stack mapping; growth never crosses it.
const STACK_GUARD_SIZE: u64 = PAGE_SIZE as u64;

/// Maximum stack growth serviced by a single fault.
const MAX_STACK_GROWTH: u64 = 128 * 1024;

/// Top-level page fault entry point, called by each architecture's trap
/// handler.
///
/// 1. A mapping-registered handler, if the fault lands in one.
/// 2. Commit-on-fault, for reserved-but-uncommitted mappings.
/// 3. Stack growth, for faults just below a stack mapping.
/// 4. SIGSEGV delivery (or a bare error for kernel-mode faults).
pub fn handle_page_fault(info: PageFaultInfo) -> Result<(), KernelError> {
    if try_mapping_handler(&info).is_ok() {
        return Ok(());
    }

    if try_demand_page(&info).is_ok() {
        return Ok(());
    }

    if info.was_write && try_copy_on_write(&info).is_ok() {
        return Ok(());
    }

    if try_stack_growth(&info).is_ok() {
        return Ok(());
    }

    signal_segv(&info)
}

fn current_space() -> Result<&'static crate::mm::VirtualAddressSpace, KernelError> {
    crate::process::current_process()
        .map(|p| &p.memory_space)
        .ok_or(KernelError::NotFound {
            resource: "process",
            id: 0,
        })
}

/// Try a handler registered via `register_mapping_handler` for the range
/// the fault landed in.
fn try_mapping_handler(info: &PageFaultInfo) -> Result<(), KernelError> {
    let space = current_space()?;
    let vaddr = VirtualAddress::new(info.faulting_address);
    let handler = space.mapping_handler_for(vaddr).ok_or(KernelError::NotFound {
        resource: "mapping handler",
        id: info.faulting_address,
    })?;
    handler(space, vaddr)
}

/// Commit-on-fault: the address falls inside a tracked mapping that simply
/// has not been backed by frames yet.
fn try_demand_page(info: &PageFaultInfo) -> Result<(), KernelError> {
    let space = current_space()?;
    let vaddr = VirtualAddress::new(info.faulting_address);

    let mapping = space.get_mapping(vaddr).ok_or(KernelError::NotFound {
        resource: "mapping",
        id: info.faulting_address,
    })?;

    if info.was_write && !mapping.flags.contains(PageFlags::WRITABLE) {
        return Err(KernelError::Permission {
            operation: "write to read-only mapping",
        });
    }
    if info.was_user_mode && !mapping.flags.contains(PageFlags::USER) {
        return Err(KernelError::Permission {
            operation: "user access to kernel mapping",
        });
    }

    space.commit(vaddr)
}

/// Copy-on-write is not implemented: the VAS does not yet distinguish a
/// shared read-only mapping awaiting a private copy from a plain
/// read-only one. Tracked as a follow-up once `VirtualMapping` grows a
/// `cow` flag.
fn try_copy_on_write(info: &PageFaultInfo) -> Result<(), KernelError> {
    let _ = info;
    Err(KernelError::NotSupported {
        operation: "copy-on-write page handling",
    })
}

/// Extend a user stack downward to cover `info.faulting_address`, up to
/// [`MAX_STACK_GROWTH`] and never into the guard page below it.
fn try_stack_growth(info: &PageFaultInfo) -> Result<(), KernelError> {
    if !info.was_user_mode {
        return Err(KernelError::Permission {
            operation: "kernel stack growth not supported",
        });
    }

    let space = current_space()?;
    let fault = info.faulting_address & !(PAGE_SIZE as u64 - 1);

    // Already-mapped addresses are not a growth fault.
    if space.get_mapping(VirtualAddress::new(fault)).is_some() {
        return Err(KernelError::InvalidParam {
            name: "faulting_address",
            value: fault as usize,
        });
    }

    // Find the stack mapping by probing upward, one page at a time, for
    // the nearest tracked mapping above the fault. The VAS has no range
    // enumeration API, so this walk is bounded by MAX_STACK_GROWTH.
    let probe_limit = fault + MAX_STACK_GROWTH;
    let mut probe = fault + PAGE_SIZE as u64;
    let stack_start = loop {
        if probe > probe_limit {
            return Err(KernelError::InvalidParam {
                name: "faulting_address",
                value: fault as usize,
            });
        }
        if let Some(mapping) = space.get_mapping(VirtualAddress::new(probe)) {
            if mapping.kind != MappingKind::Stack {
                return Err(KernelError::InvalidParam {
                    name: "faulting_address",
                    value: fault as usize,
                });
            }
            break mapping.start.as_u64();
        }
        probe += PAGE_SIZE as u64;
    };

    let guard_bottom = stack_start.saturating_sub(STACK_GUARD_SIZE);
    if fault >= guard_bottom {
        return Err(KernelError::Permission {
            operation: "stack guard page hit",
        });
    }

    let grow_size = (stack_start - fault) as usize;
    space.map(
        Placement::Fixed(VirtualAddress::new(fault)),
        grow_size,
        MappingKind::Stack,
        MapOptions::COMMIT | MapOptions::USERSPACE | MapOptions::FIXED,
    )?;
    Ok(())
}

/// Deliver SIGSEGV to the faulting process's current thread, or return a
/// bare error for a kernel-mode fault.
fn signal_segv(info: &PageFaultInfo) -> Result<(), KernelError> {
    if info.was_user_mode {
        if let Some(process) = crate::process::current_process() {
            crate::process::signal::raise(process.pid, crate::process::signal::SIGSEGV);
        }
    }

    Err(KernelError::InvalidParam {
        name: "faulting_address",
        value: info.faulting_address as usize,
    })
}

// ---------------------------------------------------------------------------
// Architecture-specific entry points
// ---------------------------------------------------------------------------

/// Build a [`PageFaultInfo`] from an x86_64 page fault error code and CR2.
///
/// Error code bits (from Intel SDM):
/// - Bit 0 (P):    0 = not-present, 1 = protection violation
/// - Bit 1 (W/R):  0 = read, 1 = write
/// - Bit 2 (U/S):  0 = supervisor, 1 = user
/// - Bit 4 (I/D):  1 = instruction fetch
#[cfg(target_arch = "x86_64")]
pub fn from_x86_64(error_code: u64, cr2: u64, rip: u64) -> PageFaultInfo {
    let not_present = (error_code & 1) == 0;
    let was_write = (error_code & 2) != 0;
    let was_user = (error_code & 4) != 0;
    let was_fetch = (error_code & 16) != 0;

    let reason = if not_present {
        PageFaultReason::NotPresent
    } else if was_fetch {
        PageFaultReason::ExecuteNoExecute
    } else if was_write {
        PageFaultReason::WriteToReadOnly
    } else if was_user {
        PageFaultReason::UserModeKernelAccess
    } else {
        PageFaultReason::ProtectionViolation
    };

    PageFaultInfo {
        faulting_address: cr2,
        reason,
        was_write,
        was_user_mode: was_user,
        instruction_pointer: rip,
    }
}

/// Build a [`PageFaultInfo`] from an AArch64 data/instruction abort.
///
/// `esr_el1` contains the ESR value and `far_el1` the faulting address.
/// ISS encoding for Data Abort (EC=0b100100/0b100101):
/// - Bit 6 (WnR): 0 = read, 1 = write
/// - Bits [5:0] (DFSC): fault status code
#[cfg(target_arch = "aarch64")]
pub fn from_aarch64(esr_el1: u64, far_el1: u64, elr_el1: u64) -> PageFaultInfo {
    let dfsc = (esr_el1 & 0x3F) as u8;
    let was_write = (esr_el1 & (1 << 6)) != 0;
    let ec = ((esr_el1 >> 26) & 0x3F) as u8;
    let was_user = ec == 0b100100;

    let reason = match dfsc & 0x0F {
        0x04..=0x07 => PageFaultReason::NotPresent,
        0x0C..=0x0F => {
            if was_write {
                PageFaultReason::WriteToReadOnly
            } else {
                PageFaultReason::ProtectionViolation
            }
        }
        _ => PageFaultReason::ProtectionViolation,
    };

    PageFaultInfo {
        faulting_address: far_el1,
        reason,
        was_write,
        was_user_mode: was_user,
        instruction_pointer: elr_el1,
    }
}

/// Build a [`PageFaultInfo`] from a RISC-V page fault trap.
///
/// RISC-V uses different exception codes for load, store, and instruction
/// page faults (causes 12, 13, 15 respectively).
#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub fn from_riscv(cause: u64, stval: u64, sepc: u64) -> PageFaultInfo {
    let was_write = cause == 15;
    let was_fetch = cause == 12;

    let reason = if was_fetch {
        PageFaultReason::ExecuteNoExecute
    } else {
        PageFaultReason::NotPresent
    };

    PageFaultInfo {
        faulting_address: stval,
        reason,
        was_write,
        was_user_mode: true,
        instruction_pointer: sepc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_fault_reason_equality() {
        assert_eq!(PageFaultReason::NotPresent, PageFaultReason::NotPresent);
        assert_ne!(PageFaultReason::NotPresent, PageFaultReason::WriteToReadOnly);
    }

    #[test]
    fn test_page_fault_info_construction() {
        let info = PageFaultInfo {
            faulting_address: 0xDEAD_BEEF,
            reason: PageFaultReason::NotPresent,
            was_write: false,
            was_user_mode: true,
            instruction_pointer: 0x4010_0000,
        };
        assert_eq!(info.faulting_address, 0xDEAD_BEEF);
        assert!(!info.was_write);
        assert!(info.was_user_mode);
    }

    #[test]
    fn test_page_fault_info_write_fault() {
        let info = PageFaultInfo {
            faulting_address: 0x1000,
            reason: PageFaultReason::WriteToReadOnly,
            was_write: true,
            was_user_mode: true,
            instruction_pointer: 0x2000,
        };
        assert!(info.was_write);
        assert_eq!(info.reason, PageFaultReason::WriteToReadOnly);
    }

    #[test]
    fn test_page_fault_info_kernel_fault() {
        let info = PageFaultInfo {
            faulting_address: 0xFFFF_8000_0000_1000,
            reason: PageFaultReason::ProtectionViolation,
            was_write: false,
            was_user_mode: false,
            instruction_pointer: 0xFFFF_8000_0010_0000,
        };
        assert!(!info.was_user_mode);
    }
}
