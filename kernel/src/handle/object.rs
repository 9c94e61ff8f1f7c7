//! The kernel object variants a handle can reference.

extern crate alloc;
use alloc::sync::Arc;
use core::ptr::NonNull;

use crate::ipc::context::IpcContext;
use crate::mm::region::MemoryRegion;
use crate::mm::VirtualAddressSpace;
use crate::sched::task::Task;

use super::set::HandleSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleKind {
    AddressSpace = 1,
    MemoryRegion = 2,
    Thread = 3,
    IpcContext = 4,
    HandleSet = 5,
}

impl HandleKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(HandleKind::AddressSpace),
            2 => Some(HandleKind::MemoryRegion),
            3 => Some(HandleKind::Thread),
            4 => Some(HandleKind::IpcContext),
            5 => Some(HandleKind::HandleSet),
            _ => None,
        }
    }
}

/// The object a handle slot owns or references. Address spaces, memory
/// regions, IPC contexts, and handle sets are reference-counted; threads
/// are owned by the scheduler's task registry and referenced by pointer.
#[derive(Clone)]
pub enum KernelObject {
    AddressSpace(Arc<VirtualAddressSpace>),
    MemoryRegion(Arc<MemoryRegion>),
    Thread(NonNull<Task>),
    IpcContext(Arc<IpcContext>),
    HandleSet(Arc<HandleSet>),
}

impl KernelObject {
    pub fn kind(&self) -> HandleKind {
        match self {
            KernelObject::AddressSpace(_) => HandleKind::AddressSpace,
            KernelObject::MemoryRegion(_) => HandleKind::MemoryRegion,
            KernelObject::Thread(_) => HandleKind::Thread,
            KernelObject::IpcContext(_) => HandleKind::IpcContext,
            KernelObject::HandleSet(_) => HandleKind::HandleSet,
        }
    }
}

// SAFETY: the `Thread` variant's `NonNull<Task>` is only ever dereferenced
// through the scheduler's own synchronization (each `Task` is pinned for
// its lifetime and its mutable state is behind atomics), matching
// `TaskPtr`'s justification.
unsafe impl Send for KernelObject {}
unsafe impl Sync for KernelObject {}
