//! Memory management: physical frames, page tables, and address spaces.
//!
//! See `SPEC_FULL.md` §4.A/§4.C for the component contracts implemented
//! across this module's children.

#![allow(dead_code)]

pub mod bootloader;
pub mod frame_allocator;
pub mod heap;
pub mod heap_pool;
pub mod page_fault;
pub mod page_table;
pub mod region;
pub mod vas;

use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

pub use frame_allocator::{AllocMask, FrameNumber, PhysicalAddress, PhysicalFrame, FRAME_ALLOCATOR};
pub use region::MemoryRegion;
pub use vas::{MappingKind, VirtualAddressSpace, VirtualMapping};

/// Page size in bytes, used throughout the address-space engine.
pub const PAGE_SIZE: usize = frame_allocator::FRAME_SIZE;
pub const FRAME_SIZE: usize = frame_allocator::FRAME_SIZE;

/// Offset added to a physical address to reach its kernel virtual alias.
/// Populated at boot once the bootloader's physical memory mapping is
/// known; `0` means "physical == virtual" (identity-mapped boot tables).
pub static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Set the physical-to-virtual offset used by [`phys_to_virt_addr`].
pub fn set_phys_mem_offset(offset: u64) {
    PHYS_MEM_OFFSET.store(offset, Ordering::Release);
}

/// Translate a physical address to the kernel's virtual alias for it.
pub fn phys_to_virt_addr(phys: u64) -> u64 {
    phys + PHYS_MEM_OFFSET.load(Ordering::Acquire)
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }

    pub const fn align_down(&self, align: u64) -> Self {
        Self(self.0 & !(align - 1))
    }

    pub const fn align_up(&self, align: u64) -> Self {
        Self((self.0 + align - 1) & !(align - 1))
    }
}

bitflags! {
    /// Flags controlling a [`Map`](vas::VirtualAddressSpace::map) call and
    /// stored per page-table entry. Named directly after the ones
    /// `spec.md` §4.C/§6 enumerates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT     = 1 << 0;
        const WRITABLE    = 1 << 1;
        const USER        = 1 << 2;
        const NOCACHE     = 1 << 3;
        const ACCESSED    = 1 << 4;
        const DIRTY       = 1 << 5;
        const HUGE        = 1 << 6;
        const GLOBAL      = 1 << 7;
        const NO_EXECUTE  = 1 << 8;
    }
}

bitflags! {
    /// Options accompanying `Map`/`MapContiguous`/`MapReserved`, matching
    /// `spec.md` §4.C's flag set exactly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapOptions: u32 {
        const COMMIT      = 1 << 0;
        const USERSPACE   = 1 << 1;
        const READONLY    = 1 << 2;
        const EXECUTABLE  = 1 << 3;
        const NOCACHE     = 1 << 4;
        const LOWFIRST    = 1 << 5;
        const PERSISTENT  = 1 << 6;
        const STACK       = 1 << 7;
        const GUARDPAGE   = 1 << 8;
        const FIXED       = 1 << 9;
    }
}

/// Where an auto-placed mapping should be drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Caller supplies the exact virtual address; `MapOptions::FIXED` must
    /// also be set.
    Fixed(VirtualAddress),
    /// Drawn from the address space's per-process heap pool.
    Process,
    /// Drawn from a single pool shared by every address space (kernel-only
    /// allocations visible everywhere).
    Global,
    /// Drawn from a pool private to the calling thread (thread-local
    /// storage, alt-stacks).
    Thread,
}

bitflags! {
    /// Address-space creation flags (`spec.md` §3 "Flags: KERNEL,
    /// APPLICATION, INHERIT").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpaceFlags: u32 {
        const KERNEL      = 1 << 0;
        const APPLICATION = 1 << 1;
        const INHERIT     = 1 << 2;
    }
}

/// A page-granularity descriptor of the mapping containing `base`,
/// returned by `Query`.
#[derive(Debug, Clone, Copy)]
pub struct MappingDescriptor {
    pub base: VirtualAddress,
    pub size: usize,
    pub flags: PageFlags,
    pub kind: MappingKind,
}
