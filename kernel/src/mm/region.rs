//! Shared memory regions.
//!
//! A `MemoryRegion` is a handle-identified, reference-counted set of
//! physical frames that can be attached into more than one address space.
//! Grounded on `ipc_context.c`'s `MapUntypedParameter`, which clones an IPC
//! argument's backing pages into the receiver with
//! `COMMIT | USERSPACE | READONLY | PERSISTENT`.

use core::sync::atomic::{AtomicUsize, Ordering};

extern crate alloc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::frame_allocator::{AllocMask, FrameNumber, FRAME_ALLOCATOR};
use crate::mm::vas::VirtualAddressSpace;
use crate::mm::{PageFlags, VirtualAddress, FRAME_SIZE};

/// A reference-counted set of physical frames, mappable into more than one
/// address space at once.
pub struct MemoryRegion {
    frames: Mutex<Vec<FrameNumber>>,
    size: usize,
    writable: bool,
    refcount: AtomicUsize,
}

impl MemoryRegion {
    /// Allocate a fresh region backed by `size` bytes of newly-committed
    /// physical frames.
    pub fn new(size: usize, writable: bool) -> KernelResult<Self> {
        if size == 0 {
            return Err(KernelError::InvalidParam {
                name: "size",
                value: 0,
            });
        }
        let page_count = size.div_ceil(FRAME_SIZE);
        let mut frames = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            match FRAME_ALLOCATOR.allocate(AllocMask::Any, 1) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    for f in frames.drain(..) {
                        let _ = FRAME_ALLOCATOR.free(f, 1);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            frames: Mutex::new(frames),
            size,
            writable,
            refcount: AtomicUsize::new(1),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn page_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn frame_at(&self, index: usize) -> Option<FrameNumber> {
        self.frames.lock().get(index).copied()
    }

    /// Increment the reference count, returning the new value. Called when
    /// a handle to this region is duplicated into another process.
    pub fn retain(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the reference count, returning the new value; the caller
    /// frees the underlying frames once this reaches zero.
    pub fn release(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Map this region's frames into `space`, auto-placed, with
    /// `COMMIT | USERSPACE | PERSISTENT` semantics and `READONLY` unless
    /// the caller requested write access.
    pub fn attach(&self, space: &VirtualAddressSpace, writable: bool) -> KernelResult<VirtualAddress> {
        let mut flags = PageFlags::PRESENT | PageFlags::USER;
        if writable && self.writable {
            flags |= PageFlags::WRITABLE;
        }
        let frames = self.frames.lock();
        space.map_shared_frames(&frames, flags)
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        for frame in self.frames.get_mut().drain(..) {
            let _ = FRAME_ALLOCATOR.free(frame, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_tracks_duplicates() {
        crate::mm::frame_allocator::FRAME_ALLOCATOR.init(FrameNumber::new(0), 64);
        let region = MemoryRegion::new(FRAME_SIZE, true).unwrap();
        assert_eq!(region.retain(), 2);
        assert_eq!(region.release(), 1);
        assert_eq!(region.release(), 0);
    }
}
