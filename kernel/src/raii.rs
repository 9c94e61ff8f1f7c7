//! RAII wrappers for kernel resources.
//!
//! Frames, mapped regions, and IPC channel handles are released
//! automatically when their guard goes out of scope, instead of relying on
//! every call site to remember an explicit free.

use core::ops::{Deref, DerefMut};

extern crate alloc;
use alloc::vec::Vec;

use spin::MutexGuard;

use crate::mm::frame_allocator::FrameAllocator;
use crate::mm::PhysicalFrame;
use crate::println;
use crate::process::ProcessId;

/// Returns a single physical frame to the allocator when dropped.
pub struct FrameGuard {
    frame: PhysicalFrame,
    allocator: &'static FrameAllocator,
}

impl FrameGuard {
    pub fn new(frame: PhysicalFrame, allocator: &'static FrameAllocator) -> Self {
        Self { frame, allocator }
    }

    pub fn addr(&self) -> usize {
        self.frame.addr()
    }

    /// Release ownership of the frame without deallocating it.
    pub fn leak(self) -> PhysicalFrame {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = self.allocator.free(self.frame.number(), 1);
    }
}

impl Deref for FrameGuard {
    type Target = PhysicalFrame;

    fn deref(&self) -> &Self::Target {
        &self.frame
    }
}

/// Returns a contiguous run of physical frames to the allocator when dropped.
pub struct FramesGuard {
    frames: Vec<PhysicalFrame>,
    allocator: &'static FrameAllocator,
}

impl FramesGuard {
    pub fn new(frames: Vec<PhysicalFrame>, allocator: &'static FrameAllocator) -> Self {
        Self { frames, allocator }
    }

    pub fn leak(self) -> Vec<PhysicalFrame> {
        let frames = core::mem::take(&mut { self.frames.clone() });
        core::mem::forget(self);
        frames
    }
}

impl Drop for FramesGuard {
    fn drop(&mut self) {
        if let Some(first) = self.frames.first() {
            let _ = self.allocator.free(first.number(), self.frames.len());
        }
    }
}

/// Unmaps a virtual range from a process's address space when dropped.
pub struct MappedRegion {
    virt_addr: usize,
    size: usize,
    process_id: ProcessId,
}

impl MappedRegion {
    pub fn new(virt_addr: usize, size: usize, process_id: ProcessId) -> Self {
        Self {
            virt_addr,
            size,
            process_id,
        }
    }

    pub fn addr(&self) -> usize {
        self.virt_addr
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Some(space) = crate::process::address_space_of(self.process_id) {
            if let Err(e) = space.unmap(self.virt_addr as u64, self.size) {
                println!(
                    "[raii] failed to unmap region at {:#x}: {:?}",
                    self.virt_addr, e
                );
            }
        }
    }
}

/// Lock guard that logs acquisition and release; useful for tracking down
/// lock-ordering bugs during development.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    name: &'static str,
}

impl<'a, T> TrackedMutexGuard<'a, T> {
    pub fn new(guard: MutexGuard<'a, T>, name: &'static str) -> Self {
        Self { guard, name }
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        log::trace!("released lock: {}", self.name);
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Drops an IPC context's handle-table entry when its last reference goes
/// out of scope.
pub struct ChannelGuard {
    handle: u64,
}

impl ChannelGuard {
    pub fn new(handle: u64) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn leak(self) -> u64 {
        let handle = self.handle;
        core::mem::forget(self);
        handle
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        crate::handle::table::HANDLES.destroy(self.handle);
    }
}

/// Macro to create a scope guard running cleanup code on drop.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

/// Generic scope guard that runs cleanup code on drop, unless cancelled.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_guard_runs_on_drop() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn scope_guard_cancel_skips_cleanup() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }
}
