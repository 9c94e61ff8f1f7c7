//! Physical frame allocator.
//!
//! Hybrid bitmap (small allocations) + buddy system (large, contiguous
//! allocations) allocator over the frames handed to the kernel by the boot
//! memory map. Single global instance, one lock per sub-allocator, never
//! held across another lock. Never panics on exhaustion: every allocation
//! path returns `KernelError::OutOfMemory`.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

#[allow(unused_imports)]
use crate::println;
use crate::error::{KernelError, KernelResult};
use crate::raii::{FrameGuard, FramesGuard};

extern crate alloc;
use alloc::boxed::Box;
use alloc::vec::Vec;

/// Size of a physical frame.
pub const FRAME_SIZE: usize = 4096;

/// Threshold for switching from the bitmap allocator to the buddy allocator.
const BITMAP_BUDDY_THRESHOLD: usize = 512;

/// Memory zone for frame allocation, used to satisfy `allocate(mask, ...)`
/// address-range constraints (e.g. ISA DMA below 16 MiB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryZone {
    /// 0-16MiB (legacy ISA DMA).
    Dma,
    /// 16MiB upward.
    Normal,
    /// Reserved for 32-bit high-memory; unused on 64-bit targets.
    High,
}

impl MemoryZone {
    pub fn frame_range(&self) -> (FrameNumber, FrameNumber) {
        match self {
            MemoryZone::Dma => (FrameNumber::new(0), FrameNumber::new(4096)),
            MemoryZone::Normal => (FrameNumber::new(4096), FrameNumber::new(u64::MAX >> 12)),
            MemoryZone::High => (FrameNumber::new(0), FrameNumber::new(0)),
        }
    }

    pub fn contains(&self, frame: FrameNumber) -> bool {
        let (start, end) = self.frame_range();
        frame >= start && frame < end
    }

    pub fn for_frame(frame: FrameNumber) -> Self {
        if MemoryZone::Dma.contains(frame) {
            MemoryZone::Dma
        } else {
            MemoryZone::Normal
        }
    }
}

/// Constrains the allowed physical address range of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMask {
    /// No constraint; search all zones.
    Any,
    /// Restrict to the DMA zone (< 16 MiB).
    Below16M,
    /// Restrict to addresses below 4 GiB.
    Below4G,
}

impl AllocMask {
    fn zone(self) -> Option<MemoryZone> {
        match self {
            AllocMask::Any => None,
            AllocMask::Below16M => Some(MemoryZone::Dma),
            AllocMask::Below4G => Some(MemoryZone::Normal),
        }
    }
}

/// Physical frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    pub const fn new(num: u64) -> Self {
        Self(num)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * FRAME_SIZE as u64)
    }
}

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_frame(&self) -> FrameNumber {
        FrameNumber::new(self.0 / FRAME_SIZE as u64)
    }

    pub const fn offset(&self, offset: u64) -> Self {
        Self::new(self.0 + offset)
    }
}

/// A single physical frame, owned by a [`FrameGuard`]/[`FramesGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalFrame {
    number: FrameNumber,
}

impl PhysicalFrame {
    pub fn new(number: FrameNumber) -> Self {
        Self { number }
    }

    pub fn number(&self) -> FrameNumber {
        self.number
    }

    pub fn addr(&self) -> usize {
        (self.number.0 * FRAME_SIZE as u64) as usize
    }
}

fn oom(requested: usize, available: u64) -> KernelError {
    KernelError::OutOfMemory {
        requested: requested * FRAME_SIZE,
        available: (available as usize) * FRAME_SIZE,
    }
}

/// Statistics for the frame allocator, surfaced for diagnostics/metrics.
#[derive(Debug, Default)]
pub struct FrameAllocatorStats {
    pub total_frames: u64,
    pub free_frames: u64,
}

/// Bitmap allocator for small allocations (< `BITMAP_BUDDY_THRESHOLD` frames).
struct BitmapAllocator {
    bitmap: Mutex<Vec<u64>>,
    start_frame: FrameNumber,
    total_frames: usize,
    free_frames: AtomicUsize,
}

impl BitmapAllocator {
    fn new(start_frame: FrameNumber, frame_count: usize) -> Self {
        let words = frame_count.div_ceil(64).max(1);
        Self {
            bitmap: Mutex::new(alloc::vec![u64::MAX; words]),
            start_frame,
            total_frames: frame_count,
            free_frames: AtomicUsize::new(frame_count),
        }
    }

    fn allocate(&self, count: usize) -> KernelResult<FrameNumber> {
        if count == 0 || count >= BITMAP_BUDDY_THRESHOLD {
            return Err(KernelError::InvalidParam {
                name: "frame_count",
                value: count,
            });
        }

        let mut bitmap = self.bitmap.lock();
        let mut consecutive = 0usize;
        let mut start_bit = 0usize;

        for (word_idx, word) in bitmap.iter_mut().enumerate() {
            if *word == 0 {
                consecutive = 0;
                continue;
            }
            for bit in 0..64 {
                if *word & (1 << bit) != 0 {
                    if consecutive == 0 {
                        start_bit = word_idx * 64 + bit;
                    }
                    consecutive += 1;
                    if consecutive == count {
                        let first_frame = start_bit;
                        for i in 0..count {
                            let frame_bit = first_frame + i;
                            bitmap[frame_bit / 64] &= !(1 << (frame_bit % 64));
                        }
                        self.free_frames.fetch_sub(count, Ordering::Release);
                        return Ok(FrameNumber::new(
                            self.start_frame.as_u64() + first_frame as u64,
                        ));
                    }
                } else {
                    consecutive = 0;
                }
            }
        }

        Err(oom(count, self.free_frames.load(Ordering::Acquire) as u64))
    }

    fn mark_used(&self, frame: FrameNumber) {
        let start = self.start_frame.as_u64();
        let frame_num = frame.as_u64();
        if frame_num < start || frame_num >= start + self.total_frames as u64 {
            return;
        }
        let offset = (frame_num - start) as usize;
        let mut bitmap = self.bitmap.lock();
        if bitmap[offset / 64] & (1 << (offset % 64)) != 0 {
            bitmap[offset / 64] &= !(1 << (offset % 64));
            self.free_frames.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn free(&self, frame: FrameNumber, count: usize) -> KernelResult<()> {
        let offset = frame.as_u64().checked_sub(self.start_frame.as_u64());
        let offset = match offset {
            Some(o) if (o as usize) + count <= self.total_frames => o as usize,
            _ => {
                return Err(KernelError::InvalidParam {
                    name: "frame",
                    value: frame.as_u64() as usize,
                })
            }
        };

        let mut bitmap = self.bitmap.lock();
        for i in 0..count {
            let bit = offset + i;
            if bitmap[bit / 64] & (1 << (bit % 64)) != 0 {
                return Err(KernelError::InvalidParam {
                    name: "frame",
                    value: frame.as_u64() as usize,
                });
            }
            bitmap[bit / 64] |= 1 << (bit % 64);
        }
        self.free_frames.fetch_add(count, Ordering::Release);
        Ok(())
    }

    fn free_count(&self) -> usize {
        self.free_frames.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct BuddyBlock {
    frame: FrameNumber,
    next: Option<Box<BuddyBlock>>,
}

/// Buddy allocator for large, physically contiguous allocations
/// (>= `BITMAP_BUDDY_THRESHOLD` frames).
struct BuddyAllocator {
    free_lists: [Mutex<Option<BuddyBlock>>; 21],
    start_frame: FrameNumber,
    total_frames: usize,
    free_frames: AtomicUsize,
}

impl BuddyAllocator {
    fn new(start_frame: FrameNumber, frame_count: usize) -> Self {
        let total_frames = if frame_count.is_power_of_two() {
            frame_count
        } else if frame_count == 0 {
            0
        } else {
            frame_count.next_power_of_two() / 2
        };

        let allocator = Self {
            free_lists: Default::default(),
            start_frame,
            total_frames,
            free_frames: AtomicUsize::new(total_frames),
        };

        if total_frames > 0 {
            let max_order = total_frames.trailing_zeros() as usize;
            *allocator.free_lists[max_order].lock() = Some(BuddyBlock {
                frame: start_frame,
                next: None,
            });
        }

        allocator
    }

    fn get_order(count: usize) -> usize {
        count.next_power_of_two().trailing_zeros() as usize
    }

    fn allocate(&self, count: usize) -> KernelResult<FrameNumber> {
        if count == 0 {
            return Err(KernelError::InvalidParam {
                name: "frame_count",
                value: count,
            });
        }
        let order = Self::get_order(count);
        if order >= self.free_lists.len() {
            return Err(KernelError::InvalidParam {
                name: "frame_count",
                value: count,
            });
        }

        for current_order in order..self.free_lists.len() {
            let mut list = self.free_lists[current_order].lock();
            if let Some(mut block) = list.take() {
                *list = block.next.take().map(|b| *b);
                drop(list);

                let mut split_order = current_order;
                while split_order > order {
                    split_order -= 1;
                    let buddy_frame = FrameNumber::new(block.frame.as_u64() + (1 << split_order));
                    let mut buddy_list = self.free_lists[split_order].lock();
                    *buddy_list = Some(BuddyBlock {
                        frame: buddy_frame,
                        next: buddy_list.take().map(Box::new),
                    });
                }

                self.free_frames.fetch_sub(1 << order, Ordering::Release);
                return Ok(block.frame);
            }
        }

        Err(oom(count, self.free_frames.load(Ordering::Acquire) as u64))
    }

    fn free(&self, frame: FrameNumber, count: usize) -> KernelResult<()> {
        let order = Self::get_order(count);
        if order >= self.free_lists.len() {
            return Err(KernelError::InvalidParam {
                name: "frame_count",
                value: count,
            });
        }

        let mut current_frame = frame;
        let mut current_order = order;

        while current_order < self.free_lists.len() - 1 {
            let buddy_frame = FrameNumber::new(current_frame.as_u64() ^ (1 << current_order));
            let mut list = self.free_lists[current_order].lock();
            let mut found_buddy = false;

            if let Some(ref mut head) = *list {
                if head.frame == buddy_frame {
                    *list = head.next.take().map(|b| *b);
                    found_buddy = true;
                } else {
                    // SAFETY: raw-pointer walk of a singly linked free list held
                    // exclusively under this order's Mutex; we only detach one
                    // node and stop, so no node is freed while still linked.
                    let mut prev: *mut BuddyBlock = head;
                    unsafe {
                        while let Some(ref mut next_box) = (*prev).next {
                            if next_box.frame == buddy_frame {
                                (*prev).next = next_box.next.take();
                                found_buddy = true;
                                break;
                            }
                            prev = &mut **next_box as *mut BuddyBlock;
                        }
                    }
                }
            }

            if found_buddy {
                current_frame =
                    FrameNumber::new(current_frame.as_u64().min(buddy_frame.as_u64()));
                current_order += 1;
            } else {
                break;
            }
        }

        let mut list = self.free_lists[current_order].lock();
        *list = Some(BuddyBlock {
            frame: current_frame,
            next: list.take().map(Box::new),
        });

        self.free_frames.fetch_add(1 << order, Ordering::Release);
        Ok(())
    }

    fn free_count(&self) -> usize {
        self.free_frames.load(Ordering::Acquire)
    }
}

/// Global physical frame allocator. One instance for the whole machine;
/// NUMA-node dimensioning is deliberately out of scope.
pub struct FrameAllocator {
    bitmap: Mutex<Option<BitmapAllocator>>,
    buddy: Mutex<Option<BuddyAllocator>>,
    allocation_count: AtomicU64,
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            bitmap: Mutex::new(None),
            buddy: Mutex::new(None),
            allocation_count: AtomicU64::new(0),
        }
    }

    /// Initialize from the boot memory map: the first `bitmap_frames`
    /// manage the low range via the bitmap allocator, the remainder via
    /// the buddy allocator.
    pub fn init(&self, start_frame: FrameNumber, frame_count: usize) {
        let bitmap_frames = frame_count.min(2048 * 64);
        let buddy_frames = frame_count.saturating_sub(bitmap_frames);

        if bitmap_frames > 0 {
            *self.bitmap.lock() = Some(BitmapAllocator::new(start_frame, bitmap_frames));
        }
        if buddy_frames > 0 {
            let buddy_start = FrameNumber::new(start_frame.as_u64() + bitmap_frames as u64);
            *self.buddy.lock() = Some(BuddyAllocator::new(buddy_start, buddy_frames));
        }
    }

    /// `allocate(mask, count)`: hand out `count` physically contiguous
    /// frames honoring `mask`'s address-range constraint. Never blocks,
    /// never panics; out-of-memory is a returned error.
    pub fn allocate(&self, mask: AllocMask, count: usize) -> KernelResult<FrameNumber> {
        self.allocation_count.fetch_add(1, Ordering::Relaxed);

        let frame = if count < BITMAP_BUDDY_THRESHOLD {
            self.bitmap
                .lock()
                .as_ref()
                .ok_or(KernelError::NotSupported {
                    operation: "frame allocation before init",
                })
                .and_then(|a| a.allocate(count))
                .or_else(|_| self.allocate_buddy(count))?
        } else {
            self.allocate_buddy(count)?
        };

        if let Some(zone) = mask.zone() {
            if !zone.contains(frame) {
                let _ = self.free(frame, count);
                return Err(oom(count, 0));
            }
        }
        Ok(frame)
    }

    fn allocate_buddy(&self, count: usize) -> KernelResult<FrameNumber> {
        self.buddy
            .lock()
            .as_ref()
            .ok_or(KernelError::NotSupported {
                operation: "frame allocation before init",
            })
            .and_then(|a| a.allocate(count))
    }

    /// `free(frame)`: return `count` contiguous frames to the allocator
    /// they were drawn from.
    pub fn free(&self, frame: FrameNumber, count: usize) -> KernelResult<()> {
        if let Some(ref a) = *self.bitmap.lock() {
            if a.free(frame, count).is_ok() {
                return Ok(());
            }
        }
        if let Some(ref a) = *self.buddy.lock() {
            if a.free(frame, count).is_ok() {
                return Ok(());
            }
        }
        Err(KernelError::InvalidParam {
            name: "frame",
            value: frame.as_u64() as usize,
        })
    }

    /// Mark a frame already in use so it is never handed out (protects
    /// boot-time page tables and the kernel image).
    pub fn mark_frame_used(&self, frame: FrameNumber) {
        if let Some(ref a) = *self.bitmap.lock() {
            a.mark_used(frame);
        }
    }

    pub fn stats(&self) -> FrameAllocatorStats {
        let mut free_frames = 0u64;
        let mut total = 0u64;
        if let Some(ref a) = *self.bitmap.lock() {
            free_frames += a.free_count() as u64;
            total += a.total_frames as u64;
        }
        if let Some(ref a) = *self.buddy.lock() {
            free_frames += a.free_count() as u64;
            total += a.total_frames as u64;
        }
        FrameAllocatorStats {
            total_frames: total,
            free_frames,
        }
    }

    /// Allocate a single frame with an RAII guard that frees it on drop.
    pub fn allocate_frame_raii(&'static self) -> KernelResult<FrameGuard> {
        let frame_num = self.allocate(AllocMask::Any, 1)?;
        Ok(FrameGuard::new(PhysicalFrame::new(frame_num), self))
    }

    /// Allocate `count` contiguous frames with an RAII guard.
    pub fn allocate_frames_raii(&'static self, count: usize) -> KernelResult<FramesGuard> {
        let start_frame = self.allocate(AllocMask::Any, count)?;
        let mut frames = Vec::with_capacity(count);
        for i in 0..count {
            frames.push(PhysicalFrame::new(FrameNumber(start_frame.0 + i as u64)));
        }
        Ok(FramesGuard::new(frames, self))
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// The global physical frame allocator.
pub static FRAME_ALLOCATOR: FrameAllocator = FrameAllocator::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_allocate_and_free_roundtrip() {
        let fa = FrameAllocator::new();
        fa.init(FrameNumber::new(16), 1024);
        let frame = fa.allocate(AllocMask::Any, 4).unwrap();
        fa.free(frame, 4).unwrap();
        let frame2 = fa.allocate(AllocMask::Any, 4).unwrap();
        assert_eq!(frame, frame2);
    }

    #[test]
    fn dma_mask_constrains_zone() {
        let fa = FrameAllocator::new();
        fa.init(FrameNumber::new(0), 8192);
        let frame = fa.allocate(AllocMask::Below16M, 1).unwrap();
        assert!(MemoryZone::Dma.contains(frame));
    }

    #[test]
    fn out_of_memory_never_panics() {
        let fa = FrameAllocator::new();
        fa.init(FrameNumber::new(0), 4);
        assert!(fa.allocate(AllocMask::Any, 1_000_000).is_err());
    }
}
