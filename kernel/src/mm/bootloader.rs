//! Bootloader memory map integration.
//!
//! Turns the firmware-provided memory map into the single usable frame range
//! handed to [`FRAME_ALLOCATOR`], per `spec.md` §3.A: "created at boot from
//! firmware memory map minus kernel/ramdisk ranges."

#![allow(dead_code)]

use super::frame_allocator::{FrameNumber, FRAME_ALLOCATOR, FRAME_SIZE};
use crate::println;

extern crate alloc;
use alloc::vec::Vec;

/// Memory region type as reported by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionType {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    KernelAndModules,
    BootloaderReclaimable,
    Framebuffer,
    Unknown(u32),
}

/// A single entry of the bootloader's memory map.
#[derive(Debug, Clone, Copy)]
pub struct BootloaderMemoryRegion {
    pub start: u64,
    pub size: u64,
    pub region_type: MemoryRegionType,
}

impl BootloaderMemoryRegion {
    pub const fn new(start: u64, size: u64, region_type: MemoryRegionType) -> Self {
        Self {
            start,
            size,
            region_type,
        }
    }

    pub const fn is_usable(&self) -> bool {
        matches!(self.region_type, MemoryRegionType::Usable)
    }
}

/// Parse an E820 memory map (x86_64 BIOS).
#[cfg(target_arch = "x86_64")]
pub fn parse_e820_map(entries: &[(u64, u64, u32)]) -> Vec<BootloaderMemoryRegion> {
    entries
        .iter()
        .map(|&(base, length, typ)| {
            let region_type = match typ {
                1 => MemoryRegionType::Usable,
                2 => MemoryRegionType::Reserved,
                3 => MemoryRegionType::AcpiReclaimable,
                4 => MemoryRegionType::AcpiNvs,
                5 => MemoryRegionType::BadMemory,
                _ => MemoryRegionType::Unknown(typ),
            };
            BootloaderMemoryRegion::new(base, length, region_type)
        })
        .collect()
}

/// Process the bootloader's memory map and initialize the frame allocator
/// over the single largest usable region, marking the rest reserved by
/// simply never handing it out (`FRAME_ALLOCATOR` only manages the chosen
/// range; kernel image, ramdisk, and firmware-reserved regions outside it
/// are implicitly excluded).
pub fn process_memory_map(regions: &[BootloaderMemoryRegion]) {
    let mut total_memory = 0u64;
    let mut best: Option<(u64, u64)> = None;

    for region in regions {
        total_memory += region.size;
        if !region.is_usable() {
            continue;
        }
        let frame_count = region.size / FRAME_SIZE as u64;
        if frame_count < 16 {
            continue;
        }
        if best.map(|(_, sz)| region.size > sz).unwrap_or(true) {
            best = Some((region.start, region.size));
        }
    }

    if let Some((start, size)) = best {
        let start_frame = start.div_ceil(FRAME_SIZE as u64);
        let frame_count = (size / FRAME_SIZE as u64) as usize;
        FRAME_ALLOCATOR.init(FrameNumber::new(start_frame), frame_count);
        println!(
            "[boot] frame allocator: {} MiB usable at {:#x}, {} MiB total reported",
            size / (1024 * 1024),
            start,
            total_memory / (1024 * 1024)
        );
    } else {
        println!("[boot] warning: no usable memory region found in boot memory map");
    }
}

/// Reserve the low-memory region (real-mode IVT/BDA, legacy video memory)
/// inside the frame allocator's managed range so it is never handed out.
pub fn reserve_standard_regions() {
    for frame in 0..256u64 {
        FRAME_ALLOCATOR.mark_frame_used(FrameNumber::new(frame));
    }
    for frame in 0xA0..0x100u64 {
        FRAME_ALLOCATOR.mark_frame_used(FrameNumber::new(frame));
    }
}
