//! Virtual address space engine.
//!
//! One `VirtualAddressSpace` per process. Owns a page-table hierarchy, a
//! mapping index recording each region's commit state and kind, and a
//! handler list consulted by the page-fault path before falling back to
//! stack-growth/signal delivery.

#![allow(clippy::manual_div_ceil)]

use core::sync::atomic::{AtomicU64, Ordering};

extern crate alloc;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

use super::frame_allocator::{AllocMask, FrameNumber, FRAME_ALLOCATOR};
use super::heap_pool::HeapPool;
use super::page_table::{PageMapper, PageTable, PageTableHierarchy, PAGE_TABLE_ENTRIES};
use super::{phys_to_virt_addr, MapOptions, PageFlags, Placement, SpaceFlags, VirtualAddress, FRAME_SIZE};

/// Base of the per-process auto-placement window (128 TiB region).
const PROCESS_POOL_BASE: u64 = 0x0000_2000_0000_0000;
const PROCESS_POOL_SPAN: u64 = 0x0000_1000_0000_0000;

/// What a mapping is used for; descriptive only, consulted by `Query` and
/// by the page-fault handler's repair strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Code,
    Data,
    Stack,
    Heap,
    Shared,
    Device,
}

impl MappingKind {
    fn default_flags(self) -> PageFlags {
        match self {
            MappingKind::Code => PageFlags::PRESENT | PageFlags::USER,
            MappingKind::Data => PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
            MappingKind::Stack => {
                PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER | PageFlags::NO_EXECUTE
            }
            MappingKind::Heap => {
                PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER | PageFlags::NO_EXECUTE
            }
            MappingKind::Shared => PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
            MappingKind::Device => PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NOCACHE,
        }
    }
}

/// Whether a reserved range has backing frames yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Reserved,
    Committed,
}

/// A tracked region of a `VirtualAddressSpace`.
#[derive(Debug, Clone)]
pub struct VirtualMapping {
    pub start: VirtualAddress,
    pub size: usize,
    pub kind: MappingKind,
    pub flags: PageFlags,
    pub state: CommitState,
    pub persistent: bool,
    pub frames: Vec<FrameNumber>,
}

impl VirtualMapping {
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end().as_u64()
    }

    pub fn end(&self) -> VirtualAddress {
        self.start.add(self.size)
    }
}

/// Called when a fault lands inside a range registered via
/// [`VirtualAddressSpace::register_mapping_handler`], before the generic
/// commit-on-fault/stack-growth/signal paths are tried.
pub type HandlerFn = fn(&VirtualAddressSpace, VirtualAddress) -> KernelResult<()>;

/// Batched TLB flush accumulator. Collects up to `MAX_BATCH` virtual
/// addresses; beyond that a full flush is cheaper than per-page `invlpg`.
pub struct TlbFlushBatch {
    addresses: [u64; Self::MAX_BATCH],
    count: usize,
}

impl Default for TlbFlushBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl TlbFlushBatch {
    const MAX_BATCH: usize = 16;

    pub const fn new() -> Self {
        Self {
            addresses: [0; Self::MAX_BATCH],
            count: 0,
        }
    }

    #[inline]
    pub fn add(&mut self, vaddr: u64) {
        if self.count < Self::MAX_BATCH {
            self.addresses[self.count] = vaddr;
        }
        self.count += 1;
    }

    pub fn flush(self) {
        if self.count == 0 {
            return;
        }
        if self.count > Self::MAX_BATCH {
            crate::arch::tlb_flush_all();
        } else {
            for addr in &self.addresses[..self.count] {
                crate::arch::tlb_flush_address(*addr);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// A process's (or the kernel's) virtual address space: page tables plus
/// the mapping index tracking what each range is for and whether it is
/// committed.
pub struct VirtualAddressSpace {
    pub page_table_root: AtomicU64,
    flags: SpaceFlags,
    mappings: Mutex<BTreeMap<u64, VirtualMapping>>,
    mapping_handlers: Mutex<BTreeMap<u64, HandlerFn>>,
    process_pool: HeapPool,
    pub tlb_generation: AtomicU64,
}

impl VirtualAddressSpace {
    /// `Create`: allocate a fresh page-table hierarchy and mirror the
    /// kernel's upper-half mapping into it so syscalls remain reachable
    /// while running on this space's page tables.
    pub fn new(flags: SpaceFlags) -> KernelResult<Self> {
        let hierarchy = PageTableHierarchy::new()?;
        let space = Self {
            page_table_root: AtomicU64::new(hierarchy.l4_addr().as_u64()),
            flags,
            mappings: Mutex::new(BTreeMap::new()),
            mapping_handlers: Mutex::new(BTreeMap::new()),
            process_pool: HeapPool::new(PROCESS_POOL_BASE, PROCESS_POOL_SPAN),
            tlb_generation: AtomicU64::new(0),
        };
        space.map_kernel_space();
        Ok(space)
    }

    fn l4_virt(&self) -> *mut PageTable {
        let phys = self.page_table_root.load(Ordering::Acquire);
        phys_to_virt_addr(phys) as *mut PageTable
    }

    fn mapper(&self) -> PageMapper {
        // SAFETY: `page_table_root` always points at a live L4 table owned
        // by this space, reachable through the kernel's physical mapping.
        unsafe { PageMapper::new(self.l4_virt()) }
    }

    /// Copy the upper-half (indices 256..512) L4 entries from the
    /// currently active page table, sharing kernel code/data/heap/MMIO
    /// mappings across every address space.
    fn map_kernel_space(&self) {
        let boot_root = super::page_table::ActivePageTable::current().l4_phys().as_u64();
        if boot_root == 0 {
            return;
        }
        // SAFETY: both tables are valid L4 roots reachable through the
        // kernel's physical mapping; we only copy raw entry bit patterns.
        unsafe {
            let boot_l4 = &*(phys_to_virt_addr(boot_root) as *const PageTable);
            let new_l4 = &mut *self.l4_virt();
            for idx in 256..PAGE_TABLE_ENTRIES {
                new_l4[idx] = boot_l4[idx];
            }
        }
    }

    /// `Switch`: make this space's page tables active on the current CPU.
    pub fn switch(&self) {
        let root = super::frame_allocator::PhysicalAddress::new(self.page_table_root.load(Ordering::Acquire));
        super::page_table::ActivePageTable::from_phys(root).make_active();
    }

    fn insert_mapping(&self, mapping: VirtualMapping) {
        self.mappings.lock().insert(mapping.start.as_u64(), mapping);
    }

    fn find_mapping_key(mappings: &BTreeMap<u64, VirtualMapping>, addr: VirtualAddress) -> Option<u64> {
        mappings
            .range(..=addr.as_u64())
            .next_back()
            .filter(|(_, m)| m.contains(addr))
            .map(|(&k, _)| k)
    }

    fn pick_base(&self, placement: Placement, size: usize, options: MapOptions) -> KernelResult<VirtualAddress> {
        match placement {
            Placement::Fixed(addr) => {
                if !options.contains(MapOptions::FIXED) {
                    return Err(KernelError::InvalidParam {
                        name: "placement",
                        value: addr.as_u64() as usize,
                    });
                }
                let mappings = self.mappings.lock();
                let end = addr.add(size);
                for m in mappings.values() {
                    if addr.as_u64() < m.end().as_u64() && m.start.as_u64() < end.as_u64() {
                        return Err(KernelError::Exists {
                            resource: "mapping",
                            id: addr.as_u64(),
                        });
                    }
                }
                Ok(addr)
            }
            Placement::Process | Placement::Thread | Placement::Global => {
                self.process_pool.alloc(size as u64, FRAME_SIZE as u64)
            }
        }
    }

    /// `Map`: reserve (and optionally commit) a range of `size` bytes,
    /// auto-placed or `FIXED` per `placement`.
    pub fn map(&self, placement: Placement, size: usize, kind: MappingKind, options: MapOptions) -> KernelResult<VirtualAddress> {
        if size == 0 || size % FRAME_SIZE != 0 {
            return Err(KernelError::InvalidParam {
                name: "size",
                value: size,
            });
        }
        let base = self.pick_base(placement, size, options)?;
        let mut flags = kind.default_flags();
        if options.contains(MapOptions::READONLY) {
            flags.remove(PageFlags::WRITABLE);
        }
        if options.contains(MapOptions::EXECUTABLE) {
            flags.remove(PageFlags::NO_EXECUTE);
        }
        if options.contains(MapOptions::NOCACHE) {
            flags |= PageFlags::NOCACHE;
        }
        if !options.contains(MapOptions::USERSPACE) {
            flags.remove(PageFlags::USER);
        }

        let page_count = size / FRAME_SIZE;
        let mut frames = Vec::new();
        let state = if options.contains(MapOptions::COMMIT) {
            let mapper = &mut self.mapper();
            for i in 0..page_count {
                let frame = FRAME_ALLOCATOR.allocate(AllocMask::Any, 1).inspect_err(|_| {
                    for (j, f) in frames.iter().enumerate() {
                        let _ = mapper.unmap_page(base.add(j * FRAME_SIZE));
                        let _ = FRAME_ALLOCATOR.free(*f, 1);
                    }
                })?;
                mapper.map_page(base.add(i * FRAME_SIZE), frame, flags)?;
                frames.push(frame);
            }
            CommitState::Committed
        } else {
            CommitState::Reserved
        };

        self.insert_mapping(VirtualMapping {
            start: base,
            size,
            kind,
            flags,
            state,
            persistent: options.contains(MapOptions::PERSISTENT),
            frames,
        });
        self.tlb_generation.fetch_add(1, Ordering::Release);
        Ok(base)
    }

    /// `MapContiguous`: map an already-owned contiguous physical range
    /// (MMIO, framebuffers) at a caller-chosen or auto-placed address.
    pub fn map_contiguous(&self, placement: Placement, phys_base: FrameNumber, size: usize, options: MapOptions) -> KernelResult<VirtualAddress> {
        if size == 0 || size % FRAME_SIZE != 0 {
            return Err(KernelError::InvalidParam {
                name: "size",
                value: size,
            });
        }
        let base = self.pick_base(placement, size, options)?;
        let mut flags = MappingKind::Device.default_flags();
        if options.contains(MapOptions::READONLY) {
            flags.remove(PageFlags::WRITABLE);
        }

        let page_count = size / FRAME_SIZE;
        let mapper = &mut self.mapper();
        for i in 0..page_count {
            let frame = FrameNumber::new(phys_base.as_u64() + i as u64);
            mapper.map_page(base.add(i * FRAME_SIZE), frame, flags)?;
        }

        self.insert_mapping(VirtualMapping {
            start: base,
            size,
            kind: MappingKind::Device,
            flags,
            state: CommitState::Committed,
            persistent: true,
            frames: Vec::new(),
        });
        self.tlb_generation.fetch_add(1, Ordering::Release);
        Ok(base)
    }

    /// `MapReserved`: shorthand for `Map` without `COMMIT`.
    pub fn map_reserved(&self, placement: Placement, size: usize, kind: MappingKind, options: MapOptions) -> KernelResult<VirtualAddress> {
        self.map(placement, size, kind, options & !MapOptions::COMMIT)
    }

    /// Map an externally-owned set of frames (shared-memory regions) into
    /// this space, auto-placed, committed and persistent.
    pub fn map_shared_frames(&self, frames: &[FrameNumber], flags: PageFlags) -> KernelResult<VirtualAddress> {
        let size = frames.len() * FRAME_SIZE;
        let base = self.process_pool.alloc(size as u64, FRAME_SIZE as u64)?;
        let mapper = &mut self.mapper();
        for (i, frame) in frames.iter().enumerate() {
            mapper.map_page(base.add(i * FRAME_SIZE), *frame, flags)?;
        }
        self.insert_mapping(VirtualMapping {
            start: base,
            size,
            kind: MappingKind::Shared,
            flags,
            state: CommitState::Committed,
            persistent: true,
            frames: Vec::new(),
        });
        self.tlb_generation.fetch_add(1, Ordering::Release);
        Ok(base)
    }

    /// `Commit`: realize a reserved-but-uncommitted mapping covering
    /// `addr`. Used by the page-fault handler's commit-on-fault path.
    pub fn commit(&self, addr: VirtualAddress) -> KernelResult<()> {
        let mut mappings = self.mappings.lock();
        let key = Self::find_mapping_key(&mappings, addr).ok_or(KernelError::NotFound {
            resource: "mapping",
            id: addr.as_u64(),
        })?;
        let mapping = mappings.get_mut(&key).unwrap();
        if mapping.state == CommitState::Committed {
            return Ok(());
        }

        let page_count = mapping.size / FRAME_SIZE;
        let mut frames = Vec::with_capacity(page_count);
        let mapper = &mut self.mapper();
        for i in 0..page_count {
            let frame = FRAME_ALLOCATOR.allocate(AllocMask::Any, 1).inspect_err(|_| {
                for (j, f) in frames.iter().enumerate() {
                    let _ = mapper.unmap_page(mapping.start.add(j * FRAME_SIZE));
                    let _ = FRAME_ALLOCATOR.free(*f, 1);
                }
            })?;
            mapper.map_page(mapping.start.add(i * FRAME_SIZE), frame, mapping.flags)?;
            frames.push(frame);
        }
        mapping.frames = frames;
        mapping.state = CommitState::Committed;
        Ok(())
    }

    /// `Unmap`: remove the mapping starting at `addr`, freeing its frames
    /// unless `PERSISTENT` (shared-memory attachments outlive any single
    /// space's unmap).
    pub fn unmap(&self, addr: u64, _size: usize) -> KernelResult<()> {
        let mapping = self
            .mappings
            .lock()
            .remove(&addr)
            .ok_or(KernelError::NotFound {
                resource: "mapping",
                id: addr,
            })?;

        let mut batch = TlbFlushBatch::new();
        let mapper = &mut self.mapper();
        let page_count = mapping.size / FRAME_SIZE;
        for i in 0..page_count {
            let page = mapping.start.add(i * FRAME_SIZE);
            if let Ok(frame) = mapper.unmap_page(page) {
                batch.add(page.as_u64());
                if !mapping.persistent {
                    let _ = FRAME_ALLOCATOR.free(frame, 1);
                }
            }
        }
        batch.flush();
        self.tlb_generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// `ChangeProtection`: update the page flags of the mapping starting
    /// at `addr`.
    pub fn change_protection(&self, addr: VirtualAddress, flags: PageFlags) -> KernelResult<()> {
        let mut mappings = self.mappings.lock();
        let key = Self::find_mapping_key(&mappings, addr).ok_or(KernelError::NotFound {
            resource: "mapping",
            id: addr.as_u64(),
        })?;
        let mapping = mappings.get_mut(&key).unwrap();
        mapping.flags = flags | PageFlags::PRESENT;

        if mapping.state == CommitState::Committed {
            let mapper = &mut self.mapper();
            let page_count = mapping.size / FRAME_SIZE;
            let mut batch = TlbFlushBatch::new();
            for i in 0..page_count {
                let page = mapping.start.add(i * FRAME_SIZE);
                if let Ok(frame) = mapper.unmap_page(page) {
                    mapper.map_page(page, frame, mapping.flags)?;
                    batch.add(page.as_u64());
                }
            }
            batch.flush();
        }
        Ok(())
    }

    /// `GetMapping` / `Query`: the tracked mapping containing `addr`.
    pub fn get_mapping(&self, addr: VirtualAddress) -> Option<VirtualMapping> {
        let mappings = self.mappings.lock();
        Self::find_mapping_key(&mappings, addr).and_then(|k| mappings.get(&k).cloned())
    }

    /// `Clone`: share this mapping's physical frames into `dest`,
    /// committed, `PERSISTENT`, read-only unless `writable`. Refuses
    /// unmapped or reserved-only source ranges — there are no frames to
    /// share yet.
    pub fn clone_region(&self, addr: VirtualAddress, dest: &VirtualAddressSpace, writable: bool) -> KernelResult<VirtualAddress> {
        let mapping = self.get_mapping(addr).ok_or(KernelError::NotFound {
            resource: "mapping",
            id: addr.as_u64(),
        })?;
        if mapping.state != CommitState::Committed || mapping.frames.is_empty() {
            return Err(KernelError::InvalidParam {
                name: "addr",
                value: addr.as_u64() as usize,
            });
        }
        let mut flags = mapping.flags | PageFlags::PRESENT;
        if !writable {
            flags.remove(PageFlags::WRITABLE);
        }
        dest.map_shared_frames(&mapping.frames, flags)
    }

    /// Frame-by-frame copy of every committed, non-persistent mapping into
    /// `dest` — the `fork()` path, distinct from `clone_region`'s
    /// page-sharing semantics.
    pub fn fork_copy(&self, dest: &VirtualAddressSpace) -> KernelResult<()> {
        let source_mappings: Vec<VirtualMapping> = self.mappings.lock().values().cloned().collect();
        for mapping in source_mappings {
            if mapping.persistent {
                // Shared mappings are re-attached, not duplicated.
                if !mapping.frames.is_empty() {
                    dest.map_shared_frames(&mapping.frames, mapping.flags)?;
                }
                continue;
            }

            let mut options = MapOptions::USERSPACE;
            if mapping.state == CommitState::Committed {
                options |= MapOptions::COMMIT;
            }
            dest.map(Placement::Fixed(mapping.start), mapping.size, mapping.kind, options | MapOptions::FIXED)?;

            if mapping.state == CommitState::Committed {
                let src_mapper = &self.mapper();
                for i in 0..mapping.size / FRAME_SIZE {
                    let page = mapping.start.add(i * FRAME_SIZE);
                    if let Some((frame, _)) = src_mapper.translate(page) {
                        // SAFETY: both addresses are kernel-reachable
                        // aliases of distinct, page-sized physical frames.
                        unsafe {
                            let src = phys_to_virt_addr(frame.as_addr().as_u64()) as *const u8;
                            let dst_frame = dest.get_mapping(mapping.start).and_then(|m| m.frames.get(i).copied());
                            if let Some(dst_frame) = dst_frame {
                                let dst = phys_to_virt_addr(dst_frame.as_addr().as_u64()) as *mut u8;
                                core::ptr::copy_nonoverlapping(src, dst, FRAME_SIZE);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Register a handler consulted by the page-fault path before the
    /// generic commit-on-fault/stack-growth/signal fallbacks, keyed by the
    /// start address of the range it covers.
    pub fn register_mapping_handler(&self, start: VirtualAddress, handler: HandlerFn) {
        self.mapping_handlers.lock().insert(start.as_u64(), handler);
    }

    pub fn mapping_handler_for(&self, addr: VirtualAddress) -> Option<HandlerFn> {
        let mappings = self.mappings.lock();
        let key = Self::find_mapping_key(&mappings, addr)?;
        self.mapping_handlers.lock().get(&key).copied()
    }

    /// `Destroy`: free every non-persistent committed mapping's frames,
    /// walk and free every intermediate page-table frame, then free the L4
    /// root. Persistent (shared) mappings are left for their other
    /// attachments to release.
    pub fn destroy(&self) {
        let mappings = core::mem::take(&mut *self.mappings.lock());
        if !self.flags.contains(SpaceFlags::KERNEL) {
            for mapping in mappings.values() {
                if mapping.persistent {
                    continue;
                }
                for frame in &mapping.frames {
                    let _ = FRAME_ALLOCATOR.free(*frame, 1);
                }
            }
        }
        let freed = free_user_page_table_frames(self.page_table_root.load(Ordering::Acquire));
        log::trace!("address space destroyed, {} page-table frames freed", freed);
    }
}

/// Walk the L4 table's user-space half (indices 0..256) freeing every
/// present L3/L2/L1 table frame, then free the L4 frame itself. Indices
/// 256..511 are the kernel-space mirror and are never freed here.
fn free_user_page_table_frames(l4_phys: u64) -> usize {
    if l4_phys == 0 {
        return 0;
    }
    let mut freed = 0usize;

    // SAFETY: l4_phys is a valid L4 table physical address reachable
    // through the kernel's physical memory mapping.
    let l4_table = unsafe { &*(phys_to_virt_addr(l4_phys) as *const PageTable) };

    for l4_idx in 0..256 {
        let l4_entry = &l4_table[l4_idx];
        if !l4_entry.is_present() {
            continue;
        }
        let l3_phys = l4_entry.addr().unwrap().as_u64();
        // SAFETY: present entries point at valid page-table frames.
        let l3_table = unsafe { &*(phys_to_virt_addr(l3_phys) as *const PageTable) };
        for l3_idx in 0..PAGE_TABLE_ENTRIES {
            let l3_entry = &l3_table[l3_idx];
            if !l3_entry.is_present() || l3_entry.flags().contains(PageFlags::HUGE) {
                continue;
            }
            let l2_phys = l3_entry.addr().unwrap().as_u64();
            // SAFETY: present entries point at valid page-table frames.
            let l2_table = unsafe { &*(phys_to_virt_addr(l2_phys) as *const PageTable) };
            for l2_idx in 0..PAGE_TABLE_ENTRIES {
                let l2_entry = &l2_table[l2_idx];
                if !l2_entry.is_present() || l2_entry.flags().contains(PageFlags::HUGE) {
                    continue;
                }
                let l1_phys = l2_entry.addr().unwrap().as_u64();
                let _ = FRAME_ALLOCATOR.free(FrameNumber::new(l1_phys / FRAME_SIZE as u64), 1);
                freed += 1;
            }
            let _ = FRAME_ALLOCATOR.free(FrameNumber::new(l2_phys / FRAME_SIZE as u64), 1);
            freed += 1;
        }
        let _ = FRAME_ALLOCATOR.free(FrameNumber::new(l3_phys / FRAME_SIZE as u64), 1);
        freed += 1;
    }

    let _ = FRAME_ALLOCATOR.free(FrameNumber::new(l4_phys / FRAME_SIZE as u64), 1);
    freed += 1;
    freed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_allocator() {
        FRAME_ALLOCATOR.init(FrameNumber::new(256), 8192);
    }

    #[test]
    fn map_commit_and_unmap_roundtrip() {
        init_allocator();
        let space = VirtualAddressSpace::new(SpaceFlags::APPLICATION).unwrap();
        let addr = space
            .map(Placement::Process, FRAME_SIZE, MappingKind::Data, MapOptions::COMMIT | MapOptions::USERSPACE)
            .unwrap();
        assert!(space.get_mapping(addr).is_some());
        space.unmap(addr.as_u64(), FRAME_SIZE).unwrap();
        assert!(space.get_mapping(addr).is_none());
    }

    #[test]
    fn reserved_mapping_commits_on_fault() {
        init_allocator();
        let space = VirtualAddressSpace::new(SpaceFlags::APPLICATION).unwrap();
        let addr = space
            .map_reserved(Placement::Process, FRAME_SIZE, MappingKind::Heap, MapOptions::USERSPACE)
            .unwrap();
        let mapping = space.get_mapping(addr).unwrap();
        assert_eq!(mapping.state, CommitState::Reserved);
        space.commit(addr).unwrap();
        let mapping = space.get_mapping(addr).unwrap();
        assert_eq!(mapping.state, CommitState::Committed);
    }

    #[test]
    fn clone_region_requires_committed_source() {
        init_allocator();
        let src = VirtualAddressSpace::new(SpaceFlags::APPLICATION).unwrap();
        let dst = VirtualAddressSpace::new(SpaceFlags::APPLICATION).unwrap();
        let addr = src
            .map_reserved(Placement::Process, FRAME_SIZE, MappingKind::Data, MapOptions::USERSPACE)
            .unwrap();
        assert!(src.clone_region(addr, &dst, false).is_err());
        src.commit(addr).unwrap();
        assert!(src.clone_region(addr, &dst, false).is_ok());
    }
}
