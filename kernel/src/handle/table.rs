//! Global handle table: a generation-checked arena backing every handle
//! issued to userspace.

extern crate alloc;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};

use super::object::{HandleKind, KernelObject};
use super::Handle;

struct Slot {
    generation: u32,
    object: Option<KernelObject>,
    /// `SetActivity`: whether a [`HandleSet`](super::set::HandleSet)
    /// listening on this handle should consider it signaled.
    active: bool,
}

pub struct HandleTable {
    slots: Mutex<Vec<Slot>>,
    free: Mutex<Vec<u32>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            free: Mutex::new(Vec::new()),
        }
    }

    /// `HandleCreate`: register `object` and return a fresh handle for it.
    pub fn create(&self, object: KernelObject) -> Handle {
        let kind = object.kind();
        let mut slots = self.slots.lock();
        if let Some(index) = self.free.lock().pop() {
            let slot = &mut slots[index as usize];
            slot.object = Some(object);
            slot.active = false;
            return Handle::new(index, slot.generation, kind);
        }
        let index = slots.len() as u32;
        slots.push(Slot {
            generation: 0,
            object: Some(object),
            active: false,
        });
        Handle::new(index, 0, kind)
    }

    fn check(slots: &[Slot], handle: Handle) -> KernelResult<usize> {
        let index = handle.index() as usize;
        let Some(slot) = slots.get(index) else {
            return Err(KernelError::NotFound {
                resource: "handle",
                id: handle.as_u64(),
            });
        };
        if slot.generation != handle.generation() || slot.object.is_none() {
            return Err(KernelError::NotFound {
                resource: "handle",
                id: handle.as_u64(),
            });
        }
        Ok(index)
    }

    /// `HandleLookup`: resolve a handle to its object, cloning the
    /// reference-counted handle (cheap for every variant).
    pub fn lookup(&self, handle: Handle) -> KernelResult<KernelObject> {
        let slots = self.slots.lock();
        let index = Self::check(&slots, handle)?;
        Ok(slots[index].object.clone().expect("checked Some above"))
    }

    /// `HandleDestroy`: release a handle. Bumps the slot's generation so
    /// stale copies of the same raw value are rejected.
    pub fn destroy(&self, raw: u64) -> KernelResult<()> {
        let handle = Handle::from_u64(raw);
        let mut slots = self.slots.lock();
        let index = Self::check(&slots, handle)?;
        slots[index].object = None;
        slots[index].generation = slots[index].generation.wrapping_add(1) & 0x00FF_FFFF;
        slots[index].active = false;
        self.free.lock().push(index as u32);
        Ok(())
    }

    /// `HandleSetActivity`: mark a handle signaled/unsignaled for any
    /// handle set listening on it.
    pub fn set_active(&self, handle: Handle, active: bool) -> KernelResult<()> {
        let mut slots = self.slots.lock();
        let index = Self::check(&slots, handle)?;
        slots[index].active = active;
        Ok(())
    }

    pub fn is_active(&self, handle: Handle) -> KernelResult<bool> {
        let slots = self.slots.lock();
        let index = Self::check(&slots, handle)?;
        Ok(slots[index].active)
    }

    pub fn kind_of(&self, handle: Handle) -> KernelResult<HandleKind> {
        let slots = self.slots.lock();
        let index = Self::check(&slots, handle)?;
        Ok(slots[index].object.as_ref().expect("checked Some above").kind())
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// The system-wide handle table.
    pub static ref HANDLES: HandleTable = HandleTable::new();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::region::MemoryRegion;
    use alloc::sync::Arc;

    #[test]
    fn destroy_then_lookup_fails() {
        let table = HandleTable::new();
        let region = MemoryRegion::new(4096, true).unwrap();
        let h = table.create(KernelObject::MemoryRegion(Arc::new(region)));
        assert!(table.lookup(h).is_ok());
        table.destroy(h.as_u64()).unwrap();
        assert!(table.lookup(h).is_err());
    }

    #[test]
    fn stale_generation_is_rejected_after_reuse() {
        let table = HandleTable::new();
        let region = MemoryRegion::new(4096, true).unwrap();
        let h1 = table.create(KernelObject::MemoryRegion(Arc::new(region)));
        table.destroy(h1.as_u64()).unwrap();
        let region2 = MemoryRegion::new(4096, true).unwrap();
        let h2 = table.create(KernelObject::MemoryRegion(Arc::new(region2)));
        assert_eq!(h1.index(), h2.index());
        assert!(table.lookup(h1).is_err());
        assert!(table.lookup(h2).is_ok());
    }
}
