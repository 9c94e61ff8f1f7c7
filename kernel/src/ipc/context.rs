//! IPC context: the kernel-side object backing a pair of communicating
//! threads' shared stream buffer. Grounded on `IpcContext_t` and
//! `IpcContextCreate` in `ipc_context.c`.

extern crate alloc;
use alloc::sync::Arc;

use crate::error::KernelResult;
use crate::handle::object::KernelObject;
use crate::handle::table::HANDLES;
use crate::handle::Handle;
use crate::mm::region::MemoryRegion;
use crate::sched::task::ThreadId;

use super::stream_buffer::StreamBuffer;

/// Default size of an IPC context's backing stream buffer.
pub const DEFAULT_STREAM_SIZE: usize = 16 * 1024;

pub struct IpcContext {
    pub creator: ThreadId,
    /// Handle to the [`MemoryRegion`] backing `stream`, kept alive so a
    /// peer attaching this context can map the same pages.
    pub region: Handle,
    pub stream: StreamBuffer,
}

impl IpcContext {
    /// `IpcContextCreate`: allocate a stream buffer of `size` bytes,
    /// register it as a [`MemoryRegion`], and wrap both in a new context.
    pub fn create(creator: ThreadId, size: usize) -> KernelResult<Handle> {
        let region = MemoryRegion::new(size, true)?;
        let region_handle = HANDLES.create(KernelObject::MemoryRegion(Arc::new(region)));
        let stream = StreamBuffer::new(size.next_power_of_two())?;
        let context = Arc::new(IpcContext {
            creator,
            region: region_handle,
            stream,
        });
        Ok(HANDLES.create(KernelObject::IpcContext(context)))
    }
}

/// Look up a live IPC context by handle, validating its type tag.
pub fn lookup(handle: Handle) -> KernelResult<Arc<IpcContext>> {
    match HANDLES.lookup(handle)? {
        KernelObject::IpcContext(ctx) => Ok(ctx),
        _ => Err(crate::error::KernelError::InvalidParam {
            name: "handle",
            value: handle.as_u64() as usize,
        }),
    }
}

impl Drop for IpcContext {
    fn drop(&mut self) {
        let _ = HANDLES.destroy(self.region.as_u64());
    }
}
