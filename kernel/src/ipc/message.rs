//! IPC wire message format.
//!
//! Every message crossing a stream buffer is `BaseHeader` followed by
//! `param_in` [`Param`] descriptors; a reply is a `ResponseHeader` followed
//! by `param_out` descriptors. Grounded on `ipc_context.c`'s
//! `ipmsg_base`/`ipmsg_resp`/`ipmsg_param` framing.

use core::mem::size_of;

/// What a [`Param`] carries.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `value_or_offset` is the argument itself, no indirection.
    Value = 0,
    /// `value_or_offset` is an offset into the IPC context's stream buffer
    /// where `length` bytes of inline argument data live.
    Buffer = 1,
    /// `value_or_offset` is a [`crate::handle::Handle`] to an attached
    /// [`crate::mm::region::MemoryRegion`].
    Shm = 2,
}

impl ParamKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ParamKind::Value),
            1 => Some(ParamKind::Buffer),
            2 => Some(ParamKind::Shm),
            _ => None,
        }
    }
}

/// One call argument or return value.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub kind: u8,
    pub length: u32,
    pub value_or_offset: u64,
}

impl Param {
    pub const fn value(v: u64) -> Self {
        Self {
            kind: ParamKind::Value as u8,
            length: 0,
            value_or_offset: v,
        }
    }

    pub const fn buffer(offset: u64, length: u32) -> Self {
        Self {
            kind: ParamKind::Buffer as u8,
            length,
            value_or_offset: offset,
        }
    }

    pub const fn shm(handle: u64, length: u32) -> Self {
        Self {
            kind: ParamKind::Shm as u8,
            length,
            value_or_offset: handle,
        }
    }

    pub fn kind(&self) -> Option<ParamKind> {
        ParamKind::from_u8(self.kind)
    }
}

/// Maximum number of [`Param`]s inline in a single message.
pub const MAX_PARAMS: usize = 5;

/// Header prefixing a request written into the sender's stream buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BaseHeader {
    /// Caller-defined protocol identifier, routes to a handler table.
    pub protocol: u32,
    /// Action/opcode within that protocol.
    pub action: u32,
    pub flags: u32,
    pub param_in: u8,
    pub param_out: u8,
    /// Total length of this message including the header, for the
    /// receiver to know how far to advance its read cursor.
    pub length: u32,
    pub params: [Param; MAX_PARAMS],
}

impl BaseHeader {
    pub const fn new(protocol: u32, action: u32, param_in: u8) -> Self {
        Self {
            protocol,
            action,
            flags: 0,
            param_in,
            param_out: 0,
            length: size_of::<Self>() as u32,
            params: [Param::value(0); MAX_PARAMS],
        }
    }

    pub fn with_param(mut self, index: usize, param: Param) -> Self {
        if index < self.param_in as usize {
            self.params[index] = param;
        }
        self
    }
}

/// Header prefixing a reply. `notify_handle`/`notify_method` let the
/// receiver route an asynchronous completion back to the caller's handle
/// set rather than requiring a synchronous wait.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeader {
    pub notify_method: u32,
    pub notify_handle: u64,
    pub dma_handle: u64,
    pub dma_offset: u64,
    pub param_out: u8,
    pub params: [Param; MAX_PARAMS],
}

impl ResponseHeader {
    pub const fn new(param_out: u8) -> Self {
        Self {
            notify_method: 0,
            notify_handle: 0,
            dma_handle: 0,
            dma_offset: 0,
            param_out,
            params: [Param::value(0); MAX_PARAMS],
        }
    }

    pub fn with_param(mut self, index: usize, param: Param) -> Self {
        if index < self.param_out as usize {
            self.params[index] = param;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_kind_round_trips() {
        let p = Param::buffer(0x40, 16);
        assert_eq!(p.kind(), Some(ParamKind::Buffer));
        assert_eq!(p.length, 16);
    }

    #[test]
    fn base_header_carries_params_up_to_param_in() {
        let h = BaseHeader::new(1, 2, 2)
            .with_param(0, Param::value(7))
            .with_param(1, Param::shm(0xdead_beef, 4096))
            .with_param(2, Param::value(99));
        assert_eq!(h.params[0].value_or_offset, 7);
        assert_eq!(h.params[1].kind(), Some(ParamKind::Shm));
        assert_eq!(h.params[2].value_or_offset, 0);
    }
}
