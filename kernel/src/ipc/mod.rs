//! Inter-process communication: stream-buffer channels addressed by
//! [`crate::handle::Handle`].
//!
//! See `SPEC_FULL.md` §4.G for the wire format and context lifecycle this
//! module implements.

pub mod context;
pub mod message;
pub mod stream_buffer;

pub use context::IpcContext;
pub use message::{BaseHeader, Param, ParamKind, ResponseHeader};
pub use stream_buffer::StreamBuffer;

/// IPC subsystem initialization; currently nothing needs eager setup since
/// contexts and their stream buffers are created on demand.
pub fn init() {
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: uart_write_str performs raw MMIO writes to the PL011 UART at
        // 0x09000000 (QEMU virt machine), fixed-address and side-effect-free.
        unsafe {
            use crate::arch::aarch64::direct_uart::uart_write_str;
            uart_write_str("[IPC] ready\n");
        }
    }
    #[cfg(target_arch = "x86_64")]
    println!("[IPC] ready");
}
