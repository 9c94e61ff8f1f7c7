//! Kernel error types.
//!
//! `KernelError` carries exactly the error kinds surfaced by the core
//! subsystems (scheduler, address-space engine, futex layer, IPC context):
//! no implicit panics in fast paths, every fallible operation returns one of
//! these. `Forked` is never returned across the syscall boundary; it is
//! filtered out by `syscall::dispatch` before the result reaches user space.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Rejected argument values.
    InvalidParam {
        name: &'static str,
        value: usize,
    },
    /// Physical or virtual allocation failed.
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    /// Handle or key absent.
    NotFound {
        resource: &'static str,
        id: u64,
    },
    /// Conflicting FIXED placement or duplicate handle path.
    Exists {
        resource: &'static str,
        id: u64,
    },
    /// Operation disallowed in caller's context (e.g. futex before
    /// the scheduler is up).
    NotSupported {
        operation: &'static str,
    },
    /// Deadline elapsed before wakeup.
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },
    /// Futex value-check failed, or a signal-driven abort.
    Interrupted,
    /// Internal to `ThreadFork`; never returned to userspace.
    Forked,
    /// Resource in use; cannot destroy while references exist.
    Busy {
        resource: &'static str,
    },
    /// Wrong privilege ring.
    Permission {
        operation: &'static str,
    },
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam { name, value } => {
                write!(f, "invalid parameter '{}': 0x{:x}", name, value)
            }
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::NotFound { resource, id } => write!(f, "{} {} not found", resource, id),
            Self::Exists { resource, id } => write!(f, "{} {} already exists", resource, id),
            Self::NotSupported { operation } => write!(f, "not supported: {}", operation),
            Self::Timeout {
                operation,
                duration_ms,
            } => write!(f, "timeout during {}: {} ms", operation, duration_ms),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Forked => write!(f, "forked"),
            Self::Busy { resource } => write!(f, "{} busy", resource),
            Self::Permission { operation } => write!(f, "permission denied: {}", operation),
        }
    }
}

/// Negative-errno-style value written into the trap frame's return slot.
/// `Forked` has no ABI representation; callers must never let it reach
/// `dispatch`'s final conversion.
impl From<KernelError> for i64 {
    fn from(err: KernelError) -> i64 {
        match err {
            KernelError::InvalidParam { .. } => -1,
            KernelError::OutOfMemory { .. } => -2,
            KernelError::NotFound { .. } => -3,
            KernelError::Exists { .. } => -4,
            KernelError::NotSupported { .. } => -5,
            KernelError::Timeout { .. } => -6,
            KernelError::Interrupted => -7,
            KernelError::Forked => -8,
            KernelError::Busy { .. } => -9,
            KernelError::Permission { .. } => -10,
        }
    }
}

/// Helper macro for easy error creation.
#[macro_export]
macro_rules! kernel_error {
    (OutOfMemory { requested: $req:expr, available: $avail:expr }) => {
        $crate::error::KernelError::OutOfMemory {
            requested: $req,
            available: $avail,
        }
    };
    (NotFound { $resource:expr => $id:expr }) => {
        $crate::error::KernelError::NotFound {
            resource: $resource,
            id: $id,
        }
    };
    ($variant:ident) => {
        $crate::error::KernelError::$variant
    };
}
