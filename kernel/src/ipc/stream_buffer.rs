//! Stream buffer: a byte-addressed MPSC ring backing an [`IpcContext`](super::context::IpcContext).
//!
//! Writers reserve a slice of the ring with a CAS retry loop on the
//! producer index (Michael-Scott style, see
//! [`crate::sync::lockfree_queue`]), copy their packet in, then commit —
//! advancing a second, strictly-ordered "committed" index so a reader never
//! observes a reservation that hasn't finished writing yet. Grounded on
//! `streambuffer_write_packet_start/_data/_end` in `ipc_context.c`.

extern crate alloc;
use alloc::boxed::Box;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{KernelError, KernelResult};

/// A reservation into the ring, returned by [`StreamBuffer::reserve`]. The
/// writer copies into [`Reservation::as_mut_slice`] and must call
/// [`Reservation::commit`] to make the bytes visible to the reader.
pub struct Reservation<'a> {
    buffer: &'a StreamBuffer,
    start: usize,
    len: usize,
}

impl<'a> Reservation<'a> {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let mask = self.buffer.mask;
        let data = self.buffer.data();
        // SAFETY: `start..start+len` was exclusively reserved for this
        // writer by `reserve`'s CAS loop; no other reservation overlaps it
        // until this one commits.
        unsafe {
            let ptr = data.as_mut_ptr().add(self.start & mask);
            if (self.start & mask) + self.len <= data.len() {
                core::slice::from_raw_parts_mut(ptr, self.len)
            } else {
                // Wraps past the end of the backing allocation; the caller
                // never sees this because `reserve` only hands out
                // reservations that fit contiguously after masking.
                core::slice::from_raw_parts_mut(ptr, 0)
            }
        }
    }

    /// Publish the write. Spins until every reservation made before this
    /// one has already committed, preserving packet order for the reader.
    pub fn commit(self) {
        let end = self.start + self.len;
        loop {
            let committed = self.buffer.committed.load(Ordering::Acquire);
            if committed == self.start {
                self.buffer.committed.store(end, Ordering::Release);
                return;
            }
            core::hint::spin_loop();
        }
    }
}

/// Fixed-capacity ring buffer shared between an IPC context's creator and
/// its peers. Capacity must be a power of two.
pub struct StreamBuffer {
    storage: Box<[core::cell::UnsafeCell<u8>]>,
    mask: usize,
    /// Next byte offset available to reserve.
    produced: AtomicUsize,
    /// Highest offset whose reservation has committed; read cursor stops
    /// here.
    committed: AtomicUsize,
    /// Read cursor, advanced only by the (single) consumer.
    consumed: AtomicUsize,
}

// SAFETY: all access to `storage` goes through the atomic produced/
// committed/consumed indices, which partition the ring into disjoint
// writer/reader regions at any instant.
unsafe impl Send for StreamBuffer {}
unsafe impl Sync for StreamBuffer {}

impl StreamBuffer {
    pub fn new(capacity: usize) -> KernelResult<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(KernelError::InvalidParam {
                name: "capacity",
                value: capacity,
            });
        }
        let storage = (0..capacity)
            .map(|_| core::cell::UnsafeCell::new(0u8))
            .collect::<alloc::vec::Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            storage,
            mask: capacity - 1,
            produced: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            consumed: AtomicUsize::new(0),
        })
    }

    fn data(&self) -> &mut [u8] {
        // SAFETY: cast to a byte slice over the `UnsafeCell<u8>` storage;
        // exclusivity of any given range is the reservation protocol's job.
        unsafe { core::slice::from_raw_parts_mut(self.storage.as_ptr() as *mut u8, self.storage.len()) }
    }

    /// `streambuffer_write_packet_start`: claim `len` contiguous bytes.
    /// Fails if the ring has no room or the reservation would wrap past
    /// the end of the backing allocation (the caller retries after the
    /// consumer frees space up to the boundary).
    pub fn reserve(&self, len: usize) -> KernelResult<Reservation<'_>> {
        if len > self.storage.len() {
            return Err(KernelError::InvalidParam {
                name: "len",
                value: len,
            });
        }
        loop {
            let start = self.produced.load(Ordering::Acquire);
            let consumed = self.consumed.load(Ordering::Acquire);
            if start - consumed + len > self.storage.len() {
                return Err(KernelError::Busy {
                    resource: "ipc stream buffer",
                });
            }
            if (start & self.mask) + len > self.storage.len() {
                return Err(KernelError::Busy {
                    resource: "ipc stream buffer",
                });
            }
            if self
                .produced
                .compare_exchange(start, start + len, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(Reservation {
                    buffer: self,
                    start,
                    len,
                });
            }
        }
    }

    /// `streambuffer_write_packet_start`, blocking variant: retries
    /// `reserve` until it succeeds or `timeout_ms` elapses, parking the
    /// caller between attempts via [`crate::sched::block_current`] rather
    /// than spinning. With no timeout, retries until space frees up.
    pub fn reserve_blocking(&self, len: usize, timeout_ms: Option<u64>) -> KernelResult<Reservation<'_>> {
        const POLL_INTERVAL_MS: u64 = 1;

        let ticks_per_ms = crate::arch::timer::ticks_per_ms().max(1);
        let deadline = timeout_ms.map(|ms| crate::arch::timer::get_ticks() + ms * ticks_per_ms);

        loop {
            match self.reserve(len) {
                Ok(reservation) => return Ok(reservation),
                Err(KernelError::Busy { .. }) => {}
                Err(e) => return Err(e),
            }

            if let Some(deadline) = deadline {
                if crate::arch::timer::get_ticks() >= deadline {
                    return Err(KernelError::Timeout {
                        operation: "ipc stream reserve",
                        duration_ms: timeout_ms.unwrap_or(0),
                    });
                }
            }
            crate::sched::block_current(Some(POLL_INTERVAL_MS));
        }
    }

    /// Bytes available to read right now.
    pub fn readable(&self) -> usize {
        self.committed.load(Ordering::Acquire) - self.consumed.load(Ordering::Acquire)
    }

    /// `streambuffer_read`: copy up to `out.len()` committed bytes into
    /// `out`, advancing the read cursor. Returns the number of bytes read.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let consumed = self.consumed.load(Ordering::Acquire);
        let available = self.committed.load(Ordering::Acquire) - consumed;
        let n = available.min(out.len());
        let data = self.data();
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            *slot = data[(consumed + i) & self.mask];
        }
        self.consumed.fetch_add(n, Ordering::Release);
        n
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_commit_read_round_trips() {
        let buf = StreamBuffer::new(64).unwrap();
        let mut r = buf.reserve(8).unwrap();
        r.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        r.commit();
        assert_eq!(buf.readable(), 8);
        let mut out = [0u8; 8];
        assert_eq!(buf.read(&mut out), 8);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf.readable(), 0);
    }

    #[test]
    fn reserve_rejects_oversized_request() {
        let buf = StreamBuffer::new(16).unwrap();
        assert!(buf.reserve(32).is_err());
    }
}
