//! Fixed-capacity byte ring between the storage reader and the sample clock.
//!
//! The ring is the hand-off point between two timing domains:
//! - the storage reader thread writes file bytes in chunks (slow, jittery)
//! - the sample clock pops one sample per tick (fast, must not stall)
//!
//! Only the bookkeeping (indices, fill count, end-of-stream flag) lives under the mutex. The
//! writer reserves a contiguous free region under the lock, copies into it with the lock
//! released, and commits under the lock again, so the clock never waits behind a file-sized
//! copy. Reads copy under the lock, at most [`READ_CHUNK`] bytes per acquisition.
//!
//! Writing requires the unique [`Producer`] handle; that uniqueness is what makes the unlocked
//! copy sound. A producer is bound to the epoch it was claimed in: once the ring is reset it
//! reports [`FillOutcome::Stale`] and writes nothing.

use std::cell::UnsafeCell;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Circular byte store with a single producer and lock-protected reads.
pub struct RingBuffer {
    storage: Box<[UnsafeCell<u8>]>,
    cursor: Mutex<Cursor>,
    producer_claimed: AtomicBool,
}

#[derive(Debug, Default)]
struct Cursor {
    read: usize,
    write: usize,
    fill: usize,
    /// Set by the producer at end-of-stream.
    closed: bool,
    /// Bumped by `reset()`; producers claimed under an older epoch are cut off.
    epoch: u64,
}

// SAFETY: bytes are only accessed in two ways:
// - reads of committed bytes `[read, read + fill)` while holding the cursor lock
// - writes into a reserved free region by the single live `Producer`
// Committed and free regions never overlap, and only one `Producer` can exist at a time.
unsafe impl Sync for RingBuffer {}

/// Result of popping one sample from the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pop {
    /// A whole sample was copied out.
    Sample,
    /// Not enough bytes buffered, stream still open (reader lagging).
    Underrun,
    /// Stream closed and no whole sample left. Any trailing partial sample is discarded.
    Ended,
}

/// Result of one [`Producer::fill_from`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// No free space; nothing was read.
    Full,
    /// `n > 0` bytes were read into the ring.
    Filled(usize),
    /// The source returned zero bytes.
    EndOfStream,
    /// The ring was reset after this producer was claimed. Nothing was committed, and every
    /// later call on the same producer reports this again.
    Stale,
}

/// Largest copy [`RingBuffer::read`] makes while holding the cursor lock.
pub const READ_CHUNK: usize = 64;

#[derive(Clone, Copy, Debug)]
struct Reservation {
    start: usize,
    len: usize,
}

#[derive(Clone, Copy, Debug)]
enum Reserve {
    Region(Reservation),
    Full,
    Stale,
}

impl RingBuffer {
    /// Create a ring with `capacity` bytes of backing storage.
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            storage: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
            cursor: Mutex::new(Cursor::default()),
            producer_claimed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn base_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    /// Bytes buffered and not yet read.
    pub fn available_to_read(&self) -> usize {
        self.cursor().fill
    }

    /// Free bytes (not necessarily contiguous).
    pub fn available_to_write(&self) -> usize {
        self.capacity() - self.cursor().fill
    }

    /// Whether the producer has signalled end-of-stream.
    pub fn is_closed(&self) -> bool {
        self.cursor().closed
    }

    /// Closed and fully read.
    pub fn is_drained(&self) -> bool {
        let c = self.cursor();
        c.closed && c.fill == 0
    }

    /// Zero indices and fill count and clear end-of-stream. Backing bytes are left as they are.
    pub fn reset(&self) {
        let mut c = self.cursor();
        c.read = 0;
        c.write = 0;
        c.fill = 0;
        c.closed = false;
        c.epoch = c.epoch.wrapping_add(1);
    }

    /// Pop up to `out.len()` bytes in FIFO order. Returns the number of bytes copied.
    ///
    /// The lock is released between chunks of [`READ_CHUNK`] bytes, so a large read never holds
    /// off [`pop_sample`](Self::pop_sample) for longer than one chunk copy. Stops early once the
    /// ring is empty.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut done = 0;
        while done < out.len() {
            let mut c = self.cursor();
            let n = (out.len() - done).min(c.fill).min(READ_CHUNK);
            if n == 0 {
                break;
            }
            self.copy_out(c.read, &mut out[done..done + n]);
            c.read = (c.read + n) % self.capacity();
            c.fill -= n;
            done += n;
        }
        done
    }

    /// Pop exactly `out.len()` bytes (one sample) if buffered.
    #[inline]
    pub fn pop_sample(&self, out: &mut [u8]) -> Pop {
        let mut c = self.cursor();
        let want = out.len();
        if c.fill >= want {
            self.copy_out(c.read, out);
            c.read = (c.read + want) % self.capacity();
            c.fill -= want;
            Pop::Sample
        } else if c.closed {
            c.read = c.write;
            c.fill = 0;
            Pop::Ended
        } else {
            Pop::Underrun
        }
    }

    /// Claim the write side for the current epoch. Returns `None` while another [`Producer`]
    /// is alive.
    pub fn producer(self: &Arc<Self>) -> Option<Producer> {
        self.producer_claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        let epoch = self.cursor().epoch;
        Some(Producer {
            ring: self.clone(),
            epoch,
        })
    }

    /// Copy committed bytes starting at `start`, wrapping at the physical end.
    ///
    /// Caller holds the cursor lock and guarantees `out.len() <= fill`.
    fn copy_out(&self, start: usize, out: &mut [u8]) {
        let cap = self.capacity();
        let first = out.len().min(cap - start);
        // SAFETY: both ranges lie inside committed bytes, which the producer never touches.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base_ptr().add(start), out.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(
                self.base_ptr(),
                out.as_mut_ptr().add(first),
                out.len() - first,
            );
        }
    }
}

/// Unique write handle for a [`RingBuffer`]. Dropping it releases the claim.
pub struct Producer {
    ring: Arc<RingBuffer>,
    epoch: u64,
}

impl Producer {
    /// The ring has been reset since this producer was claimed.
    pub fn is_stale(&self) -> bool {
        self.ring.cursor().epoch != self.epoch
    }

    /// Next contiguous free region, capped at `max` bytes and at the physical end.
    fn reserve(&self, max: usize) -> Reserve {
        let c = self.ring.cursor();
        if c.epoch != self.epoch {
            return Reserve::Stale;
        }
        let cap = self.ring.capacity();
        let len = max.min(cap - c.fill).min(cap - c.write);
        if len == 0 {
            return Reserve::Full;
        }
        Reserve::Region(Reservation {
            start: c.write,
            len,
        })
    }

    /// Publish `n` bytes of a reservation. Returns `false` if the ring was reset meanwhile.
    fn commit(&self, r: Reservation, n: usize) -> bool {
        let mut c = self.ring.cursor();
        if c.epoch != self.epoch {
            return false;
        }
        let n = n.min(r.len);
        c.write = (r.start + n) % self.ring.capacity();
        c.fill += n;
        true
    }

    /// # Safety
    /// `r` must come from `self.reserve()` and no other slice over it may be alive.
    unsafe fn region_mut(&mut self, r: Reservation) -> &mut [u8] {
        // SAFETY: a reservation covers free bytes only; readers never look past `fill`, and
        // this is the only producer.
        unsafe { std::slice::from_raw_parts_mut(self.ring.base_ptr().add(r.start), r.len) }
    }

    /// Copy as much of `bytes` as fits, splitting across the physical end when needed.
    ///
    /// A stale producer writes nothing.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let mut written = 0;
        while written < bytes.len() {
            let Reserve::Region(r) = self.reserve(bytes.len() - written) else {
                break;
            };
            // SAFETY: fresh reservation, slice dropped before commit.
            let region = unsafe { self.region_mut(r) };
            region.copy_from_slice(&bytes[written..written + r.len]);
            if !self.commit(r, r.len) {
                break;
            }
            written += r.len;
        }
        written
    }

    /// Perform a single `read` from `src` straight into the next contiguous free region.
    ///
    /// At most `max` bytes are requested and the read never wraps past the physical end. No
    /// lock is held while `src.read` runs. Bytes read across a `reset()` are discarded and
    /// reported as [`FillOutcome::Stale`].
    pub fn fill_from<R: Read + ?Sized>(&mut self, src: &mut R, max: usize) -> io::Result<FillOutcome> {
        let r = match self.reserve(max) {
            Reserve::Region(r) => r,
            Reserve::Full => return Ok(FillOutcome::Full),
            Reserve::Stale => return Ok(FillOutcome::Stale),
        };
        // SAFETY: fresh reservation, slice dropped before commit.
        let region = unsafe { self.region_mut(r) };
        let n = src.read(region)?;
        if n == 0 {
            return Ok(FillOutcome::EndOfStream);
        }
        if !self.commit(r, n) {
            return Ok(FillOutcome::Stale);
        }
        Ok(FillOutcome::Filled(n.min(r.len)))
    }

    /// Mark end-of-stream. Buffered bytes remain readable. No effect on a stale producer.
    pub fn close(&self) {
        let mut c = self.ring.cursor();
        if c.epoch == self.epoch {
            c.closed = true;
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.ring.producer_claimed.store(false, Ordering::Release);
    }
}
