//! Single-producer/single-consumer sample ring buffer.
//!
//! Feeds a streaming voice from the disk thread. Indices are monotonic
//! `u64` counters reduced modulo the (power-of-two) capacity at use, so
//! producer and consumer never contend on anything but two atomics.
//!
//! The physical buffer is `capacity + margin` samples long: every write
//! into the first `margin` positions is mirrored past the physical end,
//! which guarantees the consumer a *contiguous* slice of at least
//! `margin` samples from any read position. The interpolator depends on
//! that: a pitched voice may consume up to
//! `max_samples_per_cycle << MAX_PITCH_OCTAVES` samples per cycle and
//! still look [`INTERP_TAPS`](crate::INTERP_TAPS) frames ahead, so rings
//! are sized to at least twice that peak plus the tap margin.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Lock-free SPSC ring over interleaved `f32` sample points.
///
/// All methods take `&self`; the safety contract is role discipline, not
/// borrows: exactly one thread may act as producer
/// ([`write_from`](Self::write_from), [`write_silence`](Self::write_silence))
/// and one as consumer ([`read_slice`](Self::read_slice),
/// [`advance_read`](Self::advance_read)) at any time. The consumer may
/// take over the producer role only once the producer has permanently
/// stopped (a drained disk stream appending trailing silence).
/// [`reset`](Self::reset) requires exclusive access from both roles.
pub struct SampleRing {
    data: UnsafeCell<Box<[f32]>>,
    capacity: usize,
    mask: usize,
    margin: usize,
    write_pos: AtomicU64,
    read_pos: AtomicU64,
}

unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}

impl SampleRing {
    /// Creates a ring with `capacity` usable slots (power of two) and a
    /// contiguous-read `margin`.
    pub fn new(capacity: usize, margin: usize) -> Result<Self> {
        if !capacity.is_power_of_two() || capacity == 0 {
            return Err(Error::RingCapacityNotPowerOfTwo(capacity));
        }
        if margin > capacity {
            return Err(Error::RingCapacityTooSmall { capacity, margin });
        }
        Ok(Self {
            data: UnsafeCell::new(vec![0.0; capacity + margin].into_boxed_slice()),
            capacity,
            mask: capacity - 1,
            margin,
            write_pos: AtomicU64::new(0),
            read_pos: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    /// Samples the producer may still write. One slot is always kept
    /// free, so `write_space() + read_space() == capacity - 1`.
    pub fn write_space(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        self.capacity - 1 - (w - r) as usize
    }

    /// Samples buffered and not yet consumed.
    pub fn read_space(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        (w - r) as usize
    }

    /// Appends samples, returning how many were accepted.
    pub fn write_from(&self, src: &[f32]) -> usize {
        let n = src.len().min(self.write_space());
        let w = self.write_pos.load(Ordering::Relaxed);
        for (k, &v) in src[..n].iter().enumerate() {
            self.put((w + k as u64) as usize & self.mask, v);
        }
        self.write_pos.store(w + n as u64, Ordering::Release);
        n
    }

    /// Appends `n` silence samples (fewer if the ring fills up),
    /// returning how many were written.
    pub fn write_silence(&self, n: usize) -> usize {
        let n = n.min(self.write_space());
        let w = self.write_pos.load(Ordering::Relaxed);
        for k in 0..n {
            self.put((w + k as u64) as usize & self.mask, 0.0);
        }
        self.write_pos.store(w + n as u64, Ordering::Release);
        n
    }

    /// Contiguous view of up to `max` buffered samples starting at the
    /// read position. Thanks to the mirrored margin the returned slice
    /// is never shorter than `min(read_space, margin)`.
    pub fn read_slice(&self, max: usize) -> &[f32] {
        let avail = self.read_space();
        let ri = self.read_pos.load(Ordering::Relaxed) as usize & self.mask;
        let contiguous = self.capacity + self.margin - ri;
        let n = max.min(avail).min(contiguous);
        unsafe {
            let data = &*self.data.get();
            &data[ri..ri + n]
        }
    }

    /// Marks `n` samples as consumed. Clamped to what is buffered, so
    /// an under-run consumer degrades instead of corrupting the
    /// indices.
    pub fn advance_read(&self, n: usize) {
        debug_assert!(n <= self.read_space());
        let n = n.min(self.read_space());
        self.read_pos.fetch_add(n as u64, Ordering::Release);
    }

    /// Rewinds both indices to zero. Only valid while neither role is
    /// active (an unused stream slot being recycled).
    pub fn reset(&self) {
        self.write_pos.store(0, Ordering::Release);
        self.read_pos.store(0, Ordering::Release);
    }

    #[inline]
    fn put(&self, idx: usize, v: f32) {
        unsafe {
            let data = &mut *self.data.get();
            *data.get_unchecked_mut(idx) = v;
            if idx < self.margin {
                *data.get_unchecked_mut(self.capacity + idx) = v;
            }
        }
    }
}
