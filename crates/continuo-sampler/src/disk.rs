//! Background disk streaming for voices whose sample outgrows the RAM
//! cache.
//!
//! A dedicated thread owns all file I/O and a fixed pool of streams.
//! The render thread talks to it exclusively through lock-free
//! channels: a command channel for new-stream orders and deletions, and
//! a free-slot channel flowing the other way. Sample data crosses over
//! in per-stream SPSC rings.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use continuo_core::{max_cycle_read, SampleRing, INTERP_TAPS};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::error::Result;
use crate::sample::{LoopSpec, Sample};

/// Stream lifecycle, readable lock-free from the render thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Slot is free or the handle is stale.
    Unused = 0,
    /// Ordered; the disk thread has not serviced it yet.
    Pending = 1,
    /// Being refilled ahead of the voice's read position.
    Active = 2,
    /// Source exhausted (or I/O failed); the ring drains, then silence.
    End = 3,
}

impl From<u8> for StreamState {
    fn from(v: u8) -> Self {
        match v {
            1 => StreamState::Pending,
            2 => StreamState::Active,
            3 => StreamState::End,
            _ => StreamState::Unused,
        }
    }
}

/// Ticket identifying one ordered stream. `order_id` is monotonic and
/// guards against a recycled slot being mistaken for the old stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStreamHandle {
    slot: usize,
    order_id: u64,
}

/// Streamer tuning.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Pool size; an order beyond this is dropped and the voice kills
    /// itself.
    pub streams: usize,
    /// Largest render cycle the audio device may request.
    pub max_samples_per_cycle: usize,
    /// How often the disk thread walks the pool.
    pub refill_interval: Duration,
    /// Minimum write space (sample points) before a stream is topped up.
    pub refill_min: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            streams: 64,
            max_samples_per_cycle: 1024,
            refill_interval: Duration::from_millis(1),
            refill_min: 1024,
        }
    }
}

impl StreamerConfig {
    /// Contiguous-read margin: the worst one-cycle consumption of a
    /// stereo voice plus the interpolator taps.
    fn ring_margin(&self) -> usize {
        max_cycle_read(self.max_samples_per_cycle) * 2 + INTERP_TAPS * 2
    }

    /// Ring capacity: at least twice the per-cycle peak plus the tap
    /// margin, rounded up to a power of two.
    fn ring_capacity(&self) -> usize {
        (self.ring_margin() * 2).next_power_of_two()
    }
}

enum StreamCommand {
    New {
        slot: usize,
        order_id: u64,
        sample: Arc<Sample>,
        start_frame: u64,
        looping: bool,
    },
    Delete {
        slot: usize,
        order_id: u64,
    },
    Shutdown,
}

struct Slot {
    state: AtomicU8,
    order_id: AtomicU64,
    ring: SampleRing,
}

/// Pool of stream slots shared between the render and disk threads.
struct StreamPool {
    slots: Box<[Slot]>,
}

impl StreamPool {
    fn new(config: &StreamerConfig) -> Result<Self> {
        let capacity = config.ring_capacity();
        let margin = config.ring_margin();
        let slots = (0..config.streams)
            .map(|_| {
                Ok(Slot {
                    state: AtomicU8::new(StreamState::Unused as u8),
                    order_id: AtomicU64::new(0),
                    ring: SampleRing::new(capacity, margin)?,
                })
            })
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();
        Ok(Self { slots })
    }
}

/// Owner of the disk thread and the render-side ordering API.
///
/// All `order_*` / `ask_*` methods are wait-free and intended for the
/// render thread; construction and drop happen on a control thread.
pub struct DiskStreamer {
    pool: Arc<StreamPool>,
    cmd_tx: Sender<StreamCommand>,
    free_rx: Receiver<usize>,
    free_tx: Sender<usize>,
    next_order_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DiskStreamer {
    pub fn new(config: StreamerConfig) -> Result<Self> {
        let pool = Arc::new(StreamPool::new(&config)?);
        // Commands: orders and deletions share one FIFO so a delete can
        // never overtake the order it refers to.
        let (cmd_tx, cmd_rx) = bounded(config.streams * 2);
        let (free_tx, free_rx) = bounded(config.streams);
        for slot in 0..config.streams {
            free_tx.send(slot).expect("freelist sized to pool");
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread = {
            let pool = Arc::clone(&pool);
            let shutdown = Arc::clone(&shutdown);
            let free_tx = free_tx.clone();
            thread::Builder::new()
                .name("continuo-disk".into())
                .spawn(move || disk_loop(pool, cmd_rx, free_tx, shutdown, config))
                .expect("failed to spawn disk streamer thread")
        };

        Ok(Self {
            pool,
            cmd_tx,
            free_rx,
            free_tx,
            next_order_id: AtomicU64::new(1),
            shutdown,
            thread: Some(thread),
        })
    }

    /// Orders a stream over `sample` starting at `start_frame`.
    /// Returns `None` when the pool or the command queue is saturated;
    /// the caller is expected to kill the voice.
    pub fn order_new(
        &self,
        sample: &Arc<Sample>,
        start_frame: u64,
        looping: bool,
    ) -> Option<DiskStreamHandle> {
        let slot = self.free_rx.try_recv().ok()?;
        let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);

        let entry = &self.pool.slots[slot];
        entry.order_id.store(order_id, Ordering::Release);
        entry
            .state
            .store(StreamState::Pending as u8, Ordering::Release);

        let command = StreamCommand::New {
            slot,
            order_id,
            sample: Arc::clone(sample),
            start_frame,
            looping,
        };
        match self.cmd_tx.try_send(command) {
            Ok(()) => Some(DiskStreamHandle { slot, order_id }),
            Err(_) => {
                entry
                    .state
                    .store(StreamState::Unused as u8, Ordering::Release);
                // The slot index came out of the freelist, so there is
                // room to put it straight back.
                let _ = self.free_tx.try_send(slot);
                None
            }
        }
    }

    /// Non-blocking check whether the ordered stream has been created.
    pub fn ask_for_created(&self, handle: DiskStreamHandle) -> bool {
        matches!(
            self.state_of(handle),
            StreamState::Active | StreamState::End
        )
    }

    pub fn state_of(&self, handle: DiskStreamHandle) -> StreamState {
        let slot = &self.pool.slots[handle.slot];
        if slot.order_id.load(Ordering::Acquire) != handle.order_id {
            return StreamState::Unused;
        }
        slot.state.load(Ordering::Acquire).into()
    }

    /// The stream's ring. Only the voice owning `handle` may consume
    /// from it.
    pub fn ring(&self, handle: DiskStreamHandle) -> &SampleRing {
        &self.pool.slots[handle.slot].ring
    }

    /// Marks the stream for reclamation. The disk thread recycles the
    /// slot.
    pub fn order_delete(&self, handle: DiskStreamHandle) {
        let _ = self.cmd_tx.try_send(StreamCommand::Delete {
            slot: handle.slot,
            order_id: handle.order_id,
        });
    }

    /// Streams currently held by voices (for diagnostics).
    pub fn streams_in_use(&self) -> usize {
        self.pool
            .slots
            .iter()
            .filter(|s| s.state.load(Ordering::Relaxed) != StreamState::Unused as u8)
            .count()
    }
}

impl Drop for DiskStreamer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.cmd_tx.try_send(StreamCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Disk-thread-private refill state for one active stream.
struct StreamWork {
    order_id: u64,
    sample: Arc<Sample>,
    read_frame: u64,
    looping: bool,
    loop_spec: Option<LoopSpec>,
    /// Loop passes still owed; meaningless while `play_count` is 0
    /// (infinite).
    loops_left: u32,
}

fn disk_loop(
    pool: Arc<StreamPool>,
    cmd_rx: Receiver<StreamCommand>,
    free_tx: Sender<usize>,
    shutdown: Arc<AtomicBool>,
    config: StreamerConfig,
) {
    let mut works: Vec<Option<StreamWork>> = (0..pool.slots.len()).map(|_| None).collect();
    // Reused read buffer; sized to the largest refill a ring can take.
    let mut scratch = vec![0.0f32; config.ring_capacity()];

    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        // Drain commands (non-blocking batch).
        loop {
            match cmd_rx.try_recv() {
                Ok(StreamCommand::New {
                    slot,
                    order_id,
                    sample,
                    start_frame,
                    looping,
                }) => {
                    let entry = &pool.slots[slot];
                    // A delete for this order may already have been
                    // processed; only service orders that are still
                    // pending.
                    if entry.order_id.load(Ordering::Acquire) != order_id
                        || entry.state.load(Ordering::Acquire) != StreamState::Pending as u8
                    {
                        continue;
                    }
                    entry.ring.reset();
                    let loop_spec = sample.loop_spec();
                    let loops_left = loop_spec.map_or(0, |l| l.play_count);
                    works[slot] = Some(StreamWork {
                        order_id,
                        sample,
                        read_frame: start_frame,
                        looping: looping && loop_spec.is_some(),
                        loop_spec,
                        loops_left,
                    });
                    entry
                        .state
                        .store(StreamState::Active as u8, Ordering::Release);
                }
                Ok(StreamCommand::Delete { slot, order_id }) => {
                    let entry = &pool.slots[slot];
                    if entry.order_id.load(Ordering::Acquire) != order_id {
                        continue;
                    }
                    works[slot] = None;
                    entry.ring.reset();
                    entry
                        .state
                        .store(StreamState::Unused as u8, Ordering::Release);
                    let _ = free_tx.try_send(slot);
                }
                Ok(StreamCommand::Shutdown) => return,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        // Top up every active stream whose ring has room.
        for (slot, work) in works.iter_mut().enumerate() {
            let Some(work) = work else { continue };
            let entry = &pool.slots[slot];
            if entry.state.load(Ordering::Acquire) != StreamState::Active as u8 {
                continue;
            }
            refill_stream(entry, work, &mut scratch, config.refill_min);
        }

        thread::sleep(config.refill_interval);
    }
}

/// Reads ahead of the voice until the ring is full, the loop wraps, or
/// the sample ends.
fn refill_stream(entry: &Slot, work: &mut StreamWork, scratch: &mut [f32], refill_min: usize) {
    loop {
        let write_space = entry.ring.write_space();
        if write_space < refill_min {
            return;
        }
        let channels = work.sample.channels();
        let max_frames = (write_space / channels).min(scratch.len() / channels);

        // Read up to the next boundary: loop end while looping, else
        // the end of the sample.
        let stop = match (work.looping, work.loop_spec) {
            (true, Some(l)) => l.end,
            _ => work.sample.total_frames(),
        };
        let until_stop = stop.saturating_sub(work.read_frame) as usize;
        let frames = max_frames.min(until_stop);

        if frames > 0 {
            let want = frames * channels;
            match work.sample.source().read_frames(work.read_frame, &mut scratch[..want]) {
                Ok(got) if got > 0 => {
                    entry.ring.write_from(&scratch[..got * channels]);
                    work.read_frame += got as u64;
                    if got < frames {
                        // Short read: the file ended earlier than its
                        // header promised.
                        debug!(
                            path = %work.sample.path().display(),
                            "short read, ending stream"
                        );
                        entry
                            .state
                            .store(StreamState::End as u8, Ordering::Release);
                        return;
                    }
                }
                Ok(_) => {
                    entry
                        .state
                        .store(StreamState::End as u8, Ordering::Release);
                    return;
                }
                Err(err) => {
                    warn!(
                        path = %work.sample.path().display(),
                        %err,
                        "disk stream read failed, ending stream"
                    );
                    entry
                        .state
                        .store(StreamState::End as u8, Ordering::Release);
                    return;
                }
            }
        }

        if work.read_frame < stop {
            continue;
        }

        // Boundary reached.
        if work.looping {
            let l = work.loop_spec.expect("looping implies a loop spec");
            if !l.is_infinite() {
                work.loops_left = work.loops_left.saturating_sub(1);
                if work.loops_left == 0 {
                    // Played out; continue linearly to the sample end.
                    work.looping = false;
                    work.read_frame = l.end;
                    continue;
                }
            }
            work.read_frame = l.start;
        } else {
            entry
                .state
                .store(StreamState::End as u8, Ordering::Release);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn ramp_sample(frames: usize, loop_spec: Option<LoopSpec>) -> Arc<Sample> {
        let data: Vec<f32> = (0..frames).map(|i| i as f32).collect();
        let source = Arc::new(MemorySource::new(data, 1, 44_100));
        Arc::new(Sample::new("/mem/stream", 0, source, loop_spec).unwrap())
    }

    fn small_config(streams: usize) -> StreamerConfig {
        StreamerConfig {
            streams,
            max_samples_per_cycle: 64,
            refill_interval: Duration::from_micros(200),
            refill_min: 64,
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn order_and_stream_ramp() {
        let streamer = DiskStreamer::new(small_config(4)).unwrap();
        let sample = ramp_sample(100_000, None);

        let handle = streamer.order_new(&sample, 5_000, false).unwrap();
        wait_until(|| streamer.ask_for_created(handle));

        let ring = streamer.ring(handle);
        wait_until(|| ring.read_space() >= 256);

        let slice = ring.read_slice(256);
        assert_eq!(slice[0], 5_000.0);
        assert_eq!(slice[255], 5_255.0);
        ring.advance_read(256);

        wait_until(|| ring.read_space() >= 64);
        assert_eq!(ring.read_slice(1)[0], 5_256.0);
    }

    #[test]
    fn non_looping_stream_reaches_end() {
        let streamer = DiskStreamer::new(small_config(2)).unwrap();
        let sample = ramp_sample(3_000, None);

        let handle = streamer.order_new(&sample, 2_900, false).unwrap();
        wait_until(|| streamer.state_of(handle) == StreamState::End);
        assert_eq!(streamer.ring(handle).read_space(), 100);
    }

    #[test]
    fn looping_stream_wraps_at_loop_end() {
        let streamer = DiskStreamer::new(small_config(2)).unwrap();
        let spec = LoopSpec {
            start: 1_000,
            end: 1_100,
            play_count: 0,
        };
        let sample = ramp_sample(10_000, Some(spec));

        let handle = streamer.order_new(&sample, 1_050, true).unwrap();
        wait_until(|| streamer.ask_for_created(handle));
        let ring = streamer.ring(handle);
        wait_until(|| ring.read_space() >= 200);

        let slice = ring.read_slice(200);
        // 50 frames to the loop end, then it wraps to the loop start.
        assert_eq!(slice[0], 1_050.0);
        assert_eq!(slice[49], 1_099.0);
        assert_eq!(slice[50], 1_000.0);
        assert_eq!(slice[149], 1_099.0);
        assert_eq!(slice[150], 1_000.0);
    }

    #[test]
    fn finite_loop_plays_out_to_sample_end() {
        let streamer = DiskStreamer::new(small_config(2)).unwrap();
        let spec = LoopSpec {
            start: 100,
            end: 110,
            play_count: 2,
        };
        let sample = ramp_sample(150, Some(spec));

        let handle = streamer.order_new(&sample, 100, true).unwrap();
        wait_until(|| streamer.state_of(handle) == StreamState::End);

        let ring = streamer.ring(handle);
        // Two loop passes (10 frames each) then the tail 110..150.
        assert_eq!(ring.read_space(), 10 + 10 + 40);
        let slice = ring.read_slice(60);
        assert_eq!(slice[0], 100.0);
        assert_eq!(slice[10], 100.0);
        assert_eq!(slice[20], 110.0);
        assert_eq!(slice[59], 149.0);
    }

    #[test]
    fn pool_saturation_returns_none() {
        let streamer = DiskStreamer::new(small_config(2)).unwrap();
        let sample = ramp_sample(1_000_000, None);

        let a = streamer.order_new(&sample, 0, false).unwrap();
        let _b = streamer.order_new(&sample, 0, false).unwrap();
        assert!(streamer.order_new(&sample, 0, false).is_none());

        // Deleting one stream frees its slot for a new order.
        streamer.order_delete(a);
        wait_until(|| streamer.order_new(&sample, 0, false).is_some());
    }

    #[test]
    fn stale_handle_reads_unused() {
        let streamer = DiskStreamer::new(small_config(1)).unwrap();
        let sample = ramp_sample(1_000_000, None);

        let old = streamer.order_new(&sample, 0, false).unwrap();
        streamer.order_delete(old);
        wait_until(|| streamer.state_of(old) == StreamState::Unused);

        let new = streamer.order_new(&sample, 0, false).unwrap();
        wait_until(|| streamer.ask_for_created(new));
        // The recycled slot must not resurrect the old ticket.
        assert_eq!(streamer.state_of(old), StreamState::Unused);
    }
}
