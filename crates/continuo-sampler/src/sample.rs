//! PCM samples and their RAM caches.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use continuo_core::{max_cycle_read, INTERP_TAPS};

use crate::error::{Error, Result};
use crate::source::SampleSource;

/// Loop descriptor in frames. `end` is exclusive; a `play_count` of
/// zero loops forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSpec {
    pub start: u64,
    pub end: u64,
    pub play_count: u32,
}

impl LoopSpec {
    #[inline]
    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        self.play_count == 0
    }
}

/// The cached head of a sample: the first `cached_frames` frames in
/// RAM, followed by `silence_frames` zeroed frames so the interpolator
/// can read past the official end without branching.
#[derive(Debug)]
pub struct CacheBuf {
    data: Box<[f32]>,
    cached_frames: u64,
    silence_frames: u32,
    channels: usize,
}

impl CacheBuf {
    pub fn cached_frames(&self) -> u64 {
        self.cached_frames
    }

    pub fn silence_frames(&self) -> u32 {
        self.silence_frames
    }

    /// Interleaved sample data, silence pad included.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Reads one sample point; any frame past the cached region (up to
    /// the silence pad) reads as silence.
    #[inline]
    pub fn at(&self, frame: u64, channel: usize) -> f32 {
        let idx = frame as usize * self.channels + channel;
        self.data.get(idx).copied().unwrap_or(0.0)
    }
}

/// A possibly-large PCM asset, immutable once loaded.
///
/// Identified by `(path, index)`; owned by the resource manager and
/// shared read-only with every voice that plays it. The RAM cache is
/// swapped atomically so it can be re-extended (larger silence pad for
/// a bigger audio buffer size) while voices keep reading the cache they
/// captured at trigger time.
pub struct Sample {
    path: PathBuf,
    index: usize,
    total_frames: u64,
    channels: usize,
    sample_rate: u32,
    frame_size: usize,
    loop_spec: Option<LoopSpec>,
    source: Arc<dyn SampleSource>,
    cache: ArcSwapOption<CacheBuf>,
}

impl Sample {
    pub fn new(
        path: impl Into<PathBuf>,
        index: usize,
        source: Arc<dyn SampleSource>,
        loop_spec: Option<LoopSpec>,
    ) -> Result<Self> {
        let path = path.into();
        if source.total_frames() == 0 {
            return Err(Error::EmptySample { path });
        }
        if let Some(l) = loop_spec {
            debug_assert!(l.start < l.end && l.end <= source.total_frames());
        }
        Ok(Self {
            path,
            index,
            total_frames: source.total_frames(),
            channels: source.channels(),
            sample_rate: source.sample_rate(),
            frame_size: source.frame_size(),
            loop_spec,
            source,
            cache: ArcSwapOption::empty(),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn loop_spec(&self) -> Option<LoopSpec> {
        self.loop_spec
    }

    pub fn source(&self) -> &Arc<dyn SampleSource> {
        &self.source
    }

    /// Current RAM cache, if loaded. Lock-free; safe from the render
    /// thread.
    pub fn cache(&self) -> Option<Arc<CacheBuf>> {
        self.cache.load_full()
    }

    /// True when the whole sample fits in the cache and no disk stream
    /// is ever needed.
    pub fn is_fully_cached(&self) -> bool {
        self.cache
            .load()
            .as_ref()
            .is_some_and(|c| c.cached_frames >= self.total_frames)
    }

    /// Silence frames required behind the cached region for a device
    /// rendering up to `max_samples_per_cycle` frames per cycle.
    pub fn needed_silence_frames(max_samples_per_cycle: usize) -> u32 {
        (max_cycle_read(max_samples_per_cycle) + INTERP_TAPS) as u32
    }

    /// Ensures the cache satisfies the load policy: samples short
    /// enough are cached whole, longer ones cache `preload_frames` and
    /// stream the rest. A no-op when the existing cache already covers
    /// the request (same or larger pad), so repeated borrows are cheap.
    pub fn ensure_cached(&self, preload_frames: u64, max_samples_per_cycle: usize) -> Result<()> {
        let silence = Self::needed_silence_frames(max_samples_per_cycle);
        let whole = self.total_frames <= preload_frames;
        let want_frames = if whole {
            self.total_frames
        } else {
            preload_frames
        };

        if let Some(existing) = self.cache.load_full() {
            if existing.cached_frames >= want_frames && existing.silence_frames >= silence {
                return Ok(());
            }
        }

        let frames = want_frames as usize;
        let mut data = vec![0.0f32; (frames + silence as usize) * self.channels];
        let read = self
            .source
            .read_frames(0, &mut data[..frames * self.channels])?;
        // A short read means the file shrank underneath us; the cache
        // keeps whatever arrived and the pad stays silent.
        let cached_frames = read as u64;

        self.cache.store(Some(Arc::new(CacheBuf {
            data: data.into_boxed_slice(),
            cached_frames,
            silence_frames: silence,
            channels: self.channels,
        })));
        Ok(())
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("path", &self.path)
            .field("index", &self.index)
            .field("total_frames", &self.total_frames)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("loop_spec", &self.loop_spec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn ramp_sample(frames: usize, channels: usize) -> Sample {
        let data: Vec<f32> = (0..frames * channels).map(|i| i as f32).collect();
        let source = Arc::new(MemorySource::new(data, channels, 44_100));
        Sample::new("/mem/ramp", 0, source, None).unwrap()
    }

    #[test]
    fn short_sample_cached_whole() {
        let sample = ramp_sample(1000, 1);
        sample.ensure_cached(32_768, 128).unwrap();

        assert!(sample.is_fully_cached());
        let cache = sample.cache().unwrap();
        assert_eq!(cache.cached_frames(), 1000);
        assert_eq!(
            cache.silence_frames(),
            Sample::needed_silence_frames(128)
        );
    }

    #[test]
    fn sample_exactly_at_threshold_is_fully_cached() {
        let sample = ramp_sample(1024, 1);
        sample.ensure_cached(1024, 128).unwrap();
        assert!(sample.is_fully_cached());
    }

    #[test]
    fn long_sample_caches_preload_only() {
        let sample = ramp_sample(5000, 1);
        sample.ensure_cached(1024, 128).unwrap();

        assert!(!sample.is_fully_cached());
        assert_eq!(sample.cache().unwrap().cached_frames(), 1024);
    }

    #[test]
    fn reads_past_end_return_silence() {
        let sample = ramp_sample(100, 2);
        sample.ensure_cached(32_768, 64).unwrap();
        let cache = sample.cache().unwrap();

        assert_eq!(cache.at(99, 1), 199.0);
        assert_eq!(cache.at(100, 0), 0.0);
        assert_eq!(cache.at(100 + cache.silence_frames() as u64 - 1, 1), 0.0);
    }

    #[test]
    fn cache_reextends_for_larger_cycle() {
        let sample = ramp_sample(200, 1);
        sample.ensure_cached(32_768, 64).unwrap();
        let small = sample.cache().unwrap().silence_frames();

        sample.ensure_cached(32_768, 512).unwrap();
        let big = sample.cache().unwrap().silence_frames();
        assert!(big > small);

        // Shrinking the cycle size must not shrink the pad.
        sample.ensure_cached(32_768, 64).unwrap();
        assert_eq!(sample.cache().unwrap().silence_frames(), big);
    }

    #[test]
    fn zero_frame_sample_rejected() {
        let source = Arc::new(MemorySource::new(Vec::<f32>::new(), 1, 44_100));
        assert!(Sample::new("/mem/empty", 0, source, None).is_err());
    }
}
