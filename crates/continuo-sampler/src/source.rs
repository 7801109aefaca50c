//! Backing stores for PCM sample data.
//!
//! A [`SampleSource`] yields interleaved `f32` frames from anywhere in
//! the asset; the disk streamer and the cache loader are its only
//! consumers, both on non-real-time threads.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hound::{SampleFormat, WavReader, WavSpec};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Random-access reader over a PCM asset.
pub trait SampleSource: Send + Sync {
    /// Reads up to `out.len() / channels()` frames starting at
    /// `start_frame` into `out` (interleaved). Returns the number of
    /// frames actually read; short reads signal the end of the asset.
    fn read_frames(&self, start_frame: u64, out: &mut [f32]) -> Result<usize>;

    fn total_frames(&self) -> u64;

    fn channels(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Bytes per frame in the backing store.
    fn frame_size(&self) -> usize;
}

/// An opened sample file: header parsed once, shared by every
/// instrument that references it. The resource manager's file sub-cache
/// hands these out so a file is opened once and closed when its last
/// instrument is released.
#[derive(Debug)]
pub struct SampleFile {
    path: PathBuf,
    spec: WavSpec,
    total_frames: u64,
}

impl SampleFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = WavReader::open(&path).map_err(|source| Error::OpenFile {
            path: path.clone(),
            source,
        })?;
        let spec = reader.spec();
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) | (SampleFormat::Float, 32) => {}
            (format, bits) => {
                return Err(Error::UnsupportedFormat {
                    path,
                    detail: format!("{format:?} {bits}-bit"),
                })
            }
        }
        let total_frames = reader.duration() as u64;
        Ok(Self {
            path,
            spec,
            total_frames,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn channels(&self) -> usize {
        self.spec.channels as usize
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    /// Opens an independent streaming source over this file.
    pub fn source(&self) -> Result<WavSource> {
        WavSource::open(&self.path)
    }
}

/// WAV-backed source. Owns its own reader; seeks are cheap and reads
/// happen in whatever chunk size the streamer asks for.
pub struct WavSource {
    path: PathBuf,
    spec: WavSpec,
    total_frames: u64,
    reader: Mutex<WavReader<BufReader<File>>>,
}

impl WavSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = WavReader::open(&path).map_err(|source| Error::OpenFile {
            path: path.clone(),
            source,
        })?;
        let spec = reader.spec();
        let total_frames = reader.duration() as u64;
        Ok(Self {
            path,
            spec,
            total_frames,
            reader: Mutex::new(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSource for WavSource {
    fn read_frames(&self, start_frame: u64, out: &mut [f32]) -> Result<usize> {
        if start_frame >= self.total_frames {
            return Ok(0);
        }
        let channels = self.spec.channels as usize;
        let want_frames = (out.len() / channels)
            .min((self.total_frames - start_frame) as usize);
        if want_frames == 0 {
            return Ok(0);
        }

        let mut reader = self.reader.lock();
        reader.seek(start_frame as u32)?;

        let want_samples = want_frames * channels;
        let mut written = 0usize;
        match self.spec.sample_format {
            SampleFormat::Int => {
                for sample in reader.samples::<i16>().take(want_samples) {
                    out[written] = sample.map_err(|e| match e {
                        hound::Error::IoError(io) => Error::Io(io),
                        other => Error::OpenFile {
                            path: self.path.clone(),
                            source: other,
                        },
                    })? as f32
                        / 32768.0;
                    written += 1;
                }
            }
            SampleFormat::Float => {
                for sample in reader.samples::<f32>().take(want_samples) {
                    out[written] = sample.map_err(|e| match e {
                        hound::Error::IoError(io) => Error::Io(io),
                        other => Error::OpenFile {
                            path: self.path.clone(),
                            source: other,
                        },
                    })?;
                    written += 1;
                }
            }
        }
        Ok(written / channels)
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn channels(&self) -> usize {
        self.spec.channels as usize
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.spec.channels as usize * (self.spec.bits_per_sample as usize / 8)
    }
}

/// In-memory source, used by tests and by callers that synthesize or
/// decode sample data themselves.
pub struct MemorySource {
    frames: Arc<[f32]>,
    channels: usize,
    sample_rate: u32,
}

impl MemorySource {
    /// `frames` is interleaved; its length must be a multiple of
    /// `channels`.
    pub fn new(frames: impl Into<Arc<[f32]>>, channels: usize, sample_rate: u32) -> Self {
        let frames = frames.into();
        assert!(channels > 0 && frames.len() % channels == 0);
        Self {
            frames,
            channels,
            sample_rate,
        }
    }
}

impl SampleSource for MemorySource {
    fn read_frames(&self, start_frame: u64, out: &mut [f32]) -> Result<usize> {
        let total = self.total_frames();
        if start_frame >= total {
            return Ok(0);
        }
        let want_frames = (out.len() / self.channels).min((total - start_frame) as usize);
        let start = start_frame as usize * self.channels;
        let n = want_frames * self.channels;
        out[..n].copy_from_slice(&self.frames[start..start + n]);
        Ok(want_frames)
    }

    fn total_frames(&self) -> u64 {
        (self.frames.len() / self.channels) as u64
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.channels * std::mem::size_of::<f32>()
    }
}
