//! Sample assets and the machinery that shares and streams them.
//!
//! This crate owns everything between the instrument file on disk and
//! the voice that renders it: the PCM [`Sample`] with its RAM
//! [`cache`](sample::CacheBuf), the [`SampleSource`] abstraction over
//! backing files, the background [`DiskStreamer`] that keeps ring
//! buffers filled ahead of streaming voices, the immutable
//! [`Instrument`]/[`Region`] articulation model, and the reference
//! counted [`ResourceManager`] that loads each instrument once and
//! serves it to every channel.

pub mod disk;
pub mod error;
pub mod instrument;
pub mod resource;
pub mod sample;
pub mod source;

pub use disk::{DiskStreamHandle, DiskStreamer, StreamState, StreamerConfig};
pub use error::{Error, Result};
pub use instrument::{
    ControlSource, CrossfadeSpec, CtrlRange, EgParams, FilterParams, Instrument, InstrumentLoader,
    LfoParams, LfoStartLevel, PitchEgParams, Region, RegionBuilder, RegionMatches, VelocityCurve,
};
pub use resource::{AvailabilityMode, CachePolicy, ConsumerId, InstrumentKey, ResourceManager};
pub use sample::{CacheBuf, LoopSpec, Sample};
pub use source::{MemorySource, SampleFile, SampleSource, WavSource};

/// Frames preloaded into RAM for samples that stream the remainder from
/// disk. Samples at or below this length are cached whole and never
/// touch the disk streamer.
pub const DEFAULT_PRELOAD_FRAMES: u64 = 32_768;
