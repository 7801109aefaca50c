//! # continuo - streaming sample-playback engine
//!
//! A polyphonic, disk-streaming, sample-based instrument engine: MIDI
//! events in, stereo audio out. Each note allocates a voice that reads
//! a slice of a (possibly huge) instrument sample, shapes it with
//! envelopes, LFOs and a resonant filter, and mixes into the output
//! once per audio cycle. Samples larger than their RAM cache are fed
//! by a background disk thread over lock-free ring buffers.
//!
//! ## Architecture
//!
//! continuo is an umbrella crate over:
//! - **continuo-core** - lock-free primitives (sample ring buffer,
//!   double-buffered config exchange, shared gain cell, pitch math)
//! - **continuo-midi** - sample-accurate events, fragment clock,
//!   scheduler queue, raw MIDI decode
//! - **continuo-sampler** - samples and RAM caches, the disk streamer,
//!   the instrument/region model, the shared resource manager
//! - **continuo-synth** - envelopes, LFOs, filter, voices, channels,
//!   and the render engine
//!
//! ## Quick start
//!
//! ```no_run
//! use continuo::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> continuo::Result<()> {
//! let mut engine = Engine::builder()
//!     .sample_rate(48_000)
//!     .max_samples_per_cycle(512)
//!     .build()?;
//!
//! // The MIDI driver owns the ingress handle; a control thread owns
//! // the config writer.
//! let mut midi = engine.take_midi_input()?;
//! let mut config = engine.take_config_writer()?;
//!
//! // Load an instrument once, serve it to channel 0.
//! let key = InstrumentKey::new("grand_piano.wav", 0);
//! let instrument = engine.resources().borrow(&key, 0, 512)?;
//! config.update(|cfg| cfg.channels[0].instrument = Some(Arc::clone(&instrument)));
//!
//! // Audio callback: one render per cycle.
//! let (mut left, mut right) = (vec![0.0; 512], vec![0.0; 512]);
//! midi.push_message(0, 0x90, 60, 100);
//! engine.render(0, &mut left, &mut right);
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{Error, Result};

/// Re-export of continuo-core for direct access.
pub use continuo_core as core;
pub use continuo_midi as midi;
pub use continuo_sampler as sampler;
pub use continuo_synth as synth;

pub use continuo_core::{cents_to_ratio, ratio_to_cents, SampleRing, SharedGain, SyncConfig};
pub use continuo_midi::{Event, EventClock, EventKind, RawMidi, SchedulerQueue, TimeStamp};
pub use continuo_sampler::{
    AvailabilityMode, CachePolicy, DiskStreamer, Instrument, InstrumentKey, InstrumentLoader,
    LoopSpec, Region, ResourceManager, Sample, SampleSource,
};
pub use continuo_synth::{
    ChannelConfig, Engine, EngineBuilder, EngineConfig, EngineFormat, MidiInput, PlaybackState,
    Voice,
};

/// The commonly needed surface in one import.
pub mod prelude {
    pub use crate::{
        AvailabilityMode, ChannelConfig, Engine, EngineBuilder, EngineConfig, Event, EventKind,
        Instrument, InstrumentKey, InstrumentLoader, LoopSpec, MidiInput, PlaybackState, RawMidi,
        Region, Sample,
    };
    pub use continuo_sampler::RegionBuilder;
}
