//! The synthesis half of continuo: envelopes and LFOs, the resonant
//! voice filter, the per-note voice state machine, MIDI channels, and
//! the engine that drives one render cycle per host callback.

pub mod channel;
pub mod config;
pub mod eg;
pub mod engine;
pub mod error;
pub mod filter;
pub mod lfo;
pub mod pool;
pub mod voice;

pub use channel::{Channel, KeySlot};
pub use config::{ChannelConfig, EngineConfig};
pub use eg::{EgStage, EgTrigger, Egadsr, PitchEg};
pub use engine::{Engine, EngineBuilder, EngineFormat, MidiInput, VoiceInfo};
pub use error::{Error, Result};
pub use filter::{Biquad, FILTER_CUTOFF_MAX, FILTER_CUTOFF_MIN};
pub use lfo::{Lfo, LfoRange};
pub use pool::VoicePool;
pub use voice::{PlaybackState, RenderCtx, TriggerParams, Voice, VoiceOutcome, VoiceType};
