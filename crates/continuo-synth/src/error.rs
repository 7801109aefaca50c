//! Error types for continuo-synth.

use thiserror::Error;

/// Error type for engine construction and non-real-time control
/// operations. The render path never returns these.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("no channel {0}")]
    NoSuchChannel(usize),

    #[error("config writer already taken")]
    ConfigWriterTaken,

    #[error("MIDI input already taken")]
    MidiInputTaken,

    #[error(transparent)]
    Sampler(#[from] continuo_sampler::Error),

    #[error(transparent)]
    Core(#[from] continuo_core::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
