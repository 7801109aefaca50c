//! Centralized error type for the continuo umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate
//! boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] continuo_core::Error),

    #[error("sampler: {0}")]
    Sampler(#[from] continuo_sampler::Error),

    #[error("synth: {0}")]
    Synth(#[from] continuo_synth::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
