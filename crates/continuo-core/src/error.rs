//! Error types for continuo-core.

use thiserror::Error;

/// Error type for core primitive construction and configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ring capacity {0} is not a power of two")]
    RingCapacityNotPowerOfTwo(usize),

    #[error("ring capacity {capacity} too small for wrap margin {margin}")]
    RingCapacityTooSmall { capacity: usize, margin: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
