//! Error types for continuo-sampler.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for sample, streaming and resource operations.
///
/// Only non-real-time paths return these; the render path self-repairs
/// by killing the affected voice instead of propagating.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open sample file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("unsupported sample format in {path}: {detail}")]
    UnsupportedFormat { path: PathBuf, detail: String },

    #[error("instrument ({path}, {index}) failed to load: {reason}")]
    InstrumentLoad {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("no instrument with index {index} in {path}")]
    NoSuchInstrument { path: PathBuf, index: usize },

    #[error("sample has zero frames: {path}")]
    EmptySample { path: PathBuf },

    #[error("read past end of sample: frame {frame} of {total}")]
    ReadPastEnd { frame: u64, total: u64 },

    #[error(transparent)]
    Core(#[from] continuo_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
