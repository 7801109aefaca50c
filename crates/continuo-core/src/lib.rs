//! Real-time building blocks shared by every continuo crate.
//!
//! Everything in here is safe to touch from the audio thread: the
//! sample ring buffer used by disk streams, the double-buffered
//! configuration exchange, the shared gain cell, and the pitch math
//! helpers. Nothing allocates or blocks after construction.

pub mod error;
pub mod lockfree;
pub mod math;
pub mod ring;
pub mod sync_config;

pub use error::{Error, Result};
pub use lockfree::SharedGain;
pub use math::{cents_to_ratio, ratio_to_cents, ONE_CENT_TOLERANCE};
pub use ring::SampleRing;
pub use sync_config::{ConfigReadGuard, ConfigReader, ConfigWriter, SyncConfig};

pub use core::sync::atomic::{
    AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering,
};

/// Maximum upward pitch shift in octaves the sampler kernel may apply.
///
/// Read-ahead margins everywhere (ring sizing, cache silence padding,
/// RAM/disk handoff positions) are derived from this bound.
pub const MAX_PITCH_OCTAVES: u32 = 4;

/// Frames of look-ahead the interpolator may touch past its read position.
pub const INTERP_TAPS: usize = 4;

/// Worst-case sample points a voice can consume in one render cycle.
#[inline]
pub const fn max_cycle_read(max_samples_per_cycle: usize) -> usize {
    max_samples_per_cycle << MAX_PITCH_OCTAVES
}
