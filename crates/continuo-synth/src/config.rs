//! The configuration snapshot handed to the render thread through the
//! lock-free exchange.

use std::sync::Arc;

use continuo_core::SharedGain;
use continuo_sampler::Instrument;

/// Per-channel mix and routing state.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub volume: f32,
    /// -1.0 (left) ..= 1.0 (right).
    pub pan: f32,
    pub mute: bool,
    /// Instrument serving this channel. The resource manager keeps its
    /// own reference, so swapping this never frees on the render
    /// thread.
    pub instrument: Option<Arc<Instrument>>,
    /// The instrument's live gain-override cell
    /// ([`ResourceManager::instrument_gain_handle`]); wire it alongside
    /// the instrument so `set_instrument_gain` reaches playback.
    ///
    /// [`ResourceManager::instrument_gain_handle`]:
    /// continuo_sampler::ResourceManager::instrument_gain_handle
    pub instrument_gain: Option<Arc<SharedGain>>,
    /// Extra gain applied on top of `volume` (per-instrument gain
    /// compensation).
    pub gain_compensation: f32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            mute: false,
            instrument: None,
            instrument_gain: None,
            gain_compensation: 1.0,
        }
    }
}

/// Everything the render thread reads once per cycle.
///
/// Updated by a control thread via
/// [`ConfigWriter`](continuo_core::ConfigWriter): mutate the shadow
/// copy, switch, mirror. Must stay cheap to clone (instruments are
/// shared by `Arc`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub global_volume: f32,
    pub channels: Vec<ChannelConfig>,
    /// Overrides every region's cutoff controller, when set.
    pub cutoff_controller_override: Option<u8>,
    /// Overrides every region's resonance controller, when set.
    pub resonance_controller_override: Option<u8>,
}

impl EngineConfig {
    pub fn with_channels(count: usize) -> Self {
        Self {
            global_volume: 1.0,
            channels: (0..count).map(|_| ChannelConfig::default()).collect(),
            cutoff_controller_override: None,
            resonance_controller_override: None,
        }
    }
}
