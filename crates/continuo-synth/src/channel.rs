//! Per-channel MIDI state: key table, controller table, mix buffer.
//!
//! The channel is a data structure; the note-handling logic that needs
//! the voice pool and the disk streamer lives in the engine, which owns
//! both sides.

use std::sync::Arc;

use continuo_core::SharedGain;
use continuo_midi::EventQueue;
use continuo_sampler::Instrument;
use smallvec::SmallVec;

use crate::config::ChannelConfig;

/// One key of the MIDI key table.
#[derive(Debug, Default)]
pub struct KeySlot {
    /// Pool slots of the voices sounding on this key.
    pub active: SmallVec<[usize; 4]>,
    /// Engine sample time of the most recent note-on, for stealing
    /// order and release-trigger attenuation.
    pub note_on_time: u64,
    /// Note-off arrived while the sustain pedal was down.
    pub deferred_off: bool,
    pub off_velocity: u8,
}

/// MIDI channel state owned by the engine.
pub struct Channel {
    keys: Vec<KeySlot>,
    /// Last seen value per controller; index 128 is channel aftertouch.
    pub ctrl: [u8; 129],
    pub pitch_bend: i16,
    pub volume: f32,
    pub pan: f32,
    pub mute: bool,
    pub gain_compensation: f32,
    pub instrument: Option<Arc<Instrument>>,
    /// Live gain override of the assigned instrument, when wired.
    pub instrument_gain: Option<Arc<SharedGain>>,
    /// Events addressed to this channel in the current cycle.
    pub queue: EventQueue,
    /// Number of voices currently sounding on this channel.
    pub active_voices: usize,
    pub(crate) mix_l: Vec<f32>,
    pub(crate) mix_r: Vec<f32>,
}

impl Channel {
    pub fn new(max_samples_per_cycle: usize, event_capacity: usize) -> Self {
        Self {
            keys: (0..128).map(|_| KeySlot::default()).collect(),
            ctrl: [0; 129],
            pitch_bend: 0,
            volume: 1.0,
            pan: 0.0,
            mute: false,
            gain_compensation: 1.0,
            instrument: None,
            instrument_gain: None,
            queue: EventQueue::with_capacity(event_capacity),
            active_voices: 0,
            mix_l: vec![0.0; max_samples_per_cycle],
            mix_r: vec![0.0; max_samples_per_cycle],
        }
    }

    #[inline]
    pub fn key(&self, key: u8) -> &KeySlot {
        &self.keys[key as usize & 0x7F]
    }

    #[inline]
    pub fn key_mut(&mut self, key: u8) -> &mut KeySlot {
        &mut self.keys[key as usize & 0x7F]
    }

    /// Applies the per-cycle configuration snapshot.
    pub fn apply_config(&mut self, cfg: &ChannelConfig) {
        self.volume = cfg.volume;
        self.pan = cfg.pan;
        self.mute = cfg.mute;
        self.gain_compensation = cfg.gain_compensation;
        // Pointer comparison: swapping in the same instrument is free.
        let changed = match (&self.instrument, &cfg.instrument) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        };
        if changed {
            self.instrument = cfg.instrument.clone();
        }
        let gain_changed = match (&self.instrument_gain, &cfg.instrument_gain) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        };
        if gain_changed {
            self.instrument_gain = cfg.instrument_gain.clone();
        }
    }

    /// Current value of the wired gain-override cell; unity when none.
    #[inline]
    pub fn instrument_gain(&self) -> f32 {
        self.instrument_gain.as_ref().map_or(1.0, |g| g.get())
    }

    /// Collects every sounding voice slot on this channel.
    pub fn collect_active(&self, out: &mut SmallVec<[usize; 32]>) {
        out.clear();
        for key in &self.keys {
            out.extend_from_slice(&key.active);
        }
    }

    /// Drops `slot` from whatever key holds it.
    pub fn forget_voice(&mut self, key: u8, slot: usize) {
        let k = self.key_mut(key);
        if let Some(i) = k.active.iter().position(|&s| s == slot) {
            k.active.swap_remove(i);
            self.active_voices = self.active_voices.saturating_sub(1);
        }
    }

    /// Keys whose note-off was deferred by the sustain pedal.
    pub fn take_deferred(&mut self) -> SmallVec<[(u8, u8); 8]> {
        let mut out = SmallVec::new();
        for (i, key) in self.keys.iter_mut().enumerate() {
            if key.deferred_off {
                key.deferred_off = false;
                out.push((i as u8, key.off_velocity));
            }
        }
        out
    }
}
