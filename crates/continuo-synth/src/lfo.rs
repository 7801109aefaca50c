//! Per-voice low frequency oscillators.
//!
//! A voice runs up to three of these: an unsigned one dipping the
//! amplitude, an unsigned one dipping the filter cutoff, and a signed
//! one swinging the pitch in cents. Output is one scalar per
//! sub-fragment; the contract is only on the envelope of the wave, and
//! the implementation is a phase-accumulator triangle.

use continuo_sampler::{LfoParams, LfoStartLevel};

/// Value range emitted by [`Lfo::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoRange {
    /// 0 ..= depth
    Unsigned,
    /// -depth ..= +depth
    Signed,
}

/// Triangle LFO with internal plus controller-driven depth.
#[derive(Debug, Clone)]
pub struct Lfo {
    range: LfoRange,
    max: f32,
    phase: f32,
    incr: f32,
    internal_depth: f32,
    ext_depth_coeff: f32,
    depth: f32,
    flip: bool,
    /// External controller number driving the depth, if any.
    pub controller: Option<u8>,
}

impl Lfo {
    /// `max` bounds the total depth (1.0 for amplitude and cutoff,
    /// 1200.0 cents for pitch).
    pub fn new(range: LfoRange, max: f32) -> Self {
        Self {
            range,
            max,
            phase: 0.0,
            incr: 0.0,
            internal_depth: 0.0,
            ext_depth_coeff: 0.0,
            depth: 0.0,
            flip: false,
            controller: None,
        }
    }

    /// Arms the oscillator at note-on. `rate` is sub-fragments per
    /// second; `ctrl_value` is the current value of the external
    /// controller (ignored when the params name none).
    pub fn trigger(&mut self, params: &LfoParams, ctrl_value: u8, rate: f32) {
        self.incr = if rate > 0.0 {
            params.frequency / rate
        } else {
            0.0
        };
        self.phase = match params.start_level {
            LfoStartLevel::Max => 0.0,
            LfoStartLevel::Mid => 0.25,
            LfoStartLevel::Min => 0.5,
        };
        self.internal_depth = params.internal_depth.min(self.max);
        self.ext_depth_coeff = params.control_depth / 127.0;
        self.flip = params.flip_phase;
        self.controller = params.controller;
        self.update(if params.controller.is_some() {
            ctrl_value
        } else {
            0
        });
    }

    /// Recomputes the amplitude from a new controller value.
    pub fn update(&mut self, ctrl_value: u8) {
        self.depth =
            (self.internal_depth + self.ext_depth_coeff * ctrl_value.min(127) as f32).min(self.max);
    }

    /// Advances one sub-fragment and returns the current level.
    pub fn process(&mut self) -> f32 {
        // Triangle running 1 -> 0 -> 1 over a period, so phase 0 sits
        // at the wave's maximum.
        let mut wave = (1.0 - 2.0 * self.phase).abs();
        if self.flip {
            wave = 1.0 - wave;
        }
        self.phase += self.incr;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        match self.range {
            LfoRange::Unsigned => self.depth * wave,
            LfoRange::Signed => self.depth * (2.0 * wave - 1.0),
        }
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.depth = 0.0;
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }
}
