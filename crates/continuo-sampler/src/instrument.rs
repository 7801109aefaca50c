//! The immutable articulation model: regions, their modulation
//! parameters, and the instrument that indexes them.
//!
//! Instrument files are parsed outside the core; a parser implements
//! [`InstrumentLoader`] and hands back this tree. Everything here is
//! immutable after load and shared by `Arc`.

use std::path::Path;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::Result;
use crate::sample::Sample;

/// Where a modulation parameter takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSource {
    #[default]
    None,
    Velocity,
    ChannelPressure,
    Cc(u8),
}

impl ControlSource {
    /// Resolves the source against a note-on velocity and the channel's
    /// controller table (index 128 holds channel aftertouch).
    #[inline]
    pub fn value(&self, velocity: u8, ctrl: &[u8; 129]) -> u8 {
        match *self {
            ControlSource::None => 0,
            ControlSource::Velocity => velocity,
            ControlSource::ChannelPressure => ctrl[128],
            ControlSource::Cc(n) => ctrl[n as usize & 0x7F],
        }
    }

    #[inline]
    pub fn cc_number(&self) -> Option<u8> {
        match *self {
            ControlSource::Cc(n) => Some(n),
            _ => None,
        }
    }
}

/// Amplitude / cutoff envelope generator parameters. Times in seconds,
/// levels normalized to 0..=1.
#[derive(Debug, Clone, Copy)]
pub struct EgParams {
    pub pre_attack: f32,
    pub attack: f32,
    pub hold: f32,
    pub decay1: f32,
    pub decay2: f32,
    pub infinite_sustain: bool,
    pub sustain: f32,
    pub release: f32,
    pub controller: ControlSource,
    pub controller_invert: bool,
    /// Influence exponents (0 = none); see the voice trigger contract.
    pub attack_influence: u8,
    pub decay_influence: u8,
    pub release_influence: u8,
}

impl Default for EgParams {
    fn default() -> Self {
        Self {
            pre_attack: 1.0,
            attack: 0.0,
            hold: 0.0,
            decay1: 0.0,
            decay2: 0.0,
            infinite_sustain: true,
            sustain: 1.0,
            release: 0.01,
            controller: ControlSource::None,
            controller_invert: false,
            attack_influence: 0,
            decay_influence: 0,
            release_influence: 0,
        }
    }
}

/// Pitch envelope: starts `depth` cents away and decays to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct PitchEgParams {
    pub depth_cents: f32,
    pub decay: f32,
}

/// Where the LFO wave starts within its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LfoStartLevel {
    #[default]
    Max,
    Mid,
    Min,
}

/// Low frequency oscillator parameters.
#[derive(Debug, Clone, Copy)]
pub struct LfoParams {
    pub frequency: f32,
    /// Firm oscillator amplitude, 0..=1 (cents for the pitch LFO).
    pub internal_depth: f32,
    /// How much amplitude the external controller can add.
    pub control_depth: f32,
    pub controller: Option<u8>,
    pub start_level: LfoStartLevel,
    pub flip_phase: bool,
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            frequency: 1.0,
            internal_depth: 0.0,
            control_depth: 0.0,
            controller: None,
            start_level: LfoStartLevel::Max,
            flip_phase: false,
        }
    }
}

/// Lowpass filter articulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterParams {
    pub cutoff_controller: Option<u8>,
    pub resonance_controller: Option<u8>,
    /// Scales the cutoff-from-velocity curve when no cutoff controller
    /// is assigned (0..=127).
    pub velocity_scale: u8,
    pub cutoff_key_tracking: bool,
    pub resonance_key_tracking: bool,
    pub key_breakpoint: u8,
}

/// Velocity to attenuation mapping, in the 0..=32768 fixed-point range
/// the voice divides down at trigger time.
#[derive(Debug, Clone)]
pub enum VelocityCurve {
    /// Straight `velocity / 127`.
    Linear,
    /// Precomputed response table indexed by velocity.
    Table(Box<[u16; 128]>),
}

impl Default for VelocityCurve {
    fn default() -> Self {
        VelocityCurve::Linear
    }
}

impl VelocityCurve {
    /// Builds a table for `v -> (v/127)^gamma`; `gamma > 1` softens low
    /// velocities, `gamma < 1` compresses the dynamic range.
    pub fn power(gamma: f32) -> Self {
        let mut table = Box::new([0u16; 128]);
        for (v, slot) in table.iter_mut().enumerate() {
            *slot = ((v as f32 / 127.0).powf(gamma) * 32768.0) as u16;
        }
        VelocityCurve::Table(table)
    }

    #[inline]
    pub fn attenuation(&self, velocity: u8) -> f32 {
        let v = velocity.min(127);
        match self {
            VelocityCurve::Linear => v as f32 / 127.0 * 32768.0,
            VelocityCurve::Table(t) => t[v as usize] as f32,
        }
    }
}

/// Crossfade attenuation driven by a controller: fades in across
/// `in_start..in_end`, holds, fades out across `out_start..out_end`.
#[derive(Debug, Clone, Copy)]
pub struct CrossfadeSpec {
    pub source: ControlSource,
    pub in_start: u8,
    pub in_end: u8,
    pub out_start: u8,
    pub out_end: u8,
}

impl CrossfadeSpec {
    pub fn attenuation(&self, value: u8) -> f32 {
        let v = value.min(127);
        if v < self.in_start {
            0.0
        } else if v < self.in_end {
            (v - self.in_start) as f32 / (self.in_end - self.in_start) as f32
        } else if v <= self.out_start {
            1.0
        } else if v < self.out_end {
            (self.out_end - v) as f32 / (self.out_end - self.out_start) as f32
        } else {
            0.0
        }
    }
}

/// Controller-value window used for dimension selection.
#[derive(Debug, Clone, Copy)]
pub struct CtrlRange {
    pub controller: u8,
    pub lo: u8,
    pub hi: u8,
}

/// A static parameter set selected by incoming MIDI coordinates.
#[derive(Debug, Clone)]
pub struct Region {
    pub key_lo: u8,
    pub key_hi: u8,
    pub vel_lo: u8,
    pub vel_hi: u8,
    pub ctrl_range: Option<CtrlRange>,
    /// Set on regions spawned by note-off rather than note-on.
    pub release_trigger: bool,
    /// Release-trigger attenuation decay exponent (0..=8).
    pub release_decay: u8,
    pub layer: u8,
    /// Exclusive class; 0 means "no group".
    pub key_group: u32,
    pub unity_key: u8,
    pub fine_tune: f32,
    pub pitch_track: bool,
    /// -1.0 (hard left) ..= 1.0 (hard right).
    pub pan: f32,
    pub sample_start_offset: u32,
    pub attenuation: f32,
    pub velocity_curve: VelocityCurve,
    pub crossfade: Option<CrossfadeSpec>,
    pub eg1: EgParams,
    pub eg2: EgParams,
    pub eg3: PitchEgParams,
    pub lfo1: Option<LfoParams>,
    pub lfo2: Option<LfoParams>,
    pub lfo3: Option<LfoParams>,
    pub filter: Option<FilterParams>,
    pub sample: Arc<Sample>,
}

impl Region {
    pub fn builder(sample: Arc<Sample>) -> RegionBuilder {
        RegionBuilder::new(sample)
    }

    /// True when this region answers the given MIDI coordinates.
    pub fn matches(&self, key: u8, velocity: u8, ctrl: &[u8; 129], release: bool) -> bool {
        if self.release_trigger != release {
            return false;
        }
        if key < self.key_lo || key > self.key_hi {
            return false;
        }
        if velocity < self.vel_lo || velocity > self.vel_hi {
            return false;
        }
        if let Some(r) = self.ctrl_range {
            let v = ctrl[r.controller as usize & 0x7F];
            if v < r.lo || v > r.hi {
                return false;
            }
        }
        true
    }
}

/// Builder for [`Region`]; everything defaults to "play the sample
/// plainly across the whole keyboard".
pub struct RegionBuilder {
    region: Region,
}

impl RegionBuilder {
    fn new(sample: Arc<Sample>) -> Self {
        Self {
            region: Region {
                key_lo: 0,
                key_hi: 127,
                vel_lo: 0,
                vel_hi: 127,
                ctrl_range: None,
                release_trigger: false,
                release_decay: 0,
                layer: 0,
                key_group: 0,
                unity_key: 60,
                fine_tune: 0.0,
                pitch_track: true,
                pan: 0.0,
                sample_start_offset: 0,
                attenuation: 1.0,
                velocity_curve: VelocityCurve::Linear,
                crossfade: None,
                eg1: EgParams::default(),
                eg2: EgParams::default(),
                eg3: PitchEgParams::default(),
                lfo1: None,
                lfo2: None,
                lfo3: None,
                filter: None,
                sample,
            },
        }
    }

    pub fn key_range(mut self, lo: u8, hi: u8) -> Self {
        self.region.key_lo = lo;
        self.region.key_hi = hi;
        self
    }

    pub fn vel_range(mut self, lo: u8, hi: u8) -> Self {
        self.region.vel_lo = lo;
        self.region.vel_hi = hi;
        self
    }

    pub fn ctrl_range(mut self, controller: u8, lo: u8, hi: u8) -> Self {
        self.region.ctrl_range = Some(CtrlRange { controller, lo, hi });
        self
    }

    pub fn release_trigger(mut self, decay: u8) -> Self {
        self.region.release_trigger = true;
        self.region.release_decay = decay;
        self
    }

    pub fn layer(mut self, layer: u8) -> Self {
        self.region.layer = layer;
        self
    }

    pub fn key_group(mut self, group: u32) -> Self {
        self.region.key_group = group;
        self
    }

    pub fn unity_key(mut self, key: u8) -> Self {
        self.region.unity_key = key;
        self
    }

    pub fn fine_tune(mut self, cents: f32) -> Self {
        self.region.fine_tune = cents;
        self
    }

    pub fn pitch_track(mut self, on: bool) -> Self {
        self.region.pitch_track = on;
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.region.pan = pan.clamp(-1.0, 1.0);
        self
    }

    pub fn sample_start_offset(mut self, frames: u32) -> Self {
        self.region.sample_start_offset = frames;
        self
    }

    pub fn attenuation(mut self, gain: f32) -> Self {
        self.region.attenuation = gain;
        self
    }

    pub fn velocity_curve(mut self, curve: VelocityCurve) -> Self {
        self.region.velocity_curve = curve;
        self
    }

    pub fn crossfade(mut self, spec: CrossfadeSpec) -> Self {
        self.region.crossfade = Some(spec);
        self
    }

    pub fn eg1(mut self, params: EgParams) -> Self {
        self.region.eg1 = params;
        self
    }

    pub fn eg2(mut self, params: EgParams) -> Self {
        self.region.eg2 = params;
        self
    }

    pub fn eg3(mut self, params: PitchEgParams) -> Self {
        self.region.eg3 = params;
        self
    }

    pub fn lfo1(mut self, params: LfoParams) -> Self {
        self.region.lfo1 = Some(params);
        self
    }

    pub fn lfo2(mut self, params: LfoParams) -> Self {
        self.region.lfo2 = Some(params);
        self
    }

    pub fn lfo3(mut self, params: LfoParams) -> Self {
        self.region.lfo3 = Some(params);
        self
    }

    pub fn filter(mut self, params: FilterParams) -> Self {
        self.region.filter = Some(params);
        self
    }

    pub fn build(self) -> Arc<Region> {
        Arc::new(self.region)
    }
}

/// Region indices matching one lookup, inline up to typical layer
/// counts.
pub type RegionMatches = SmallVec<[u16; 8]>;

/// An indexed collection of regions.
///
/// Lookup structures are built once at load: a per-key list of region
/// indices, and per-controller supplementary lists for regions whose
/// dimension selection depends on a controller value.
#[derive(Debug)]
pub struct Instrument {
    name: String,
    regions: Vec<Arc<Region>>,
    key_index: Vec<SmallVec<[u16; 4]>>,
    ctrl_index: Vec<(u8, SmallVec<[u16; 4]>)>,
}

impl Instrument {
    pub fn new(name: impl Into<String>, regions: Vec<Arc<Region>>) -> Self {
        let mut key_index: Vec<SmallVec<[u16; 4]>> = vec![SmallVec::new(); 128];
        let mut ctrl_index: Vec<(u8, SmallVec<[u16; 4]>)> = Vec::new();

        for (i, region) in regions.iter().enumerate() {
            let i = i as u16;
            for key in region.key_lo..=region.key_hi.min(127) {
                key_index[key as usize].push(i);
            }
            if let Some(r) = region.ctrl_range {
                match ctrl_index.iter_mut().find(|(c, _)| *c == r.controller) {
                    Some((_, list)) => list.push(i),
                    None => ctrl_index.push((r.controller, SmallVec::from_slice(&[i]))),
                }
            }
        }

        Self {
            name: name.into(),
            regions,
            key_index,
            ctrl_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn region(&self, index: u16) -> &Arc<Region> {
        &self.regions[index as usize]
    }

    /// Collects the regions answering a note event. Allocation-free for
    /// typical layer counts; called on the render thread.
    pub fn resolve_regions(
        &self,
        key: u8,
        velocity: u8,
        ctrl: &[u8; 129],
        release: bool,
        out: &mut RegionMatches,
    ) {
        out.clear();
        if key > 127 {
            return;
        }
        for &i in &self.key_index[key as usize] {
            if self.regions[i as usize].matches(key, velocity, ctrl, release) {
                out.push(i);
            }
        }
    }

    /// Regions whose dimension selection depends on `controller`.
    pub fn regions_on_controller(&self, controller: u8) -> &[u16] {
        self.ctrl_index
            .iter()
            .find(|(c, _)| *c == controller)
            .map(|(_, list)| list.as_slice())
            .unwrap_or(&[])
    }

    /// Every distinct sample referenced by this instrument, for cache
    /// preloading.
    pub fn samples(&self) -> Vec<Arc<Sample>> {
        let mut seen: Vec<Arc<Sample>> = Vec::new();
        for region in &self.regions {
            if !seen
                .iter()
                .any(|s| Arc::ptr_eq(s, &region.sample))
            {
                seen.push(Arc::clone(&region.sample));
            }
        }
        seen
    }
}

/// The parser boundary: pure decoders that turn an instrument file into
/// the tree above. Implementations may block; they are only ever called
/// from non-real-time threads. Progress runs 0.0..=1.0.
pub trait InstrumentLoader: Send + Sync {
    fn load(
        &self,
        path: &Path,
        index: usize,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Instrument>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn test_sample() -> Arc<Sample> {
        let source = Arc::new(MemorySource::new(vec![0.0f32; 256], 1, 44_100));
        Arc::new(Sample::new("/mem/test", 0, source, None).unwrap())
    }

    fn flat_ctrl() -> [u8; 129] {
        [0; 129]
    }

    #[test]
    fn resolves_by_key_and_velocity() {
        let sample = test_sample();
        let low = Region::builder(Arc::clone(&sample))
            .key_range(0, 63)
            .vel_range(0, 63)
            .build();
        let high = Region::builder(Arc::clone(&sample))
            .key_range(0, 63)
            .vel_range(64, 127)
            .build();
        let instrument = Instrument::new("split", vec![low, high]);

        let mut matches = RegionMatches::new();
        instrument.resolve_regions(60, 100, &flat_ctrl(), false, &mut matches);
        assert_eq!(matches.as_slice(), &[1]);

        instrument.resolve_regions(60, 10, &flat_ctrl(), false, &mut matches);
        assert_eq!(matches.as_slice(), &[0]);

        instrument.resolve_regions(100, 100, &flat_ctrl(), false, &mut matches);
        assert!(matches.is_empty());
    }

    #[test]
    fn layered_regions_all_match() {
        let sample = test_sample();
        let a = Region::builder(Arc::clone(&sample)).layer(0).build();
        let b = Region::builder(Arc::clone(&sample)).layer(1).build();
        let instrument = Instrument::new("layers", vec![a, b]);

        let mut matches = RegionMatches::new();
        instrument.resolve_regions(64, 80, &flat_ctrl(), false, &mut matches);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn release_trigger_regions_are_separate() {
        let sample = test_sample();
        let normal = Region::builder(Arc::clone(&sample)).build();
        let release = Region::builder(Arc::clone(&sample)).release_trigger(4).build();
        let instrument = Instrument::new("rt", vec![normal, release]);

        let mut matches = RegionMatches::new();
        instrument.resolve_regions(60, 80, &flat_ctrl(), false, &mut matches);
        assert_eq!(matches.as_slice(), &[0]);
        instrument.resolve_regions(60, 80, &flat_ctrl(), true, &mut matches);
        assert_eq!(matches.as_slice(), &[1]);
    }

    #[test]
    fn controller_range_selects_dimension() {
        let sample = test_sample();
        let soft = Region::builder(Arc::clone(&sample)).ctrl_range(1, 0, 63).build();
        let hard = Region::builder(Arc::clone(&sample)).ctrl_range(1, 64, 127).build();
        let instrument = Instrument::new("dim", vec![soft, hard]);

        let mut ctrl = flat_ctrl();
        let mut matches = RegionMatches::new();
        instrument.resolve_regions(60, 80, &ctrl, false, &mut matches);
        assert_eq!(matches.as_slice(), &[0]);

        ctrl[1] = 100;
        instrument.resolve_regions(60, 80, &ctrl, false, &mut matches);
        assert_eq!(matches.as_slice(), &[1]);

        assert_eq!(instrument.regions_on_controller(1).len(), 2);
        assert!(instrument.regions_on_controller(7).is_empty());
    }

    #[test]
    fn crossfade_curve_shape() {
        let spec = CrossfadeSpec {
            source: ControlSource::Cc(1),
            in_start: 10,
            in_end: 20,
            out_start: 100,
            out_end: 120,
        };
        assert_eq!(spec.attenuation(0), 0.0);
        assert_eq!(spec.attenuation(15), 0.5);
        assert_eq!(spec.attenuation(60), 1.0);
        assert_eq!(spec.attenuation(110), 0.5);
        assert_eq!(spec.attenuation(127), 0.0);
    }

    #[test]
    fn velocity_curves_scale_to_fixed_point() {
        let linear = VelocityCurve::Linear;
        assert_eq!(linear.attenuation(127), 32768.0);
        assert_eq!(linear.attenuation(0), 0.0);

        let soft = VelocityCurve::power(2.0);
        assert!(soft.attenuation(64) < linear.attenuation(64));
        assert!(soft.attenuation(127) >= 32000.0);
    }

    #[test]
    fn samples_deduplicated() {
        let sample = test_sample();
        let a = Region::builder(Arc::clone(&sample)).build();
        let b = Region::builder(Arc::clone(&sample)).build();
        let instrument = Instrument::new("dedup", vec![a, b]);
        assert_eq!(instrument.samples().len(), 1);
    }
}
