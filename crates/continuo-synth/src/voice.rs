//! One sounding note: per-voice render state machine.
//!
//! A voice reads its sample from the RAM cache, hands over to a disk
//! stream when it outruns the cached head, and renders one slice of
//! audio per cycle in power-of-two sub-fragments. Modulators (three
//! EGs, three LFOs) are advanced once per sub-fragment; the sampler
//! kernel interpolates, loops, pans and filters inside it.

use std::sync::Arc;

use continuo_core::{
    cents_to_ratio, max_cycle_read, ONE_CENT_TOLERANCE,
};
use continuo_midi::{Event, EventKind};
use continuo_sampler::{
    CacheBuf, ControlSource, DiskStreamHandle, DiskStreamer, LoopSpec, Region, Sample, StreamState,
};
use tracing::{debug, warn};

use crate::eg::{Egadsr, EgStage, EgTrigger, PitchEg};
use crate::filter::{controller_cutoff, velocity_cutoff, Biquad, FILTER_CUTOFF_MIN};
use crate::lfo::{Lfo, LfoRange};

/// Controller influence factors on EG segment times.
const EG_ATTACK_INFLUENCE_K: f32 = 0.031;
const EG_DECAY_INFLUENCE_K: f32 = 0.00775;

/// Cutoff/resonance drift below which biquad coefficients are reused.
const FILTER_RECALC_DELTA: f32 = 0.01;

/// Playback source of the voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Triggered, first render cycle not yet started.
    Init,
    /// Reading the sample's RAM cache.
    Ram,
    /// Reading the disk stream's ring buffer.
    Disk,
    /// Source exhausted or killed; the voice frees itself.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceType {
    Normal,
    /// Spawned by a note-off; short and percussive, attenuated by how
    /// long the note was held.
    ReleaseTrigger,
}

/// What `render` left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceOutcome {
    Active,
    /// The voice ended and its slot can be recycled.
    Finished,
}

/// Per-cycle context handed down from the engine.
pub struct RenderCtx<'a> {
    pub streamer: &'a DiskStreamer,
    pub output_rate: u32,
    pub max_samples_per_cycle: usize,
    pub subfragment: usize,
    /// Channel volume x global volume x gain compensation; zero when
    /// the channel is muted.
    pub channel_volume: f32,
}

impl RenderCtx<'_> {
    /// Modulator steps per second.
    fn subfragment_rate(&self) -> f32 {
        self.output_rate as f32 / self.subfragment as f32
    }
}

/// Everything a note-on brings to a new voice.
pub struct TriggerParams<'a> {
    pub region: &'a Arc<Region>,
    pub key: u8,
    pub velocity: u8,
    pub pitch_bend: i16,
    pub fragment_pos: u32,
    pub note_on_time: u64,
    pub ctrl: &'a [u8; 129],
    /// Per-semitone tuning offsets in cents.
    pub scale_tuning: &'a [i8; 12],
    pub release_voice: bool,
    /// Seconds the note was held; only meaningful for release voices.
    pub note_length_s: f32,
    pub key_group: u32,
    /// Back-reference into the engine's channel array; voices are found
    /// again through (channel index, pool slot), never through pointers.
    pub channel_index: usize,
    pub cutoff_controller_override: Option<u8>,
    pub resonance_controller_override: Option<u8>,
}

#[derive(Debug)]
struct VoiceFilter {
    left: Biquad,
    right: Biquad,
    cutoff_ctrl: Option<u8>,
    resonance_ctrl: Option<u8>,
    /// Base cutoff in Hz before EG2/LFO2 scaling.
    cutoff: f32,
    /// Normalized resonance, updated differentially by its controller.
    resonance: f32,
    last_resonance_cc: u8,
    applied_cutoff: f32,
    applied_resonance: f32,
}

#[derive(Debug)]
struct DiskRef {
    handle: DiskStreamHandle,
    adopted: bool,
    cycles_waiting: u32,
    max_ram_pos: f64,
    /// Real frames left in the ring when the stream ended; the voice
    /// finishes once it has consumed them.
    tail_frames: Option<f64>,
}

/// Ephemeral render state for one sounding note.
pub struct Voice {
    state: PlaybackState,
    voice_type: VoiceType,
    pub key: u8,
    pub key_group: u32,
    pub note_on_time: u64,
    pub channel_index: usize,
    region: Arc<Region>,
    sample: Arc<Sample>,
    cache: Arc<CacheBuf>,
    /// Fractional playback position in frames. Absolute while reading
    /// RAM; relative to the ring read position while streaming.
    pos: f64,
    delay: u32,
    trigger_pos: u32,
    trigger_guard: bool,
    pitch_base: f64,
    pitch_bend: f64,
    volume: f32,
    crossfade_volume: f32,
    pan_left: f32,
    pan_right: f32,
    eg1: Egadsr,
    eg2: Egadsr,
    eg3: PitchEg,
    lfo1: Option<Lfo>,
    lfo2: Option<Lfo>,
    lfo3: Option<Lfo>,
    filter: Option<VoiceFilter>,
    disk: Option<DiskRef>,
    ram_loop: bool,
    loop_cycles_left: u32,
    kill_pos: Option<u32>,
}

impl Voice {
    /// Initializes and triggers a voice; orders a disk stream when the
    /// sample outgrows its RAM cache. Returns `None` when the voice
    /// cannot sound (stream pool saturated, release attenuation zero,
    /// cache missing); the note is simply dropped, as the render
    /// thread has nobody to report to.
    pub fn trigger(params: &TriggerParams, ctx: &RenderCtx) -> Option<Voice> {
        let region = Arc::clone(params.region);
        let sample = Arc::clone(&region.sample);

        let Some(cache) = sample.cache() else {
            warn!(path = %sample.path().display(), "sample has no cache, dropping note");
            return None;
        };

        let mut volume =
            region.velocity_curve.attenuation(params.velocity) / 32768.0 * region.attenuation;
        if params.release_voice {
            let scale = 1.0
                - 0.01053 * (256u32 >> region.release_decay.min(8)) as f32 * params.note_length_s;
            if scale <= 0.0 {
                return None;
            }
            volume *= scale;
        }

        let crossfade_volume = region
            .crossfade
            .map_or(1.0, |x| x.attenuation(x.source.value(params.velocity, params.ctrl)));

        let (pan_left, pan_right) = pan_gains(region.pan);

        let mut cents =
            region.fine_tune as f64 + params.scale_tuning[(params.key % 12) as usize] as f64;
        if region.pitch_track {
            cents += (params.key as i32 - region.unity_key as i32) as f64 * 100.0;
        }
        let pitch_base =
            cents_to_ratio(cents) * sample.sample_rate() as f64 / ctx.output_rate as f64;
        let pitch_bend = bend_ratio(params.pitch_bend);

        let pos = region.sample_start_offset as f64;
        let cached_frames = cache.cached_frames();
        let channels = sample.channels();

        // Disk voice: the cache holds only the head of the sample.
        let mut disk = None;
        let mut ram_loop = false;
        let mut loop_cycles_left = 0;
        if cached_frames < sample.total_frames() {
            let max_ram_pos = (cached_frames as f64
                - (max_cycle_read(ctx.max_samples_per_cycle) / channels) as f64)
                .max(0.0);
            if let Some(l) = sample.loop_spec() {
                if l.end as f64 <= max_ram_pos {
                    ram_loop = true;
                    loop_cycles_left = l.play_count;
                }
            }
            match ctx.streamer.order_new(&sample, max_ram_pos as u64, !ram_loop) {
                Some(handle) => {
                    disk = Some(DiskRef {
                        handle,
                        adopted: false,
                        cycles_waiting: 0,
                        max_ram_pos,
                        tail_frames: None,
                    });
                }
                None => {
                    warn!(path = %sample.path().display(), "disk stream order failed");
                    return None;
                }
            }
        } else if sample.loop_spec().is_some() {
            ram_loop = true;
            loop_cycles_left = sample.loop_spec().map_or(0, |l| l.play_count);
        }

        let rate = ctx.subfragment_rate();
        let mut eg1 = Egadsr::default();
        eg1.trigger(&eg_trigger(&region.eg1, params.velocity, params.ctrl), rate);
        let mut eg2 = Egadsr::default();
        let mut eg3 = PitchEg::default();
        eg3.trigger(region.eg3.depth_cents, region.eg3.decay, rate);

        let setup_lfo = |p: Option<continuo_sampler::LfoParams>, range, max| {
            p.map(|p| {
                let mut lfo = Lfo::new(range, max);
                let cc = p.controller.map_or(0, |c| params.ctrl[c as usize & 0x7F]);
                lfo.trigger(&p, cc, rate);
                lfo
            })
        };
        let lfo1 = setup_lfo(region.lfo1, LfoRange::Unsigned, 1.0);
        let lfo2 = setup_lfo(region.lfo2, LfoRange::Unsigned, 1.0);
        let lfo3 = setup_lfo(region.lfo3, LfoRange::Signed, 1200.0);

        let filter = region.filter.map(|fp| {
            eg2.trigger(&eg_trigger(&region.eg2, params.velocity, params.ctrl), rate);

            let cutoff_ctrl = params.cutoff_controller_override.or(fp.cutoff_controller);
            let resonance_ctrl = params
                .resonance_controller_override
                .or(fp.resonance_controller);

            let mut cutoff = match cutoff_ctrl {
                None => velocity_cutoff(params.velocity, fp.velocity_scale),
                Some(cc) => controller_cutoff(params.ctrl[cc as usize & 0x7F]),
            };
            if fp.cutoff_key_tracking {
                cutoff *= ((params.key as i32 - fp.key_breakpoint as i32) as f32
                    * std::f32::consts::LN_2
                    / 12.0)
                    .exp();
            }

            let res_cc = resonance_ctrl.map_or(0, |cc| params.ctrl[cc as usize & 0x7F]);
            let mut resonance = res_cc as f32 * 0.00787;
            if fp.resonance_key_tracking {
                resonance += (params.key as i32 - fp.key_breakpoint as i32) as f32 * 0.00787;
            }
            let resonance = resonance.clamp(0.0, 1.0);

            let mut f = VoiceFilter {
                left: Biquad::default(),
                right: Biquad::default(),
                cutoff_ctrl,
                resonance_ctrl,
                cutoff,
                resonance,
                last_resonance_cc: res_cc,
                applied_cutoff: cutoff,
                applied_resonance: resonance,
            };
            f.left
                .set_lowpass(cutoff, resonance, ctx.output_rate as f32);
            f.right
                .set_lowpass(cutoff, resonance, ctx.output_rate as f32);
            f
        });

        Some(Voice {
            state: PlaybackState::Init,
            voice_type: if params.release_voice {
                VoiceType::ReleaseTrigger
            } else {
                VoiceType::Normal
            },
            key: params.key,
            key_group: params.key_group,
            note_on_time: params.note_on_time,
            channel_index: params.channel_index,
            region,
            sample,
            cache,
            pos,
            delay: params.fragment_pos,
            trigger_pos: params.fragment_pos,
            trigger_guard: true,
            pitch_base,
            pitch_bend,
            volume,
            crossfade_volume,
            pan_left,
            pan_right,
            eg1,
            eg2,
            eg3,
            lfo1,
            lfo2,
            lfo3,
            filter,
            disk,
            ram_loop,
            loop_cycles_left,
            kill_pos: None,
        })
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.state
    }

    pub fn voice_type(&self) -> VoiceType {
        self.voice_type
    }

    pub fn pos(&self) -> f64 {
        self.pos
    }

    pub fn eg_stage(&self) -> EgStage {
        self.eg1.stage()
    }

    pub fn is_releasing(&self) -> bool {
        matches!(self.eg1.stage(), EgStage::Release | EgStage::End)
    }

    /// Stamps a future kill. The voice renders up to the kill position,
    /// fades out across the rest of that sub-fragment, then frees
    /// itself. Kills at or before the voice's own trigger position are
    /// ignored; later kills supersede earlier ones.
    pub fn kill(&mut self, fragment_pos: u32) {
        if self.trigger_guard && fragment_pos <= self.trigger_pos {
            return;
        }
        self.kill_pos = Some(fragment_pos);
    }

    /// Releases the disk stream, resets the modulators and marks the
    /// voice dead. No fade; used on stealing and key-group conflicts.
    pub fn kill_immediately(&mut self, streamer: &DiskStreamer) {
        if let Some(d) = self.disk.take() {
            streamer.order_delete(d.handle);
        }
        self.eg1.reset();
        self.eg2.reset();
        self.eg3.reset();
        if let Some(l) = &mut self.lfo1 {
            l.reset();
        }
        if let Some(l) = &mut self.lfo2 {
            l.reset();
        }
        if let Some(l) = &mut self.lfo3 {
            l.reset();
        }
        self.state = PlaybackState::End;
    }

    /// The audio device renegotiated its buffer size: recompute the
    /// RAM/disk handoff and re-order the stream of a voice that has not
    /// switched yet. Voices already streaming keep their stream.
    pub fn device_format_changed(&mut self, ctx: &RenderCtx) {
        if !matches!(self.state, PlaybackState::Init | PlaybackState::Ram) {
            return;
        }
        let Some(disk) = &mut self.disk else { return };

        let channels = self.sample.channels();
        let max_ram_pos = (self.cache.cached_frames() as f64
            - (max_cycle_read(ctx.max_samples_per_cycle) / channels) as f64)
            .max(0.0);
        if (max_ram_pos - disk.max_ram_pos).abs() < 1.0 {
            return;
        }

        let looping = self.sample.loop_spec().is_some() && !self.ram_loop;
        ctx.streamer.order_delete(disk.handle);
        match ctx.streamer.order_new(&self.sample, max_ram_pos as u64, looping) {
            Some(handle) => {
                disk.handle = handle;
                disk.adopted = false;
                disk.cycles_waiting = 0;
                disk.max_ram_pos = max_ram_pos;
                disk.tail_frames = None;
            }
            None => {
                debug!("stream re-order failed on device change, killing voice");
                self.kill_immediately(ctx.streamer);
            }
        }
    }

    /// Renders `out_l.len()` frames, mixing into the channel buffers.
    ///
    /// `events` is the channel's event list for this cycle, ordered by
    /// fragment position; the voice consumes the kinds addressed to it
    /// (release, cancel-release, its controllers, pitch bend).
    pub fn render(
        &mut self,
        ctx: &RenderCtx,
        events: &[Event],
        out_l: &mut [f32],
        out_r: &mut [f32],
    ) -> VoiceOutcome {
        let n = out_l.len();
        debug_assert_eq!(n, out_r.len());

        if self.state == PlaybackState::Init {
            self.state = PlaybackState::Ram;
        }
        if self.state == PlaybackState::End {
            self.kill_immediately(ctx.streamer);
            return VoiceOutcome::Finished;
        }

        // Adopt the ordered disk stream, or bail out if the disk thread
        // never delivered it.
        if self.state == PlaybackState::Disk {
            let disk = self.disk.as_mut().expect("disk state implies a stream");
            if !disk.adopted {
                if ctx.streamer.ask_for_created(disk.handle) {
                    let consumed =
                        (self.pos.floor() as u64).saturating_sub(disk.max_ram_pos as u64);
                    let channels = self.sample.channels();
                    ctx.streamer
                        .ring(disk.handle)
                        .advance_read(consumed as usize * channels);
                    self.pos -= self.pos.floor();
                    disk.adopted = true;
                } else {
                    disk.cycles_waiting += 1;
                    if disk.cycles_waiting >= 2 {
                        warn!("disk stream not available in time, killing voice");
                        self.kill_immediately(ctx.streamer);
                        return VoiceOutcome::Finished;
                    }
                    // Stay silent for one cycle while the order is
                    // serviced.
                    self.delay = 0;
                    self.trigger_guard = false;
                    return VoiceOutcome::Active;
                }
            }
        }

        // A drained stream gets topped up with silence so the
        // interpolator can run the remaining real frames out; the voice
        // ends once it has consumed them all.
        if self.state == PlaybackState::Disk {
            let disk = self.disk.as_mut().expect("disk state implies a stream");
            let ring = ctx.streamer.ring(disk.handle);
            let needed = max_cycle_read(ctx.max_samples_per_cycle);
            if ctx.streamer.state_of(disk.handle) == StreamState::End
                && ring.read_space() < needed
            {
                if disk.tail_frames.is_none() {
                    disk.tail_frames =
                        Some((ring.read_space() / self.sample.channels()) as f64);
                }
                ring.write_silence(needed);
            }
        }

        let delay = (self.delay as usize).min(n);
        let mut event_idx = 0;
        let mut killed = false;
        let mut sf_start = 0;

        while sf_start < n {
            let sf_end = (sf_start + ctx.subfragment).min(n);

            while event_idx < events.len()
                && (events[event_idx].fragment_pos as usize) < sf_end
            {
                let event = events[event_idx];
                event_idx += 1;
                if (event.fragment_pos as usize) >= delay {
                    self.apply_event(&event);
                }
            }

            if sf_end <= delay {
                sf_start = sf_end;
                continue;
            }
            let span = sf_start.max(delay)..sf_end;

            // One modulator step per sub-fragment.
            let eg1 = self.eg1.process();
            let eg3_cents = self.eg3.process() as f64;
            let lfo1_dip = self.lfo1.as_mut().map_or(0.0, Lfo::process);
            let lfo3_cents = self.lfo3.as_mut().map_or(0.0, Lfo::process) as f64;

            let amp = self.volume
                * self.crossfade_volume
                * eg1
                * (1.0 - lfo1_dip)
                * ctx.channel_volume;
            let final_pitch =
                self.pitch_base * self.pitch_bend * cents_to_ratio(eg3_cents + lfo3_cents);

            if self.filter.is_some() {
                let eg2 = self.eg2.process();
                let lfo2_dip = self.lfo2.as_mut().map_or(0.0, Lfo::process);
                let f = self.filter.as_mut().expect("checked above");
                let cutoff = (f.cutoff * eg2 * (1.0 - lfo2_dip)).max(FILTER_CUTOFF_MIN);
                // Recompute coefficients only on material change.
                if (cutoff - f.applied_cutoff).abs() > f.applied_cutoff * FILTER_RECALC_DELTA
                    || (f.resonance - f.applied_resonance).abs() > FILTER_RECALC_DELTA
                {
                    f.left
                        .set_lowpass(cutoff, f.resonance, ctx.output_rate as f32);
                    f.right
                        .set_lowpass(cutoff, f.resonance, ctx.output_rate as f32);
                    f.applied_cutoff = cutoff;
                    f.applied_resonance = f.resonance;
                }
            }

            let fade_out = self
                .kill_pos
                .is_some_and(|k| (k as usize) < sf_end);

            match self.state {
                PlaybackState::Ram => {
                    let cache = Arc::clone(&self.cache);
                    self.render_span(out_l, out_r, span, cache.data(), amp, final_pitch, fade_out);
                }
                PlaybackState::Disk => {
                    let handle = self
                        .disk
                        .as_ref()
                        .expect("disk state implies a stream")
                        .handle;
                    let ring = ctx.streamer.ring(handle);
                    let src = ring.read_slice(ring.margin());
                    self.render_span(out_l, out_r, span, src, amp, final_pitch, fade_out);
                }
                PlaybackState::Init | PlaybackState::End => unreachable!("handled above"),
            }

            if fade_out {
                killed = true;
                break;
            }
            sf_start = sf_end;
        }

        self.delay = 0;
        self.trigger_guard = false;

        if killed {
            self.kill_immediately(ctx.streamer);
            return VoiceOutcome::Finished;
        }

        // Per-state bookkeeping after the cycle.
        match self.state {
            PlaybackState::Ram => {
                if let Some(disk) = &self.disk {
                    if self.pos > disk.max_ram_pos {
                        self.state = PlaybackState::Disk;
                    }
                } else if self.pos >= self.cache.cached_frames() as f64 {
                    self.state = PlaybackState::End;
                }
            }
            PlaybackState::Disk => {
                let channels = self.sample.channels();
                let disk = self.disk.as_mut().expect("disk state implies a stream");
                let whole = self.pos.floor();
                ctx.streamer
                    .ring(disk.handle)
                    .advance_read(whole as usize * channels);
                self.pos -= whole;
                if let Some(tail) = &mut disk.tail_frames {
                    *tail -= whole;
                    if *tail <= 0.0 {
                        self.state = PlaybackState::End;
                    }
                }
            }
            _ => {}
        }

        if self.eg1.is_finished() || self.state == PlaybackState::End {
            self.kill_immediately(ctx.streamer);
            return VoiceOutcome::Finished;
        }
        VoiceOutcome::Active
    }

    fn apply_event(&mut self, event: &Event) {
        match event.kind {
            EventKind::Release { key, .. } if key == self.key => {
                self.eg1.release();
                self.eg2.release();
            }
            EventKind::CancelRelease { key } if key == self.key => {
                self.eg1.cancel_release();
                self.eg2.cancel_release();
            }
            EventKind::PitchBend { value } => {
                self.pitch_bend = bend_ratio(value);
            }
            EventKind::ControlChange { controller, value } => {
                if let Some(f) = &mut self.filter {
                    if f.cutoff_ctrl == Some(controller) {
                        f.cutoff = controller_cutoff(value);
                    }
                    if f.resonance_ctrl == Some(controller) {
                        // Differential so key tracking applied at
                        // trigger is preserved.
                        let delta = (value as i32 - f.last_resonance_cc as i32) as f32 * 0.00787;
                        f.resonance = (f.resonance + delta).clamp(0.0, 1.0);
                        f.last_resonance_cc = value;
                    }
                }
                for lfo in [&mut self.lfo1, &mut self.lfo2, &mut self.lfo3]
                    .into_iter()
                    .flatten()
                {
                    if lfo.controller == Some(controller) {
                        lfo.update(value);
                    }
                }
                if let Some(x) = self.region.crossfade {
                    if x.source.cc_number() == Some(controller) {
                        self.crossfade_volume = x.attenuation(value);
                    }
                }
            }
            _ => {}
        }
    }

    /// The sampler kernel: fills `span` of the output from `src`,
    /// advancing `pos` by `pitch` per frame. Wraps RAM loops, blends
    /// linearly when resampling, applies volume, pan and filter, and
    /// ramps to zero across the span when `fade_out` is set.
    fn render_span(
        &mut self,
        out_l: &mut [f32],
        out_r: &mut [f32],
        span: std::ops::Range<usize>,
        src: &[f32],
        amp: f32,
        pitch: f64,
        fade_out: bool,
    ) {
        let channels = self.sample.channels();
        let interpolated = (pitch - 1.0).abs() > ONE_CENT_TOLERANCE;
        let loop_spec = if self.ram_loop && self.state == PlaybackState::Ram {
            self.sample.loop_spec()
        } else {
            None
        };

        let vol_l = amp * self.pan_left;
        let vol_r = amp * self.pan_right;
        let span_len = span.len().max(1) as f32;
        let span_start = span.start;

        for i in span {
            let frame = self.pos.floor();
            let idx = frame as usize;
            let frac = (self.pos - frame) as f32;

            let (mut l, mut r) = if channels == 2 {
                let l0 = sample_at(src, idx * 2);
                let r0 = sample_at(src, idx * 2 + 1);
                if interpolated {
                    let l1 = sample_at(src, idx * 2 + 2);
                    let r1 = sample_at(src, idx * 2 + 3);
                    (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
                } else {
                    (l0, r0)
                }
            } else {
                let v0 = sample_at(src, idx);
                let v = if interpolated {
                    let v1 = sample_at(src, idx + 1);
                    v0 + (v1 - v0) * frac
                } else {
                    v0
                };
                (v, v)
            };

            if let Some(f) = &mut self.filter {
                l = f.left.process(l);
                r = f.right.process(r);
            }

            let ramp = if fade_out {
                1.0 - (i - span_start) as f32 / span_len
            } else {
                1.0
            };
            out_l[i] += l * vol_l * ramp;
            out_r[i] += r * vol_r * ramp;

            self.pos += pitch;

            if let Some(lp) = loop_spec {
                if self.pos > lp.end as f64 {
                    self.wrap_loop(lp);
                }
            }
        }
    }

    fn wrap_loop(&mut self, lp: LoopSpec) {
        if !self.ram_loop {
            return;
        }
        if lp.is_infinite() {
            self.pos = lp.start as f64 + (self.pos - lp.end as f64) % lp.length() as f64;
            return;
        }
        if self.loop_cycles_left > 1 {
            self.loop_cycles_left -= 1;
            self.pos = lp.start as f64 + (self.pos - lp.end as f64) % lp.length() as f64;
        } else {
            // Last pass played out; continue linearly to the sample end.
            self.loop_cycles_left = 0;
            self.ram_loop = false;
        }
    }
}

#[inline]
fn sample_at(src: &[f32], idx: usize) -> f32 {
    src.get(idx).copied().unwrap_or(0.0)
}

/// Pitch wheel value to frequency ratio (+-2 semitones full scale).
#[inline]
fn bend_ratio(value: i16) -> f64 {
    cents_to_ratio(value as f64 / 8192.0 * 200.0)
}

/// Equal-power-ish pan: center plays both sides at unity.
pub(crate) fn pan_gains(pan: f32) -> (f32, f32) {
    let p = pan.clamp(-1.0, 1.0);
    ((1.0 - p.max(0.0)), (1.0 + p.min(0.0)))
}

/// Applies controller influences to the region's EG parameters.
fn eg_trigger(
    p: &continuo_sampler::EgParams,
    velocity: u8,
    ctrl: &[u8; 129],
) -> EgTrigger {
    let mut cc = p.controller.value(velocity, ctrl);
    if p.controller_invert && !matches!(p.controller, ControlSource::None) {
        cc = 127 - cc;
    }
    let influence = |k: f32, exponent: u8| -> f32 {
        if exponent == 0 {
            1.0
        } else {
            1.0 + k * (1u32 << exponent) as f32 * cc as f32
        }
    };
    EgTrigger {
        pre_attack: p.pre_attack,
        attack_s: p.attack * influence(EG_ATTACK_INFLUENCE_K, p.attack_influence),
        hold_s: p.hold,
        decay1_s: p.decay1 * influence(EG_DECAY_INFLUENCE_K, p.decay_influence),
        decay2_s: p.decay2 * influence(EG_DECAY_INFLUENCE_K, p.decay_influence),
        infinite_sustain: p.infinite_sustain,
        sustain: p.sustain,
        release_s: p.release * influence(EG_DECAY_INFLUENCE_K, p.release_influence),
    }
}
