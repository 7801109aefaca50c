//! The render engine: one instance per audio device, one render cycle
//! per host callback.
//!
//! Owns the voice pool, the channels, the disk streamer, the resource
//! manager and the event clock. `render` drains MIDI into per-channel
//! queues, fires scheduled events that came due, processes channel
//! events (triggering, releasing and killing voices), renders every
//! active voice into its channel's mix buffer, and sums the channels
//! into the output.

use std::sync::Arc;

use continuo_core::{ConfigReader, ConfigWriter, SyncConfig};
use continuo_midi::{
    Event, EventClock, EventKind, RawMidi, SchedulerQueue, TimeStamp,
};
use continuo_sampler::{
    CachePolicy, DiskStreamer, InstrumentLoader, Region, RegionMatches, ResourceManager,
    StreamerConfig, DEFAULT_PRELOAD_FRAMES,
};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use smallvec::SmallVec;
use tracing::debug;

use crate::channel::Channel;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::pool::VoicePool;
use crate::voice::{
    pan_gains, PlaybackState, RenderCtx, TriggerParams, Voice, VoiceOutcome, VoiceType,
};

/// Fixed output format of one engine instance.
#[derive(Debug, Clone, Copy)]
pub struct EngineFormat {
    pub sample_rate: u32,
    pub max_samples_per_cycle: usize,
}

/// Snapshot of one sounding voice, for monitoring and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct VoiceInfo {
    pub channel: usize,
    pub key: u8,
    pub state: PlaybackState,
    pub voice_type: VoiceType,
    /// Fractional playback position in frames (stream-relative for
    /// disk voices).
    pub pos: f64,
    pub releasing: bool,
}

/// Handle pushed by the MIDI driver thread; decoupled from the engine
/// through a lock-free ring.
pub struct MidiInput {
    prod: HeapProd<RawMidi>,
}

impl MidiInput {
    /// Enqueues a raw event; `false` when the ingress ring is full (the
    /// event is dropped).
    pub fn push(&mut self, raw: RawMidi) -> bool {
        self.prod.try_push(raw).is_ok()
    }

    pub fn push_message(
        &mut self,
        timestamp: TimeStamp,
        status: u8,
        data1: u8,
        data2: u8,
    ) -> bool {
        self.push(RawMidi::new(timestamp, status, data1, data2))
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    sample_rate: u32,
    max_samples_per_cycle: usize,
    channels: usize,
    max_voices: usize,
    max_voices_per_channel: usize,
    subfragment: usize,
    streams: usize,
    preload_frames: u64,
    midi_queue: usize,
    loader: Option<Arc<dyn InstrumentLoader>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            max_samples_per_cycle: 1024,
            channels: 16,
            max_voices: 64,
            max_voices_per_channel: 64,
            subfragment: 32,
            streams: 64,
            preload_frames: DEFAULT_PRELOAD_FRAMES,
            midi_queue: 1024,
            loader: None,
        }
    }
}

impl EngineBuilder {
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn max_samples_per_cycle(mut self, frames: usize) -> Self {
        self.max_samples_per_cycle = frames;
        self
    }

    pub fn channels(mut self, count: usize) -> Self {
        self.channels = count;
        self
    }

    pub fn max_voices(mut self, count: usize) -> Self {
        self.max_voices = count;
        self
    }

    pub fn max_voices_per_channel(mut self, count: usize) -> Self {
        self.max_voices_per_channel = count;
        self
    }

    pub fn subfragment(mut self, frames: usize) -> Self {
        self.subfragment = frames;
        self
    }

    pub fn streams(mut self, count: usize) -> Self {
        self.streams = count;
        self
    }

    pub fn preload_frames(mut self, frames: u64) -> Self {
        self.preload_frames = frames;
        self
    }

    pub fn loader(mut self, loader: Arc<dyn InstrumentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn build(self) -> Result<Engine> {
        if self.sample_rate == 0 || self.max_samples_per_cycle == 0 {
            return Err(Error::InvalidConfig(
                "sample rate and cycle size must be non-zero".into(),
            ));
        }
        if !self.subfragment.is_power_of_two() || self.subfragment > self.max_samples_per_cycle {
            return Err(Error::InvalidConfig(format!(
                "subfragment {} must be a power of two no larger than the cycle size {}",
                self.subfragment, self.max_samples_per_cycle
            )));
        }
        if self.channels == 0 || self.channels > 16 {
            return Err(Error::InvalidConfig(format!(
                "channel count {} out of range 1..=16",
                self.channels
            )));
        }

        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(NoLoader) as Arc<dyn InstrumentLoader>);
        let resources = Arc::new(ResourceManager::new(
            loader,
            CachePolicy {
                preload_frames: self.preload_frames,
                max_samples_per_cycle: self.max_samples_per_cycle,
            },
        ));
        let streamer = DiskStreamer::new(StreamerConfig {
            streams: self.streams,
            max_samples_per_cycle: self.max_samples_per_cycle,
            ..StreamerConfig::default()
        })?;
        let (config_writer, config_reader) =
            SyncConfig::new(EngineConfig::with_channels(self.channels));
        let (midi_tx, midi_rx) = HeapRb::<RawMidi>::new(self.midi_queue).split();

        Ok(Engine {
            format: EngineFormat {
                sample_rate: self.sample_rate,
                max_samples_per_cycle: self.max_samples_per_cycle,
            },
            subfragment: self.subfragment,
            channels: (0..self.channels)
                .map(|_| Channel::new(self.max_samples_per_cycle, 64))
                .collect(),
            pool: VoicePool::new(self.max_voices),
            max_voices_per_channel: self.max_voices_per_channel,
            streamer,
            resources,
            clock: EventClock::new(self.sample_rate),
            sched: SchedulerQueue::with_capacity(256),
            config_reader,
            config_writer: Some(config_writer),
            midi_rx,
            midi_tx: Some(MidiInput { prod: midi_tx }),
            scale_tuning: [0; 12],
            global_volume: 1.0,
            cutoff_override: None,
            resonance_override: None,
            scratch_events: Vec::with_capacity(256),
        })
    }
}

/// Polyphonic streaming sampler engine.
pub struct Engine {
    format: EngineFormat,
    subfragment: usize,
    channels: Vec<Channel>,
    pool: VoicePool,
    max_voices_per_channel: usize,
    streamer: DiskStreamer,
    resources: Arc<ResourceManager>,
    clock: EventClock,
    sched: SchedulerQueue,
    config_reader: ConfigReader<EngineConfig>,
    config_writer: Option<ConfigWriter<EngineConfig>>,
    midi_rx: HeapCons<RawMidi>,
    midi_tx: Option<MidiInput>,
    scale_tuning: [i8; 12],
    global_volume: f32,
    cutoff_override: Option<u8>,
    resonance_override: Option<u8>,
    scratch_events: Vec<Event>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn format(&self) -> EngineFormat {
        self.format
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn active_voices(&self) -> usize {
        self.pool.active_count()
    }

    pub fn total_samples(&self) -> u64 {
        self.clock.total_samples()
    }

    /// Shared instrument cache; borrow from control threads only.
    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn streams_in_use(&self) -> usize {
        self.streamer.streams_in_use()
    }

    /// Snapshots every sounding voice.
    pub fn voice_info(&self) -> Vec<VoiceInfo> {
        self.pool
            .iter()
            .map(|(_, v)| VoiceInfo {
                channel: v.channel_index,
                key: v.key,
                state: v.playback_state(),
                voice_type: v.voice_type(),
                pos: v.pos(),
                releasing: v.is_releasing(),
            })
            .collect()
    }

    /// Hands out the writer side of the configuration exchange. Can be
    /// taken once; lives on whatever control thread does the updating.
    pub fn take_config_writer(&mut self) -> Result<ConfigWriter<EngineConfig>> {
        self.config_writer.take().ok_or(Error::ConfigWriterTaken)
    }

    /// Hands out the MIDI ingress producer. Can be taken once.
    pub fn take_midi_input(&mut self) -> Result<MidiInput> {
        self.midi_tx.take().ok_or(Error::MidiInputTaken)
    }

    /// Per-semitone tuning offsets in cents, applied at voice trigger.
    pub fn set_scale_tuning(&mut self, table: [i8; 12]) {
        self.scale_tuning = table;
    }

    /// Parks `kind` for `channel`, `micros` microseconds after
    /// `fragment_pos` of the current cycle. Delivered by a later cycle
    /// once due.
    pub fn schedule_event(
        &mut self,
        channel: usize,
        fragment_pos: u32,
        micros: u64,
        kind: EventKind,
    ) -> Result<()> {
        if channel >= self.channels.len() {
            return Err(Error::NoSuchChannel(channel));
        }
        let time = self.clock.schedule_ahead(fragment_pos, micros);
        self.sched.schedule(time, channel as u8, Event::new(kind, 0));
        Ok(())
    }

    /// The audio device renegotiated its buffer size. Recomputes the
    /// RAM/disk handoff of in-flight voices and re-orders their
    /// streams. Call between render cycles from the render context.
    pub fn device_format_changed(&mut self, max_samples_per_cycle: usize) {
        assert!(max_samples_per_cycle > 0, "cycle size must be non-zero");
        self.format.max_samples_per_cycle = max_samples_per_cycle;
        for ch in &mut self.channels {
            if ch.mix_l.len() < max_samples_per_cycle {
                ch.mix_l.resize(max_samples_per_cycle, 0.0);
                ch.mix_r.resize(max_samples_per_cycle, 0.0);
            }
        }

        let Self {
            pool,
            streamer,
            format,
            subfragment,
            ..
        } = self;
        let ctx = RenderCtx {
            streamer,
            output_rate: format.sample_rate,
            max_samples_per_cycle: format.max_samples_per_cycle,
            subfragment: *subfragment,
            channel_volume: 1.0,
        };
        for slot in 0..pool.capacity() {
            if let Some(voice) = pool.get_mut(slot) {
                voice.device_format_changed(&ctx);
            }
        }
    }

    /// Renders one audio cycle into `left`/`right` (split stereo,
    /// exactly one frame per slot). `now` is the monotonic microsecond
    /// timestamp of the cycle start, from the same clock the MIDI
    /// driver stamps events with.
    pub fn render(&mut self, now: TimeStamp, left: &mut [f32], right: &mut [f32]) {
        let n = left.len();
        assert_eq!(n, right.len(), "output buffers differ in length");
        assert!(
            n > 0 && n <= self.format.max_samples_per_cycle,
            "output buffer mis-sized: {n} frames (cycle limit {})",
            self.format.max_samples_per_cycle
        );
        self.clock.begin_cycle(now, n as u32);

        // Configuration snapshot; the guard is held just long enough to
        // copy the per-channel state.
        {
            let cfg = self.config_reader.lock();
            self.global_volume = cfg.global_volume;
            self.cutoff_override = cfg.cutoff_controller_override;
            self.resonance_override = cfg.resonance_controller_override;
            for (ch, c) in self.channels.iter_mut().zip(cfg.channels.iter()) {
                ch.apply_config(c);
            }
        }

        // Drain the MIDI ingress ring into per-channel queues.
        while let Some(raw) = self.midi_rx.try_pop() {
            let Some(kind) = raw.decode() else { continue };
            let index = raw.channel() as usize;
            if index < self.channels.len() {
                let pos = self.clock.fragment_pos(raw.timestamp);
                self.channels[index].queue.push(Event::new(kind, pos));
            }
        }

        // Scheduled events that came due this cycle.
        while let Some((time, ch, event)) = self.sched.pop_due(self.clock.cycle_end()) {
            let index = ch as usize;
            if index < self.channels.len() {
                let pos = self.clock.due_fragment_pos(time);
                self.channels[index].queue.push(Event::new(event.kind, pos));
            }
        }

        left.fill(0.0);
        right.fill(0.0);

        let mut events = std::mem::take(&mut self.scratch_events);
        let mut slots: SmallVec<[usize; 32]> = SmallVec::new();

        for ch_index in 0..self.channels.len() {
            events.clear();
            {
                let ch = &mut self.channels[ch_index];
                events.extend_from_slice(ch.queue.ordered());
                ch.queue.clear();
            }

            self.process_channel_events(ch_index, &mut events);
            // Derived events (releases, cancel-releases) were appended;
            // restore fragment order for the voices. The sort is stable.
            events.sort_by_key(|e| e.fragment_pos);

            self.render_channel_voices(ch_index, n, &events, &mut slots);

            let ch = &self.channels[ch_index];
            if !ch.mute {
                let (pan_l, pan_r) = pan_gains(ch.pan);
                for i in 0..n {
                    left[i] += ch.mix_l[i] * pan_l;
                    right[i] += ch.mix_r[i] * pan_r;
                }
            }
        }

        self.scratch_events = events;
    }

    fn process_channel_events(&mut self, ch_index: usize, events: &mut Vec<Event>) {
        let mut i = 0;
        while i < events.len() {
            let event = events[i];
            i += 1;
            match event.kind {
                EventKind::NoteOn { key, velocity } => {
                    self.note_on(ch_index, key, velocity, event.fragment_pos, events);
                }
                EventKind::NoteOff { key, velocity } => {
                    self.note_off(ch_index, key, velocity, event.fragment_pos, events);
                }
                EventKind::ControlChange { controller, value } => {
                    self.control_change(ch_index, controller, value, event.fragment_pos, events);
                }
                EventKind::PitchBend { value } => {
                    self.channels[ch_index].pitch_bend = value;
                }
                EventKind::ChannelPressure { value } => {
                    self.channels[ch_index].ctrl[128] = value;
                }
                // Consumed by the voices during rendering.
                EventKind::Release { .. } | EventKind::CancelRelease { .. } => {}
                EventKind::NotePressure { .. } | EventKind::SysEx { .. } => {}
            }
        }
    }

    fn note_on(
        &mut self,
        ch_index: usize,
        key: u8,
        velocity: u8,
        pos: u32,
        events: &mut Vec<Event>,
    ) {
        let key = key & 0x7F;
        // A re-strike while sustain holds the key revives the sounding
        // voices instead of stacking a release on top.
        if self.channels[ch_index].ctrl[64] >= 64 && self.channels[ch_index].key(key).deferred_off
        {
            self.channels[ch_index].key_mut(key).deferred_off = false;
            events.push(Event::new(EventKind::CancelRelease { key }, pos));
        }

        let Some(instrument) = self.channels[ch_index].instrument.clone() else {
            return;
        };
        let mut matches = RegionMatches::new();
        instrument.resolve_regions(
            key,
            velocity,
            &self.channels[ch_index].ctrl,
            false,
            &mut matches,
        );
        if matches.is_empty() {
            return;
        }

        self.channels[ch_index].key_mut(key).note_on_time =
            self.clock.total_samples() + pos as u64;

        for (layer, &ri) in matches.iter().enumerate() {
            let region = Arc::clone(instrument.region(ri));
            // Only the first layer joins the exclusive group, so
            // layered voices do not kill each other.
            let key_group = if layer == 0 { region.key_group } else { 0 };
            if key_group != 0 {
                self.handle_key_group_conflicts(ch_index, key_group, pos);
            }
            self.launch_voice(ch_index, &region, key, velocity, pos, key_group, false, 0.0);
        }
    }

    fn note_off(
        &mut self,
        ch_index: usize,
        key: u8,
        velocity: u8,
        pos: u32,
        events: &mut Vec<Event>,
    ) {
        let key = key & 0x7F;
        let ch = &mut self.channels[ch_index];
        if ch.ctrl[64] >= 64 {
            let k = ch.key_mut(key);
            k.deferred_off = true;
            k.off_velocity = velocity;
            return;
        }
        self.release_key(ch_index, key, velocity, pos, events);
    }

    /// Transforms a note-off into a release for every voice on the key
    /// and spawns release-trigger voices when the instrument has them.
    fn release_key(
        &mut self,
        ch_index: usize,
        key: u8,
        velocity: u8,
        pos: u32,
        events: &mut Vec<Event>,
    ) {
        events.push(Event::release(pos, key, velocity));

        if self.channels[ch_index].key(key).active.is_empty() {
            return;
        }
        let Some(instrument) = self.channels[ch_index].instrument.clone() else {
            return;
        };
        let mut matches = RegionMatches::new();
        instrument.resolve_regions(
            key,
            velocity,
            &self.channels[ch_index].ctrl,
            true,
            &mut matches,
        );
        if matches.is_empty() {
            return;
        }

        let now = self.clock.total_samples() + pos as u64;
        let held = now.saturating_sub(self.channels[ch_index].key(key).note_on_time);
        let note_length_s = held as f32 / self.format.sample_rate as f32;
        for &ri in &matches {
            let region = Arc::clone(instrument.region(ri));
            self.launch_voice(ch_index, &region, key, velocity, pos, 0, true, note_length_s);
        }
    }

    fn control_change(
        &mut self,
        ch_index: usize,
        controller: u8,
        value: u8,
        pos: u32,
        events: &mut Vec<Event>,
    ) {
        let controller = controller & 0x7F;
        let old = self.channels[ch_index].ctrl[controller as usize];
        self.channels[ch_index].ctrl[controller as usize] = value;

        match controller {
            // Sustain up: every deferred note-off becomes a release now.
            64 if value < 64 && old >= 64 => {
                let deferred = self.channels[ch_index].take_deferred();
                for (key, vel) in deferred {
                    self.release_key(ch_index, key, vel, pos, events);
                }
            }
            // All sound off: immediate.
            120 => self.all_sound_off(ch_index),
            // All notes off: regular releases.
            123 => self.all_notes_off(ch_index, pos, events),
            _ => {}
        }
    }

    fn all_sound_off(&mut self, ch_index: usize) {
        let mut slots: SmallVec<[usize; 32]> = SmallVec::new();
        self.channels[ch_index].collect_active(&mut slots);
        for slot in slots {
            self.kill_slot_now(slot);
        }
    }

    fn all_notes_off(&mut self, ch_index: usize, pos: u32, events: &mut Vec<Event>) {
        for key in 0..128u8 {
            if !self.channels[ch_index].key(key).active.is_empty() {
                events.push(Event::release(pos, key, 64));
            }
        }
    }

    /// Enqueues an ordered kill on every sounding voice of the group
    /// (group 0 means "no group" and never conflicts).
    fn handle_key_group_conflicts(&mut self, ch_index: usize, group: u32, pos: u32) {
        let mut slots: SmallVec<[usize; 32]> = SmallVec::new();
        self.channels[ch_index].collect_active(&mut slots);
        for slot in slots {
            if let Some(voice) = self.pool.get_mut(slot) {
                if voice.key_group == group {
                    voice.kill(pos);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn launch_voice(
        &mut self,
        ch_index: usize,
        region: &Arc<Region>,
        key: u8,
        velocity: u8,
        pos: u32,
        key_group: u32,
        release_voice: bool,
        note_length_s: f32,
    ) {
        let Some(slot) = self.alloc_slot(ch_index) else {
            debug!(channel = ch_index, key, "voice allocation failed, dropping note");
            return;
        };

        let voice = {
            let ch = &self.channels[ch_index];
            let params = TriggerParams {
                region,
                key,
                velocity,
                pitch_bend: ch.pitch_bend,
                fragment_pos: pos,
                note_on_time: ch.key(key).note_on_time,
                ctrl: &ch.ctrl,
                scale_tuning: &self.scale_tuning,
                release_voice,
                note_length_s,
                key_group,
                channel_index: ch_index,
                cutoff_controller_override: self.cutoff_override,
                resonance_controller_override: self.resonance_override,
            };
            let ctx = RenderCtx {
                streamer: &self.streamer,
                output_rate: self.format.sample_rate,
                max_samples_per_cycle: self.format.max_samples_per_cycle,
                subfragment: self.subfragment,
                channel_volume: 1.0,
            };
            Voice::trigger(&params, &ctx)
        };

        match voice {
            Some(v) => {
                self.pool.set(slot, v);
                let ch = &mut self.channels[ch_index];
                ch.key_mut(key).active.push(slot);
                ch.active_voices += 1;
            }
            None => self.pool.release_reservation(slot),
        }
    }

    /// Reserves a voice slot, stealing when the channel or the engine
    /// is saturated. The stolen voice dies immediately; the retry may
    /// still fail, in which case the note is dropped.
    fn alloc_slot(&mut self, ch_index: usize) -> Option<usize> {
        if self.channels[ch_index].active_voices >= self.max_voices_per_channel {
            let victim = self.pool.steal_candidate(Some(ch_index))?;
            self.kill_slot_now(victim);
        }
        if let Some(slot) = self.pool.reserve() {
            return Some(slot);
        }
        let victim = self.pool.steal_candidate(None)?;
        debug!(victim, "stealing voice");
        self.kill_slot_now(victim);
        self.pool.reserve()
    }

    fn kill_slot_now(&mut self, slot: usize) {
        if let Some(mut voice) = self.pool.remove(slot) {
            voice.kill_immediately(&self.streamer);
            self.channels[voice.channel_index].forget_voice(voice.key, slot);
        }
    }

    fn render_channel_voices(
        &mut self,
        ch_index: usize,
        n: usize,
        events: &[Event],
        slots: &mut SmallVec<[usize; 32]>,
    ) {
        let Self {
            channels,
            pool,
            streamer,
            format,
            subfragment,
            global_volume,
            ..
        } = self;
        let ch = &mut channels[ch_index];
        ch.mix_l[..n].fill(0.0);
        ch.mix_r[..n].fill(0.0);
        ch.collect_active(slots);
        if slots.is_empty() {
            return;
        }

        let ctx = RenderCtx {
            streamer,
            output_rate: format.sample_rate,
            max_samples_per_cycle: format.max_samples_per_cycle,
            subfragment: *subfragment,
            channel_volume: ch.volume
                * ch.gain_compensation
                * ch.instrument_gain()
                * *global_volume,
        };

        let mut finished: SmallVec<[usize; 8]> = SmallVec::new();
        for &slot in slots.iter() {
            let Some(voice) = pool.get_mut(slot) else {
                continue;
            };
            let outcome = voice.render(&ctx, events, &mut ch.mix_l[..n], &mut ch.mix_r[..n]);
            if outcome == VoiceOutcome::Finished {
                finished.push(slot);
            }
        }
        for slot in finished {
            if let Some(voice) = pool.remove(slot) {
                ch.forget_voice(voice.key, slot);
            }
        }
    }
}

/// Placeholder loader for engines whose instruments are built
/// programmatically and assigned through the config exchange.
struct NoLoader;

impl InstrumentLoader for NoLoader {
    fn load(
        &self,
        path: &std::path::Path,
        index: usize,
        _progress: &mut dyn FnMut(f32),
    ) -> continuo_sampler::Result<continuo_sampler::Instrument> {
        Err(continuo_sampler::Error::InstrumentLoad {
            path: path.to_path_buf(),
            index,
            reason: "engine has no instrument loader configured".into(),
        })
    }
}
