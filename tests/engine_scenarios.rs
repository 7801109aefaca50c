//! End-to-end engine scenarios: RAM playback, disk streaming handoff,
//! key groups, stealing, config swaps and pitch bend.

#[path = "helpers/mod.rs"]
mod helpers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use continuo::prelude::*;
use continuo::{cents_to_ratio, PlaybackState};
use helpers::{memory_instrument, peak, scenario_engine};

const CYCLE: usize = 256;

fn render(engine: &mut Engine, l: &mut [f32], r: &mut [f32]) {
    l.fill(0.0);
    r.fill(0.0);
    engine.render(0, l, r);
}

/// Scenario 1: a 10k-frame sample below the preload threshold plays
/// entirely from RAM, ends when the position passes the sample end, and
/// decays monotonically once released.
#[test]
fn short_note_plays_from_ram_only() {
    let instrument = memory_instrument(10_000, 48_000, CYCLE, 32_768, |_| 0.8);
    let (mut engine, mut midi, _config) = scenario_engine(instrument, 8);

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];

    midi.push_message(0, 0x90, 60, 100);
    render(&mut engine, &mut l, &mut r);

    let info = engine.voice_info();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].state, PlaybackState::Ram);
    assert!((info[0].pos - CYCLE as f64).abs() < 1e-9);
    // No disk stream was ordered for a fully cached sample.
    assert_eq!(engine.streams_in_use(), 0);

    let mut cycles = 1;
    while engine.active_voices() > 0 {
        render(&mut engine, &mut l, &mut r);
        cycles += 1;
        assert!(cycles < 100, "RAM voice must end at the sample end");
    }
    // 10_000 frames at 256 per cycle.
    assert!((40..=42).contains(&cycles), "ended after {cycles} cycles");
}

/// Released voices fade monotonically.
#[test]
fn release_volume_is_monotonic() {
    let instrument = memory_instrument(480_000, 48_000, CYCLE, 1 << 20, |_| 0.8);
    let (mut engine, mut midi, _config) = scenario_engine(instrument, 8);

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];
    midi.push_message(0, 0x90, 60, 100);
    render(&mut engine, &mut l, &mut r);

    midi.push_message(0, 0x80, 60, 0);
    let mut last = f32::MAX;
    while engine.active_voices() > 0 {
        render(&mut engine, &mut l, &mut r);
        let level = peak(&l);
        assert!(
            level <= last + 1e-6,
            "release must not grow: {level} after {last}"
        );
        last = level;
    }
}

/// Scenario 2: a 1M-frame sample with a 32k preload switches to disk
/// streaming once the position passes
/// `cache_frames - max_samples_per_cycle * 2^max_pitch`.
#[test]
fn long_note_switches_to_disk_streaming() {
    let instrument = memory_instrument(1_000_000, 48_000, CYCLE, 32_768, |i| {
        ((i % 97) as f32 - 48.0) / 64.0
    });
    let (mut engine, mut midi, _config) = scenario_engine(instrument, 8);

    let max_ram_pos = 32_768.0 - (CYCLE << 4) as f64;
    assert_eq!(max_ram_pos, 28_672.0);

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];
    midi.push_message(0, 0x90, 60, 100);
    render(&mut engine, &mut l, &mut r);
    assert_eq!(engine.streams_in_use(), 1, "disk voice orders a stream");

    // Render until the cache limit; the voice must be in disk state no
    // later than the cycle after its position passed max_ram_pos.
    let mut cycle = 1;
    loop {
        let info = engine.voice_info();
        assert_eq!(info.len(), 1, "voice must survive the handoff");
        match info[0].state {
            PlaybackState::Ram | PlaybackState::Init => {
                assert!(
                    info[0].pos <= max_ram_pos + CYCLE as f64,
                    "still in RAM past the handoff point (pos {})",
                    info[0].pos
                );
            }
            PlaybackState::Disk => break,
            other => panic!("unexpected state {other:?}"),
        }
        render(&mut engine, &mut l, &mut r);
        cycle += 1;
        assert!(cycle < 120, "never switched to disk");
    }
    // 28_672 / 256 = 112 cycles to reach the handoff.
    assert!(cycle >= 112, "switched too early (cycle {cycle})");

    // Streaming keeps producing audio.
    for _ in 0..50 {
        render(&mut engine, &mut l, &mut r);
        assert_eq!(engine.active_voices(), 1);
        assert!(peak(&l) > 0.0, "stream under-run");
    }

    // Killing the voice returns its stream to the pool.
    midi.push_message(0, 0xB0, 120, 0);
    render(&mut engine, &mut l, &mut r);
    assert_eq!(engine.active_voices(), 0);
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(engine.streams_in_use(), 0);
}

/// Scenario 3: two note-ons one frame apart in the same exclusive
/// class; the first voice dies within the cycle of the second note-on.
#[test]
fn key_group_conflict_one_frame_apart() {
    let data: Vec<f32> = vec![0.5; 480_000];
    let source = Arc::new(continuo::sampler::MemorySource::new(data, 1, 48_000));
    let sample = Arc::new(Sample::new("/mem/kg", 0, source, None).unwrap());
    sample.ensure_cached(1 << 20, CYCLE).unwrap();
    let region = Region::builder(sample).key_group(7).build();
    let instrument = Arc::new(Instrument::new("kg", vec![region]));

    let (mut engine, mut midi, _config) = scenario_engine(instrument, 8);

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];

    // One frame at 48 kHz is ~21 us.
    midi.push_message(1_000_000, 0x90, 60, 100);
    midi.push_message(1_000_021, 0x90, 72, 100);
    l.fill(0.0);
    r.fill(0.0);
    engine.render(1_000_000, &mut l, &mut r);

    let info = engine.voice_info();
    assert_eq!(info.len(), 1, "conflicting voice must be gone");
    assert_eq!(info[0].key, 72);
}

/// Scenario 4: polyphony 2, three note-ons; the third steals the oldest
/// voice.
#[test]
fn voice_stealing_takes_oldest() {
    let instrument = memory_instrument(480_000, 48_000, CYCLE, 1 << 20, |_| 0.5);
    let (mut engine, mut midi, _config) = scenario_engine(instrument, 2);

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];

    midi.push_message(0, 0x90, 60, 100);
    render(&mut engine, &mut l, &mut r);
    midi.push_message(0, 0x90, 64, 100);
    render(&mut engine, &mut l, &mut r);
    midi.push_message(0, 0x90, 67, 100);
    render(&mut engine, &mut l, &mut r);

    let mut keys: Vec<u8> = engine.voice_info().iter().map(|v| v.key).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec![64, 67], "oldest voice (60) must be stolen");
}

/// Scenario 5: a control thread flips the global volume while the
/// render thread runs; every cycle sees exactly one of the two values,
/// never a blend.
#[test]
fn config_swap_is_never_torn() {
    let instrument = memory_instrument(480_000, 48_000, CYCLE, 1 << 20, |_| 1.0);
    let (mut engine, mut midi, config) = scenario_engine(instrument, 8);

    let stop = Arc::new(AtomicBool::new(false));
    let mut config = config;
    // Leave the initial 1.0 behind before rendering starts, so every
    // cycle observes one of the two toggled values.
    config.update(|cfg| cfg.global_volume = 0.25);
    let writer_thread = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut level = 0.25f32;
            while !stop.load(Ordering::Relaxed) {
                config.update(|cfg| cfg.global_volume = level);
                level = if level == 0.25 { 0.75 } else { 0.25 };
            }
        })
    };

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];
    midi.push_message(0, 0x90, 60, 127);
    render(&mut engine, &mut l, &mut r);

    for _ in 0..500 {
        render(&mut engine, &mut l, &mut r);
        let nonzero: Vec<f32> = l.iter().copied().filter(|v| *v != 0.0).collect();
        assert!(!nonzero.is_empty());
        let level = nonzero[0];
        assert!(
            (level - 0.25).abs() < 1e-3 || (level - 0.75).abs() < 1e-3,
            "volume {level} is neither configuration"
        );
        for &v in &nonzero {
            assert_eq!(v, level, "torn configuration within one cycle");
        }
    }

    stop.store(true, Ordering::Relaxed);
    writer_thread.join().unwrap();
}

/// Scenario 6: full-scale pitch bend advances the playback position by
/// cents_to_ratio(200) per output frame.
#[test]
fn pitch_bend_advances_proportionally() {
    let instrument = memory_instrument(480_000, 48_000, CYCLE, 1 << 20, |_| 0.5);
    let (mut engine, mut midi, _config) = scenario_engine(instrument, 8);

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];
    midi.push_message(0, 0x90, 60, 100);
    render(&mut engine, &mut l, &mut r);
    let before = engine.voice_info()[0].pos;

    // Wheel hard up: +8191 of 8192 over a +-200 cent range.
    midi.push_message(0, 0xE0, 0x7F, 0x7F);
    render(&mut engine, &mut l, &mut r);
    let after = engine.voice_info()[0].pos;

    let ratio = (after - before) / CYCLE as f64;
    let expected = cents_to_ratio(8191.0 / 8192.0 * 200.0);
    assert!(
        (ratio - expected).abs() < 1e-3,
        "advance ratio {ratio} vs expected {expected} (~1.1225)"
    );
    assert!((expected - 1.1225).abs() < 1e-3);
}

/// Release-trigger regions spawn a voice on note-off.
#[test]
fn note_off_spawns_release_trigger_voice() {
    let data: Vec<f32> = vec![0.5; 48_000];
    let source = Arc::new(continuo::sampler::MemorySource::new(data, 1, 48_000));
    let sample = Arc::new(Sample::new("/mem/rt", 0, source, None).unwrap());
    sample.ensure_cached(1 << 20, CYCLE).unwrap();

    let normal = Region::builder(Arc::clone(&sample)).build();
    let release = Region::builder(sample).release_trigger(4).build();
    let instrument = Arc::new(Instrument::new("rt", vec![normal, release]));

    let (mut engine, mut midi, _config) = scenario_engine(instrument, 8);

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];
    midi.push_message(0, 0x90, 60, 100);
    render(&mut engine, &mut l, &mut r);
    assert_eq!(engine.active_voices(), 1);

    midi.push_message(0, 0x80, 60, 64);
    render(&mut engine, &mut l, &mut r);
    let info = engine.voice_info();
    assert!(
        info.iter()
            .any(|v| v.voice_type == continuo::synth::VoiceType::ReleaseTrigger),
        "note-off must spawn the release-trigger region"
    );
}
