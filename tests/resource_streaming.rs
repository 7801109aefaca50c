//! Loader-to-output integration: WAV-backed instruments served by the
//! resource manager, streamed from disk by real file I/O.

#[path = "helpers/mod.rs"]
mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use continuo::prelude::*;
use continuo::{Engine, PlaybackState};
use helpers::{peak, test_data_dir, write_wav, WavLoader};

const CYCLE: usize = 256;

fn engine_with_loader() -> Engine {
    Engine::builder()
        .sample_rate(48_000)
        .max_samples_per_cycle(CYCLE)
        .channels(2)
        .max_voices(8)
        .preload_frames(32_768)
        .loader(Arc::new(WavLoader))
        .build()
        .unwrap()
}

#[test]
fn borrow_load_play_from_wav() {
    let path = test_data_dir().join("borrow_play.wav");
    write_wav(&path, 20_000, 48_000, |i| ((i % 101) as f32 - 50.0) / 64.0);

    let mut engine = engine_with_loader();
    let mut midi = engine.take_midi_input().unwrap();
    let mut config = engine.take_config_writer().unwrap();

    let progress: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let progress = Arc::clone(&progress);
        engine
            .resources()
            .subscribe_progress(move |_, f| progress.lock().unwrap().push(f));
    }

    let key = InstrumentKey::new(&path, 0);
    let instrument = engine.resources().borrow(&key, 0, CYCLE).unwrap();
    config.update(|cfg| cfg.channels[0].instrument = Some(Arc::clone(&instrument)));

    {
        let seen = progress.lock().unwrap();
        assert_eq!(*seen.last().unwrap(), 1.0, "load must complete");
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];
    midi.push_message(0, 0x90, 60, 100);
    engine.render(0, &mut l, &mut r);
    assert!(peak(&l) > 0.01, "WAV instrument must sound");

    // A second consumer shares the same loaded instrument.
    let again = engine.resources().borrow(&key, 1, CYCLE).unwrap();
    assert!(Arc::ptr_eq(&instrument, &again));
    assert_eq!(engine.resources().refcount(&key), 2);

    engine.resources().hand_back(&key, 0);
    engine.resources().hand_back(&key, 1);
    assert_eq!(engine.resources().refcount(&key), 0);

    let _ = std::fs::remove_file(path);
}

#[test]
fn wav_disk_voice_streams_from_file() {
    let path = test_data_dir().join("stream_long.wav");
    // ~6 seconds; far beyond the 32k preload.
    write_wav(&path, 300_000, 48_000, |i| {
        (i as f32 * 0.05).sin() * 0.5
    });

    let mut engine = engine_with_loader();
    let mut midi = engine.take_midi_input().unwrap();
    let mut config = engine.take_config_writer().unwrap();

    let key = InstrumentKey::new(&path, 0);
    let instrument = engine.resources().borrow(&key, 0, CYCLE).unwrap();
    config.update(|cfg| cfg.channels[0].instrument = Some(Arc::clone(&instrument)));

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];
    midi.push_message(0, 0x90, 60, 100);
    engine.render(0, &mut l, &mut r);
    assert_eq!(engine.streams_in_use(), 1);

    // Run through the cached head into streamed playback.
    let mut reached_disk = false;
    for cycle in 0..160 {
        l.fill(0.0);
        r.fill(0.0);
        engine.render(0, &mut l, &mut r);
        assert_eq!(engine.active_voices(), 1, "voice lost at cycle {cycle}");
        assert!(peak(&l) > 0.0, "silence at cycle {cycle}");
        if engine.voice_info()[0].state == PlaybackState::Disk {
            reached_disk = true;
            break;
        }
    }
    assert!(reached_disk, "voice never reached the disk stream");

    for _ in 0..50 {
        l.fill(0.0);
        r.fill(0.0);
        engine.render(0, &mut l, &mut r);
        assert!(peak(&l) > 0.0, "streamed audio must keep flowing");
    }

    let _ = std::fs::remove_file(path);
}

#[test]
fn instrument_gain_override_scales_output() {
    let path = test_data_dir().join("gain_override.wav");
    write_wav(&path, 48_000, 48_000, |_| 0.5);

    let mut engine = engine_with_loader();
    let mut midi = engine.take_midi_input().unwrap();
    let mut config = engine.take_config_writer().unwrap();

    let key = InstrumentKey::new(&path, 0);
    let instrument = engine.resources().borrow(&key, 0, CYCLE).unwrap();
    let gain = engine.resources().instrument_gain_handle(&key).unwrap();
    config.update(|cfg| {
        cfg.channels[0].instrument = Some(Arc::clone(&instrument));
        cfg.channels[0].instrument_gain = Some(Arc::clone(&gain));
    });

    let mut l = vec![0.0f32; CYCLE];
    let mut r = vec![0.0f32; CYCLE];
    midi.push_message(0, 0x90, 60, 127);
    engine.render(0, &mut l, &mut r);
    let unity = peak(&l);
    assert!(unity > 0.4, "constant sample at full velocity, got {unity}");

    engine.resources().set_instrument_gain(&key, 0.25);
    l.fill(0.0);
    r.fill(0.0);
    engine.render(0, &mut l, &mut r);
    let quartered = peak(&l);
    assert!(
        (quartered - unity * 0.25).abs() < unity * 0.01,
        "override must scale playback: {quartered} vs {}",
        unity * 0.25
    );

    // Back to unity without touching the config exchange.
    engine.resources().set_instrument_gain(&key, 1.0);
    l.fill(0.0);
    r.fill(0.0);
    engine.render(0, &mut l, &mut r);
    assert!((peak(&l) - unity).abs() < unity * 0.01);

    let _ = std::fs::remove_file(path);
}

#[test]
fn loader_failure_is_structured() {
    let engine = engine_with_loader();
    let missing = InstrumentKey::new("/nonexistent/instrument.wav", 3);
    let err = engine.resources().borrow(&missing, 0, CYCLE).unwrap_err();
    let text = err.to_string();
    assert!(
        text.contains("/nonexistent/instrument.wav"),
        "error must carry the path: {text}"
    );
}

#[test]
fn persistent_instruments_survive_consumers() {
    let path = test_data_dir().join("persistent.wav");
    write_wav(&path, 4_000, 48_000, |_| 0.25);

    let engine = engine_with_loader();
    let loads = Arc::new(AtomicUsize::new(0));
    {
        let loads = Arc::clone(&loads);
        engine.resources().subscribe_progress(move |_, f| {
            if f == 0.0 {
                loads.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let key = InstrumentKey::new(&path, 0);
    engine.resources().borrow(&key, 0, CYCLE).unwrap();
    engine
        .resources()
        .set_mode(&key, AvailabilityMode::Persistent)
        .unwrap();
    engine.resources().hand_back(&key, 0);

    // Still resident: the next borrow does not reload.
    engine.resources().borrow(&key, 1, CYCLE).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    let _ = std::fs::remove_file(path);
}
