//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use continuo::prelude::*;
use continuo::sampler::{self, WavSource};
use continuo::synth::EngineConfig;
use continuo::Engine;

/// Writes a mono 16-bit WAV of `frames` samples produced by `f`.
pub fn write_wav(path: &Path, frames: u32, sample_rate: u32, f: impl Fn(u32) -> f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let v = (f(i).clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(v).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn test_data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join("continuo_scenarios");
    let _ = std::fs::create_dir_all(&dir);
    dir
}

/// Loader that treats every path as a single-sample WAV instrument with
/// one full-range region.
pub struct WavLoader;

impl InstrumentLoader for WavLoader {
    fn load(
        &self,
        path: &Path,
        index: usize,
        progress: &mut dyn FnMut(f32),
    ) -> sampler::Result<Instrument> {
        progress(0.0);
        let source = Arc::new(WavSource::open(path)?);
        let sample = Arc::new(Sample::new(path, index, source, None)?);
        progress(1.0);
        let region = Region::builder(sample).build();
        Ok(Instrument::new(
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            vec![region],
        ))
    }
}

/// Builds an instrument over an in-memory sample filled by `f`.
pub fn memory_instrument(
    frames: usize,
    sample_rate: u32,
    max_samples_per_cycle: usize,
    preload: u64,
    f: impl Fn(usize) -> f32,
) -> Arc<Instrument> {
    let data: Vec<f32> = (0..frames).map(f).collect();
    let source = Arc::new(sampler::MemorySource::new(data, 1, sample_rate));
    let sample = Arc::new(Sample::new("/mem/scenario", 0, source, None).unwrap());
    sample.ensure_cached(preload, max_samples_per_cycle).unwrap();
    let region = Region::builder(sample).build();
    Arc::new(Instrument::new("scenario", vec![region]))
}

/// Engine wired for scenario tests: instrument on channel 0, MIDI and
/// config handles taken.
pub fn scenario_engine(
    instrument: Arc<Instrument>,
    max_voices: usize,
) -> (
    Engine,
    MidiInput,
    continuo::core::ConfigWriter<EngineConfig>,
) {
    let mut engine = Engine::builder()
        .sample_rate(48_000)
        .max_samples_per_cycle(256)
        .channels(2)
        .max_voices(max_voices)
        .build()
        .unwrap();
    let midi = engine.take_midi_input().unwrap();
    let mut config = engine.take_config_writer().unwrap();
    config.update(|cfg| cfg.channels[0].instrument = Some(Arc::clone(&instrument)));
    (engine, midi, config)
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |a, &b| a.max(b.abs()))
}
