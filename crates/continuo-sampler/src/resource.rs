//! Reference-counted sharing of parsed instruments and opened sample
//! files.
//!
//! Instruments are loaded once per `(path, index)` and served to every
//! channel that asks; the last consumer handing its borrow back frees
//! the resource (unless it was pinned persistent). A parallel sub-cache
//! does the same for opened source files, since one file usually holds
//! many instruments. Everything here may block and is therefore
//! reserved for non-real-time threads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use continuo_core::SharedGain;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::instrument::{Instrument, InstrumentLoader};
use crate::source::SampleFile;

/// Identity of an instrument inside a (possibly multi-instrument) file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentKey {
    pub path: PathBuf,
    pub index: usize,
}

impl InstrumentKey {
    pub fn new(path: impl Into<PathBuf>, index: usize) -> Self {
        Self {
            path: path.into(),
            index,
        }
    }
}

impl std::fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.path.display(), self.index)
    }
}

/// Whether a loaded instrument survives its last borrower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvailabilityMode {
    /// Freed when the refcount reaches zero.
    #[default]
    OnDemand,
    /// Kept resident once loaded.
    Persistent,
}

/// Identifies a borrower (an engine channel, usually).
pub type ConsumerId = usize;

/// Sample caching parameters applied while an instrument loads.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub preload_frames: u64,
    pub max_samples_per_cycle: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            preload_frames: crate::DEFAULT_PRELOAD_FRAMES,
            max_samples_per_cycle: 128,
        }
    }
}

type ProgressFn = Box<dyn Fn(&InstrumentKey, f32) + Send + Sync>;

struct Entry {
    instrument: Arc<Instrument>,
    borrows: HashMap<ConsumerId, usize>,
    mode: AvailabilityMode,
    /// Largest cycle size any borrower has announced; caches are
    /// re-extended when a bigger one arrives.
    max_samples_per_cycle: usize,
    /// Volume override living beside the entry; the engine reads it
    /// lock-free once per cycle through the handle.
    gain: Arc<SharedGain>,
}

impl Entry {
    fn refcount(&self) -> usize {
        self.borrows.values().sum()
    }
}

struct FileEntry {
    file: Arc<SampleFile>,
    refcount: usize,
}

/// Shared cache of instruments keyed by `(path, index)`.
pub struct ResourceManager {
    loader: Arc<dyn InstrumentLoader>,
    policy: CachePolicy,
    inner: Mutex<Inner>,
    files: DashMap<PathBuf, FileEntry>,
    subscribers: Mutex<Vec<ProgressFn>>,
}

struct Inner {
    entries: HashMap<InstrumentKey, Entry>,
    /// Which key each consumer currently borrows; borrowing a new key
    /// implicitly releases the old one.
    consumer_keys: HashMap<ConsumerId, InstrumentKey>,
}

impl ResourceManager {
    pub fn new(loader: Arc<dyn InstrumentLoader>, policy: CachePolicy) -> Self {
        Self {
            loader,
            policy,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                consumer_keys: HashMap::new(),
            }),
            files: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a progress subscriber; called with 0.0..=1.0 while
    /// instruments load.
    pub fn subscribe_progress(&self, f: impl Fn(&InstrumentKey, f32) + Send + Sync + 'static) {
        self.subscribers.lock().push(Box::new(f));
    }

    fn dispatch_progress(&self, key: &InstrumentKey, fraction: f32) {
        for f in self.subscribers.lock().iter() {
            f(key, fraction);
        }
    }

    /// Borrows the instrument for `consumer`, loading it on first use.
    ///
    /// Re-entrant borrows by the same consumer stack; a borrow of a
    /// *different* key first hands the previous one back.
    /// `max_samples_per_cycle` is the borrower's audio buffer size and
    /// drives the silence padding of the sample caches.
    pub fn borrow(
        &self,
        key: &InstrumentKey,
        consumer: ConsumerId,
        max_samples_per_cycle: usize,
    ) -> Result<Arc<Instrument>> {
        let mut inner = self.inner.lock();

        let previous = match inner.consumer_keys.get(&consumer) {
            Some(held) if held != key => Some(held.clone()),
            _ => None,
        };
        if let Some(held) = previous {
            self.release_all_locked(&mut inner, &held, consumer);
        }

        if !inner.entries.contains_key(key) {
            let entry = self.load_entry(key, max_samples_per_cycle)?;
            inner.entries.insert(key.clone(), entry);
        }

        let entry = inner.entries.get_mut(key).expect("entry just ensured");
        if entry.max_samples_per_cycle < max_samples_per_cycle {
            // A device with a bigger buffer joined; the cached silence
            // pads are no longer sufficient.
            for sample in entry.instrument.samples() {
                sample.ensure_cached(self.policy.preload_frames, max_samples_per_cycle)?;
            }
            entry.max_samples_per_cycle = max_samples_per_cycle;
        }
        *entry.borrows.entry(consumer).or_insert(0) += 1;
        let instrument = Arc::clone(&entry.instrument);
        inner.consumer_keys.insert(consumer, key.clone());
        Ok(instrument)
    }

    /// Returns one borrow. The entry is freed once no borrows remain,
    /// unless it is pinned persistent.
    pub fn hand_back(&self, key: &InstrumentKey, consumer: ConsumerId) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(key) else {
            return;
        };
        if let Some(count) = entry.borrows.get_mut(&consumer) {
            *count -= 1;
            if *count == 0 {
                entry.borrows.remove(&consumer);
                inner.consumer_keys.remove(&consumer);
            }
        }
        self.reap_locked(&mut inner, key);
    }

    /// Pins or unpins an instrument. Pinning an unloaded instrument
    /// loads it immediately.
    pub fn set_mode(&self, key: &InstrumentKey, mode: AvailabilityMode) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(key) {
            if mode == AvailabilityMode::OnDemand {
                return Ok(());
            }
            let entry = self.load_entry(key, self.policy.max_samples_per_cycle)?;
            inner.entries.insert(key.clone(), entry);
        }
        let entry = inner.entries.get_mut(key).expect("entry just ensured");
        entry.mode = mode;
        self.reap_locked(&mut inner, key);
        Ok(())
    }

    pub fn mode(&self, key: &InstrumentKey) -> Option<AvailabilityMode> {
        self.inner.lock().entries.get(key).map(|e| e.mode)
    }

    /// Per-instrument gain override (1.0 when unset).
    pub fn instrument_gain(&self, key: &InstrumentKey) -> f32 {
        self.inner
            .lock()
            .entries
            .get(key)
            .map_or(1.0, |e| e.gain.get())
    }

    /// Takes effect on the next render cycle of every channel wired to
    /// this instrument's gain cell.
    pub fn set_instrument_gain(&self, key: &InstrumentKey, gain: f32) {
        if let Some(entry) = self.inner.lock().entries.get(key) {
            entry.gain.set(gain);
        }
    }

    /// The entry's live gain cell, for wiring into a channel's
    /// configuration next to the instrument itself. The render thread
    /// reads it without touching the manager.
    pub fn instrument_gain_handle(&self, key: &InstrumentKey) -> Option<Arc<SharedGain>> {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|e| Arc::clone(&e.gain))
    }

    pub fn refcount(&self, key: &InstrumentKey) -> usize {
        self.inner
            .lock()
            .entries
            .get(key)
            .map_or(0, |e| e.refcount())
    }

    /// Keys of every currently loaded instrument.
    pub fn loaded(&self) -> Vec<InstrumentKey> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    /// Borrows the opened source file for `path`, opening it on first
    /// use. One open file serves every instrument loaded from it.
    pub fn borrow_file(&self, path: &Path) -> Result<Arc<SampleFile>> {
        if let Some(mut entry) = self.files.get_mut(path) {
            entry.refcount += 1;
            return Ok(Arc::clone(&entry.file));
        }
        let file = Arc::new(SampleFile::open(path)?);
        debug!(path = %path.display(), "opened sample file");
        self.files.insert(
            path.to_path_buf(),
            FileEntry {
                file: Arc::clone(&file),
                refcount: 1,
            },
        );
        Ok(file)
    }

    /// Returns one file borrow; the file closes with its last borrower.
    pub fn hand_back_file(&self, path: &Path) {
        let remove = match self.files.get_mut(path) {
            Some(mut entry) => {
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.refcount == 0
            }
            None => false,
        };
        if remove {
            self.files.remove(path);
            debug!(path = %path.display(), "closed sample file");
        }
    }

    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    fn load_entry(&self, key: &InstrumentKey, max_samples_per_cycle: usize) -> Result<Entry> {
        info!(%key, "loading instrument");
        // The file structure accounts for the first 90% of reported
        // progress, sample caching for the rest.
        let mut report = |f: f32| self.dispatch_progress(key, 0.9 * f.clamp(0.0, 1.0));
        let instrument = self
            .loader
            .load(&key.path, key.index, &mut report)?;

        let samples = instrument.samples();
        let total = samples.len().max(1);
        for (i, sample) in samples.iter().enumerate() {
            self.dispatch_progress(key, 0.9 + 0.1 * i as f32 / total as f32);
            sample.ensure_cached(self.policy.preload_frames, max_samples_per_cycle)?;
        }
        self.dispatch_progress(key, 1.0);
        info!(%key, regions = instrument.region_count(), "instrument ready");

        Ok(Entry {
            instrument: Arc::new(instrument),
            borrows: HashMap::new(),
            mode: AvailabilityMode::OnDemand,
            max_samples_per_cycle,
            gain: Arc::new(SharedGain::default()),
        })
    }

    fn release_all_locked(&self, inner: &mut Inner, key: &InstrumentKey, consumer: ConsumerId) {
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.borrows.remove(&consumer);
        }
        inner.consumer_keys.remove(&consumer);
        self.reap_locked(inner, key);
    }

    fn reap_locked(&self, inner: &mut Inner, key: &InstrumentKey) {
        let free = inner
            .entries
            .get(key)
            .is_some_and(|e| e.refcount() == 0 && e.mode == AvailabilityMode::OnDemand);
        if free {
            inner.entries.remove(key);
            debug!(%key, "freed instrument");
        }
    }
}
