//! Wait-free configuration hand-off between a control thread and the
//! real-time thread.
//!
//! Two instances of the configuration exist. The real-time reader is
//! always directed at one of them by an atomic index and never blocks;
//! the writer mutates the shadow instance, flips the index, then waits
//! until the reader has provably let go of the old side and mirrors the
//! same mutation there. Single writer, single reader; both roles are
//! enforced by ownership of the handle types.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Shared<T> {
    configs: [UnsafeCell<T>; 2],
    current: AtomicUsize,
    reader_lock: AtomicBool,
}

unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

/// Double-buffered configuration exchange.
///
/// Constructed via [`SyncConfig::new`], which hands out the two role
/// handles. Neither handle is cloneable, so "exactly one writer thread
/// and one reader thread" is a compile-time property rather than a
/// documentation footnote.
pub struct SyncConfig<T>(std::marker::PhantomData<T>);

impl<T: Clone + Send> SyncConfig<T> {
    /// Creates the exchange with both sides initialized to `initial`.
    pub fn new(initial: T) -> (ConfigWriter<T>, ConfigReader<T>) {
        let shared = Arc::new(Shared {
            configs: [UnsafeCell::new(initial.clone()), UnsafeCell::new(initial)],
            current: AtomicUsize::new(0),
            reader_lock: AtomicBool::new(false),
        });
        (
            ConfigWriter {
                shared: Arc::clone(&shared),
                update_index: 1,
            },
            ConfigReader { shared },
        )
    }
}

/// Non-real-time side of the exchange. May block in [`switch`](Self::switch).
pub struct ConfigWriter<T> {
    shared: Arc<Shared<T>>,
    update_index: usize,
}

impl<T: Send> ConfigWriter<T> {
    /// Returns the instance the reader is *not* looking at, for mutation.
    pub fn get_for_update(&mut self) -> &mut T {
        self.update_index = self.shared.current.load(Ordering::SeqCst) ^ 1;
        unsafe { &mut *self.shared.configs[self.update_index].get() }
    }

    /// Publishes the updated instance and waits until the reader has
    /// released the old one, then returns the now-stale instance so the
    /// caller can apply the identical mutation to it.
    ///
    /// Spin-sleeps; must never be called from the real-time thread.
    pub fn switch(&mut self) -> &mut T {
        self.shared
            .current
            .store(self.update_index, Ordering::SeqCst);
        let mut spins = 0u32;
        while self.shared.reader_lock.load(Ordering::SeqCst) {
            spins += 1;
            if spins < 100 {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(Duration::from_micros(50));
            }
        }
        self.update_index ^= 1;
        unsafe { &mut *self.shared.configs[self.update_index].get() }
    }

    /// Convenience: applies `f` to the shadow side, switches, and applies
    /// the same `f` to the stale side.
    pub fn update(&mut self, mut f: impl FnMut(&mut T)) {
        f(self.get_for_update());
        f(self.switch());
    }
}

/// Real-time side of the exchange. [`lock`](Self::lock) and the guard
/// drop are a store and a load each; no syscalls, no waiting.
pub struct ConfigReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> ConfigReader<T> {
    /// Pins the current instance for reading until the guard drops.
    ///
    /// The lock flag is raised *before* the index is read: a writer that
    /// misses the flag is therefore guaranteed the reader landed on the
    /// freshly published side.
    pub fn lock(&mut self) -> ConfigReadGuard<'_, T> {
        self.shared.reader_lock.store(true, Ordering::SeqCst);
        let index = self.shared.current.load(Ordering::SeqCst);
        ConfigReadGuard {
            shared: &self.shared,
            index,
        }
    }
}

/// Read guard for the active configuration instance.
pub struct ConfigReadGuard<'a, T> {
    shared: &'a Shared<T>,
    index: usize,
}

impl<T> std::ops::Deref for ConfigReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.shared.configs[self.index].get() }
    }
}

impl<T> Drop for ConfigReadGuard<'_, T> {
    fn drop(&mut self) {
        self.shared.reader_lock.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_sees_old_until_switch() {
        let (mut writer, mut reader) = SyncConfig::new(1u64);

        *writer.get_for_update() = 2;
        // Not switched yet: reader still sees the old value.
        assert_eq!(*reader.lock(), 1);

        *writer.switch() = 2;
        assert_eq!(*reader.lock(), 2);
    }

    #[test]
    fn update_mirrors_both_sides() {
        let (mut writer, mut reader) = SyncConfig::new(0u64);
        writer.update(|v| *v += 5);
        assert_eq!(*reader.lock(), 5);
        writer.update(|v| *v += 5);
        assert_eq!(*reader.lock(), 10);
    }

    #[test]
    fn switch_without_update_is_noop_for_reader() {
        let (mut writer, mut reader) = SyncConfig::new(7u64);
        writer.get_for_update();
        writer.switch();
        assert_eq!(*reader.lock(), 7);
        writer.get_for_update();
        writer.switch();
        assert_eq!(*reader.lock(), 7);
    }

    #[test]
    fn switch_waits_for_reader() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let (mut writer, mut reader) = SyncConfig::new(0u64);
        let switched = Arc::new(AtomicBool::new(false));

        let guard = reader.lock();
        let switched2 = Arc::clone(&switched);
        let handle = std::thread::spawn(move || {
            *writer.get_for_update() = 1;
            *writer.switch() = 1;
            switched2.store(true, Ordering::SeqCst);
            writer
        });

        // Writer must be stuck while the guard is alive.
        std::thread::sleep(Duration::from_millis(20));
        assert!(!switched.load(Ordering::SeqCst));
        assert_eq!(*guard, 0);
        drop(guard);

        handle.join().unwrap();
        assert!(switched.load(Ordering::SeqCst));
        assert_eq!(*reader.lock(), 1);
    }

    #[test]
    fn never_observes_torn_config() {
        // Writer keeps both fields equal; the reader must never see them
        // disagree, no matter how the switches interleave.
        #[derive(Clone, Copy)]
        struct Pair {
            a: u64,
            b: u64,
        }

        let (mut writer, mut reader) = SyncConfig::new(Pair { a: 0, b: 0 });
        let stop = Arc::new(AtomicBool::new(false));

        let stop2 = Arc::clone(&stop);
        let writer_thread = std::thread::spawn(move || {
            let mut n = 0u64;
            while !stop2.load(Ordering::Relaxed) {
                n += 1;
                writer.update(|p| {
                    p.a = n;
                    p.b = n;
                });
            }
        });

        for _ in 0..200_000 {
            let cfg = reader.lock();
            assert_eq!(cfg.a, cfg.b);
        }
        stop.store(true, Ordering::Relaxed);
        writer_thread.join().unwrap();
    }
}
