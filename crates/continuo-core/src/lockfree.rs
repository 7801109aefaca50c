//! Lock-free parameter cells shared with the render thread.

use atomic_float::AtomicF32;
use core::sync::atomic::Ordering;

/// A gain factor written by control threads and read by the render
/// thread once per cycle.
///
/// The resource manager keeps one of these beside every loaded
/// instrument (the per-instrument volume override); the engine folds
/// the current value into the channel gain without taking any lock.
/// Cache-line aligned so the hot reader never false-shares with
/// neighboring state. Unity by default.
#[derive(Debug)]
#[repr(align(64))]
pub struct SharedGain {
    value: AtomicF32,
}

impl SharedGain {
    pub fn new(gain: f32) -> Self {
        Self {
            value: AtomicF32::new(gain),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, gain: f32) {
        self.value.store(gain.max(0.0), Ordering::Release);
    }
}

impl Default for SharedGain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unity_by_default() {
        assert_eq!(SharedGain::default().get(), 1.0);
    }

    #[test]
    fn negative_gain_clamps_to_silence() {
        let gain = SharedGain::default();
        gain.set(-2.0);
        assert_eq!(gain.get(), 0.0);
    }

    #[test]
    fn set_propagates_across_threads() {
        let gain = Arc::new(SharedGain::default());
        let writer = {
            let gain = Arc::clone(&gain);
            std::thread::spawn(move || gain.set(0.5))
        };
        writer.join().unwrap();
        assert_eq!(gain.get(), 0.5);
    }
}
