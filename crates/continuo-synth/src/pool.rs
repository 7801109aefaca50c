//! Bounded voice pool with the engine's stealing policy.

use crate::eg::EgStage;
use crate::voice::Voice;

/// Arena of voice slots. Capacity is the engine's global polyphony;
/// allocation never grows the storage, so the render thread stays free
/// of the allocator.
pub struct VoicePool {
    slots: Vec<Option<Voice>>,
    free: Vec<usize>,
}

impl VoicePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).rev().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Reserves a slot, or `None` when the pool is saturated.
    pub fn reserve(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Places a voice into a previously reserved slot.
    pub fn set(&mut self, slot: usize, voice: Voice) {
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(voice);
    }

    /// Returns an unused reservation.
    pub fn release_reservation(&mut self, slot: usize) {
        debug_assert!(self.slots[slot].is_none());
        self.free.push(slot);
    }

    pub fn get(&self, slot: usize) -> Option<&Voice> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Voice> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Removes the voice and frees the slot.
    pub fn remove(&mut self, slot: usize) -> Option<Voice> {
        let voice = self.slots.get_mut(slot).and_then(Option::take);
        if voice.is_some() {
            self.free.push(slot);
        }
        voice
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Voice)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (i, v)))
    }

    /// Picks the voice to sacrifice when allocation fails: the oldest
    /// voice already in its release stage, or failing that the oldest
    /// voice overall. `channel` restricts the hunt to one channel (for
    /// the per-channel voice cap).
    pub fn steal_candidate(&self, channel: Option<usize>) -> Option<usize> {
        let eligible = || {
            self.iter()
                .filter(|(_, v)| channel.map_or(true, |c| v.channel_index == c))
        };

        eligible()
            .filter(|(_, v)| matches!(v.eg_stage(), EgStage::Release))
            .min_by_key(|(_, v)| v.note_on_time)
            .map(|(i, _)| i)
            .or_else(|| {
                eligible()
                    .min_by_key(|(_, v)| v.note_on_time)
                    .map(|(i, _)| i)
            })
    }
}
