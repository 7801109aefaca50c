//! RT-safe event types with sample-accurate timing.

/// Monotonic sample-point time used by the scheduler queue.
///
/// Runs for the lifetime of the engine; even at 96 kHz a `u64` sample
/// counter does not wrap for millions of years, so schedule times are
/// effectively unique.
pub type SchedTime = u64;

/// Monotonic wall-clock timestamp in microseconds, supplied by the MIDI
/// driver with every raw event.
pub type TimeStamp = u64;

/// What happened, with the parameters that matter to the render path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8, velocity: u8 },
    /// Pitch wheel, centered at 0 (-8192..=8191).
    PitchBend { value: i16 },
    ControlChange { controller: u8, value: u8 },
    /// Channel aftertouch. Stored in the controller table at index 128.
    ChannelPressure { value: u8 },
    /// Polyphonic key pressure.
    NotePressure { key: u8, value: u8 },
    /// System exclusive message; the payload passes through opaquely and
    /// the synthesis core ignores it.
    SysEx { length: u16 },
    /// Transformed from a note-off or a sustain-pedal-up.
    Release { key: u8, velocity: u8 },
    /// Transformed from a note-on arriving while sustain is down.
    CancelRelease { key: u8 },
}

/// One event, pinned to an offset inside the current audio cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Sample offset into the current cycle's buffer (0..N).
    pub fragment_pos: u32,
}

impl Event {
    #[inline]
    pub fn new(kind: EventKind, fragment_pos: u32) -> Self {
        Self { kind, fragment_pos }
    }

    #[inline]
    pub fn note_on(fragment_pos: u32, key: u8, velocity: u8) -> Self {
        Self::new(EventKind::NoteOn { key, velocity }, fragment_pos)
    }

    #[inline]
    pub fn note_off(fragment_pos: u32, key: u8, velocity: u8) -> Self {
        Self::new(EventKind::NoteOff { key, velocity }, fragment_pos)
    }

    #[inline]
    pub fn control_change(fragment_pos: u32, controller: u8, value: u8) -> Self {
        Self::new(EventKind::ControlChange { controller, value }, fragment_pos)
    }

    #[inline]
    pub fn pitch_bend(fragment_pos: u32, value: i16) -> Self {
        Self::new(EventKind::PitchBend { value }, fragment_pos)
    }

    #[inline]
    pub fn release(fragment_pos: u32, key: u8, velocity: u8) -> Self {
        Self::new(EventKind::Release { key, velocity }, fragment_pos)
    }

    /// The key this event addresses, if it is key-scoped.
    #[inline]
    pub fn key(&self) -> Option<u8> {
        match self.kind {
            EventKind::NoteOn { key, .. }
            | EventKind::NoteOff { key, .. }
            | EventKind::NotePressure { key, .. }
            | EventKind::Release { key, .. }
            | EventKind::CancelRelease { key } => Some(key),
            _ => None,
        }
    }
}
