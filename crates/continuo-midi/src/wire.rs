//! Raw MIDI wire decode.
//!
//! The MIDI driver pushes timestamped three-byte messages into the
//! engine's ingress ring; at the top of each cycle they are decoded
//! into [`EventKind`]s and stamped with a fragment position.

use crate::event::{EventKind, TimeStamp};

/// One raw MIDI message as delivered by the driver.
///
/// Fixed size and `Copy` so it can travel through a lock-free ring.
/// System exclusive payloads are not carried here; the driver reports
/// only their length and the payload passes through outside the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawMidi {
    pub timestamp: TimeStamp,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl RawMidi {
    pub fn new(timestamp: TimeStamp, status: u8, data1: u8, data2: u8) -> Self {
        Self {
            timestamp,
            status,
            data1,
            data2,
        }
    }

    /// MIDI channel encoded in the status byte's low nibble.
    #[inline]
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    /// Decodes the message into an engine event, or `None` for message
    /// kinds the synthesis core does not consume (program change,
    /// realtime bytes).
    pub fn decode(&self) -> Option<EventKind> {
        let key = self.data1 & 0x7F;
        let value = self.data2 & 0x7F;
        match self.status & 0xF0 {
            0x80 => Some(EventKind::NoteOff {
                key,
                velocity: value,
            }),
            // Running-status convention: a note-on with velocity 0 is a
            // note-off.
            0x90 if value == 0 => Some(EventKind::NoteOff { key, velocity: 0 }),
            0x90 => Some(EventKind::NoteOn {
                key,
                velocity: value,
            }),
            0xA0 => Some(EventKind::NotePressure { key, value }),
            0xB0 => Some(EventKind::ControlChange {
                controller: key,
                value,
            }),
            0xD0 => Some(EventKind::ChannelPressure { value: key }),
            0xE0 => {
                let fourteen = ((value as i16) << 7) | key as i16;
                Some(EventKind::PitchBend {
                    value: fourteen - 8192,
                })
            }
            0xF0 if self.status == 0xF0 => Some(EventKind::SysEx {
                length: ((self.data2 as u16) << 7) | self.data1 as u16,
            }),
            _ => None,
        }
    }
}
