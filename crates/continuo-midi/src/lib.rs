//! Event plumbing for the continuo engine: sample-accurate event types,
//! the fragment clock that anchors wall-clock timestamps to buffer
//! offsets, per-channel event queues, the long-range scheduler queue,
//! and raw MIDI wire decoding.

pub mod clock;
pub mod event;
pub mod queue;
pub mod sched;
pub mod wire;

pub use clock::EventClock;
pub use event::{Event, EventKind, SchedTime, TimeStamp};
pub use queue::EventQueue;
pub use sched::SchedulerQueue;
pub use wire::RawMidi;
