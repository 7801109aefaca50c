//! Per-channel event list for one audio cycle.

use crate::event::Event;

/// Events addressed to one channel during the current cycle, ordered by
/// fragment position with ties kept in insertion order.
///
/// Storage is reserved up front and reused cycle after cycle, so the
/// real-time thread only allocates if a cycle carries more events than
/// the reserve (at which point the growth is logged by the caller and
/// amortized away).
#[derive(Debug)]
pub struct EventQueue {
    events: Vec<Event>,
    sorted: bool,
}

impl EventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            sorted: true,
        }
    }

    pub fn push(&mut self, event: Event) {
        if let Some(last) = self.events.last() {
            if last.fragment_pos > event.fragment_pos {
                self.sorted = false;
            }
        }
        self.events.push(event);
    }

    /// Events in ascending fragment order. Sorts lazily; the sort is
    /// stable so same-position events keep their insertion order.
    pub fn ordered(&mut self) -> &[Event] {
        if !self.sorted {
            self.events.sort_by_key(|e| e.fragment_pos);
            self.sorted = true;
        }
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.sorted = true;
    }
}
