//! Door sensor debouncing.
//!
//! A raw reading only becomes the accepted door state after it has been
//! observed continuously for the debounce window. Readings equal to the
//! accepted state never produce an edge, so consecutive identical readings
//! are suppressed before any event is raised.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::DoorState;

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    accepted: Option<DoorState>,
    candidate: Option<(DoorState, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accepted: None,
            candidate: None,
        }
    }

    /// Last accepted state, if any reading has settled yet.
    pub fn accepted(&self) -> Option<DoorState> {
        self.accepted
    }

    /// Feed one raw reading taken at `now`.
    ///
    /// Returns the new state when an edge is accepted. The first settled
    /// reading only establishes the baseline and returns `None`.
    pub fn update(&mut self, reading: DoorState, now: Instant) -> Option<DoorState> {
        if self.accepted == Some(reading) {
            self.candidate = None;
            return None;
        }

        match self.candidate {
            Some((state, since)) if state == reading => {
                if now.duration_since(since) < self.window {
                    return None;
                }
                self.candidate = None;
                let previous = self.accepted.replace(reading);
                previous.map(|_| reading)
            }
            _ => {
                self.candidate = Some((reading, now));
                None
            }
        }
    }
}
