//! Single timer slot for state-scoped timeouts.
//!
//! At most one timer is live. Arming replaces (and aborts) the previous one.
//! Each arming gets a new generation; a firing that was already queued when
//! its timer was cancelled carries an old generation and is dropped by
//! [`TimerSlot::fired`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::state_machine::TimerKind;

#[derive(Debug, Clone, Copy)]
struct Fired {
    kind: TimerKind,
    generation: u64,
}

#[derive(Debug)]
struct LiveTimer {
    kind: TimerKind,
    generation: u64,
    deadline: Instant,
    handle: AbortHandle,
}

#[derive(Debug)]
pub struct TimerSlot {
    live: Option<LiveTimer>,
    generation: u64,
    tx: mpsc::Sender<Fired>,
    rx: mpsc::Receiver<Fired>,
}

impl TimerSlot {
    pub fn new() -> Self {
        // a cancelled timer may still have one firing queued
        let (tx, rx) = mpsc::channel(4);
        Self {
            live: None,
            generation: 0,
            tx,
            rx,
        }
    }

    /// Arm `kind` to fire after `duration`, replacing any live timer.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn arm(&mut self, kind: TimerKind, duration: Duration) -> Instant {
        self.cancel_all();

        self.generation += 1;
        let generation = self.generation;
        let deadline = Instant::now() + duration;
        let tx = self.tx.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(Fired { kind, generation }).await;
        });

        trace!("Armed {} timer for {:?} (generation {})", kind, duration, generation);
        self.live = Some(LiveTimer {
            kind,
            generation,
            deadline,
            handle: task.abort_handle(),
        });
        deadline
    }

    /// Cancel the live timer if it is of `kind`.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match &self.live {
            Some(live) if live.kind == kind => {
                self.cancel_all();
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&mut self) {
        if let Some(live) = self.live.take() {
            live.handle.abort();
            trace!("Cancelled {} timer (generation {})", live.kind, live.generation);
        }
    }

    /// Kind of the live timer.
    pub fn live(&self) -> Option<TimerKind> {
        self.live.as_ref().map(|live| live.kind)
    }

    /// Deadline of the live timer.
    pub fn deadline(&self) -> Option<Instant> {
        self.live.as_ref().map(|live| live.deadline)
    }

    /// Time left on the live timer.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Wait for the live timer to fire.
    ///
    /// Stale firings are discarded. Cancel safe.
    pub async fn fired(&mut self) -> TimerKind {
        loop {
            let Some(fired) = self.rx.recv().await else {
                // the slot holds a sender, so the channel never closes
                return std::future::pending().await;
            };

            match &self.live {
                Some(live) if live.generation == fired.generation => {
                    self.live = None;
                    return fired.kind;
                }
                _ => debug!(
                    "Dropping stale {} timer (generation {})",
                    fired.kind, fired.generation
                ),
            }
        }
    }
}

impl Default for TimerSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_duration() {
        let mut slot = TimerSlot::new();
        let start = Instant::now();
        slot.arm(TimerKind::Purchase, Duration::from_secs(120));

        assert_eq!(slot.fired().await, TimerKind::Purchase);
        assert!(start.elapsed() >= Duration::from_secs(120));
        assert_eq!(slot.live(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let mut slot = TimerSlot::new();
        slot.arm(TimerKind::Sleep, Duration::from_secs(1));
        slot.arm(TimerKind::DoorUnlock, Duration::from_secs(5));

        assert_eq!(slot.fired().await, TimerKind::DoorUnlock);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_only_matching_kind() {
        let mut slot = TimerSlot::new();
        slot.arm(TimerKind::DoorAlarm, Duration::from_secs(10));

        assert!(!slot.cancel(TimerKind::Sleep));
        assert_eq!(slot.live(), Some(TimerKind::DoorAlarm));
        assert!(slot.cancel(TimerKind::DoorAlarm));
        assert_eq!(slot.live(), None);

        let fired = tokio::time::timeout(Duration::from_secs(60), slot.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_firing_is_dropped() {
        let mut slot = TimerSlot::new();
        slot.arm(TimerKind::Purchase, Duration::from_secs(1));

        // let the firing land in the channel, then re-arm before reading it
        tokio::time::sleep(Duration::from_secs(2)).await;
        slot.arm(TimerKind::DoorUnlock, Duration::from_secs(30));

        let start = Instant::now();
        assert_eq!(slot.fired().await, TimerKind::DoorUnlock);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining() {
        let mut slot = TimerSlot::new();
        assert_eq!(slot.remaining(), None);

        slot.arm(TimerKind::Sleep, Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(slot.remaining(), Some(Duration::from_secs(45)));
    }
}
