//! Purchase session and the snapshot published to readers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockbox_core::{Level, SessionId};
use stockbox_hardware::DeviceKind;
use tokio::time::Instant;

use crate::state_machine::{PurchaseState, TimerKind};
use crate::stats::Statistics;

/// The timer currently armed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTimer {
    pub kind: TimerKind,
    pub deadline: Instant,
}

/// One in-flight purchase.
///
/// Owned by the dispatcher; everyone else reads a [`SessionSnapshot`].
#[derive(Debug, Clone)]
pub struct PurchaseSession {
    pub id: SessionId,
    pub level: Level,
    pub state: PurchaseState,
    pub created_at: DateTime<Utc>,
    pub state_entered_at: DateTime<Utc>,
    pub active_timer: Option<ActiveTimer>,

    /// Purchase id assigned by the server, if it sent one.
    pub purchase_id: Option<String>,
    pub network_incident_counted: bool,
    pub server_incident_counted: bool,
}

impl PurchaseSession {
    pub fn new(level: Level) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            level,
            state: PurchaseState::Idle,
            created_at: now,
            state_entered_at: now,
            active_timer: None,
            purchase_id: None,
            network_incident_counted: false,
            server_incident_counted: false,
        }
    }

    pub fn enter(&mut self, state: PurchaseState) {
        if self.state != state {
            self.state = state;
            self.state_entered_at = Utc::now();
        }
    }

    /// Id to report completion under.
    pub fn report_id(&self) -> String {
        self.purchase_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Read-only view for the UI and telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: PurchaseState,
    pub level: Option<Level>,
    pub session_id: Option<SessionId>,

    /// Time left on the live timer.
    pub remaining: Option<Duration>,
    pub statistics: Statistics,

    /// Short customer-facing status line.
    pub message: String,

    /// Devices currently served by their simulated driver.
    pub degraded: Vec<DeviceKind>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: PurchaseState::Idle,
            level: None,
            session_id: None,
            remaining: None,
            statistics: Statistics::default(),
            message: default_message(PurchaseState::Idle, None),
            degraded: Vec::new(),
        }
    }
}

/// Status line shown for `state` when nothing more specific applies.
pub fn default_message(state: PurchaseState, level: Option<Level>) -> String {
    match (state, level) {
        (PurchaseState::Idle, _) => "Select a product".to_string(),
        (PurchaseState::Sleep, _) => "Touch the screen to start".to_string(),
        (PurchaseState::CheckingPurchase, _) => "Checking payment".to_string(),
        (PurchaseState::DoorUnlocked, Some(level)) => format!("Open compartment {}", level),
        (PurchaseState::DoorUnlocked, None) => "Open the compartment".to_string(),
        (PurchaseState::DoorOpened, _) => "Take your product and close the door".to_string(),
        (PurchaseState::DoorAlarm, _) => "Please close the door".to_string(),
        (PurchaseState::Completing, _) => "Thank you!".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = PurchaseSession::new(Level::new(3).unwrap());
        assert_eq!(session.state, PurchaseState::Idle);
        assert_eq!(session.created_at, session.state_entered_at);
        assert_eq!(session.report_id(), session.id.to_string());
    }

    #[test]
    fn test_report_id_prefers_server_id() {
        let mut session = PurchaseSession::new(Level::new(1).unwrap());
        session.purchase_id = Some("srv-9".to_string());
        assert_eq!(session.report_id(), "srv-9");
    }

    #[test]
    fn test_messages_name_the_level() {
        assert_eq!(
            default_message(PurchaseState::DoorUnlocked, Some(Level::new(4).unwrap())),
            "Open compartment 4"
        );
        assert_eq!(SessionSnapshot::default().message, "Select a product");
    }
}
