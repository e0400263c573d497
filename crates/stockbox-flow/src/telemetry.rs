//! Fire-and-forget telemetry.
//!
//! The dispatcher hands every transition and statistics change to a
//! [`TelemetrySink`]. Sinks must never block: slow consumers drop records
//! rather than delay the purchase flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockbox_core::{Level, SessionId};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state_machine::{FlowEvent, PurchaseState, StatKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub session_id: Option<SessionId>,
    pub level: Option<Level>,
    pub from: PurchaseState,
    pub to: PurchaseState,
    pub event: FlowEvent,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticRecord {
    pub kind: StatKind,
    pub value: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Transition(TransitionRecord),
    Statistic(StatisticRecord),
}

/// Receiver of telemetry records.
pub trait TelemetrySink: Send + Sync + 'static {
    /// Accept a record without blocking.
    fn record(&self, record: TelemetryRecord);
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Box<S> {
    fn record(&self, record: TelemetryRecord) {
        (**self).record(record);
    }
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for std::sync::Arc<S> {
    fn record(&self, record: TelemetryRecord) {
        (**self).record(record);
    }
}

/// Writes records to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, record: TelemetryRecord) {
        match record {
            TelemetryRecord::Transition(t) => info!(
                target: "stockbox::telemetry",
                session = ?t.session_id.map(|id| id.to_string()),
                level = ?t.level.map(|level| level.get()),
                from = %t.from,
                to = %t.to,
                event = %t.event,
                "transition"
            ),
            TelemetryRecord::Statistic(s) => info!(
                target: "stockbox::telemetry",
                counter = %s.kind,
                value = s.value,
                "statistic"
            ),
        }
    }
}

/// Forwards records into a bounded channel.
///
/// A full channel drops the record with a warning.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TelemetryRecord>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn record(&self, record: TelemetryRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!("Telemetry channel full, dropping {:?}", record);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statistic(value: u64) -> TelemetryRecord {
        TelemetryRecord::Statistic(StatisticRecord {
            kind: StatKind::CompletedPurchases,
            value,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.record(statistic(1));
        sink.record(statistic(2));

        match rx.try_recv().unwrap() {
            TelemetryRecord::Statistic(record) => assert_eq!(record.value, 1),
            other => panic!("unexpected record {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        sink.record(statistic(1));
    }

    #[test]
    fn test_record_serializes_with_type_tag() {
        let json = serde_json::to_value(statistic(3)).unwrap();
        assert_eq!(json["type"], "statistic");
        assert_eq!(json["kind"], "completed_purchases");
        assert_eq!(json["value"], 3);
    }
}
