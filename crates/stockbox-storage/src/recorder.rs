//! Telemetry sink that persists records to SQLite.
//!
//! [`SqliteRecorder::record`] never touches the database: it queues the
//! record on a bounded channel and returns. A background task drains the
//! channel and writes each record. When the queue is full the record is
//! dropped with a warning, so a slow disk never stalls the purchase flow.
//!
//! The task stops once every recorder clone is dropped and the queue is
//! empty; awaiting its [`JoinHandle`] flushes pending records.

use stockbox_flow::{TelemetryRecord, TelemetrySink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::Database;
use crate::repositories::{SqliteTelemetryRepository, TelemetryRepository};

/// Default queue depth between the flow and the writer task.
pub const RECORDER_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct SqliteRecorder {
    tx: mpsc::Sender<TelemetryRecord>,
}

impl SqliteRecorder {
    /// Start the writer task on `db`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn(db: &Database, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let repository = SqliteTelemetryRepository::new(db.pool().clone());
        let task = tokio::spawn(write_records(repository, rx));
        (Self { tx }, task)
    }
}

impl TelemetrySink for SqliteRecorder {
    fn record(&self, record: TelemetryRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!("Telemetry writer busy, dropping {:?}", record);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Telemetry writer stopped, record lost");
            }
        }
    }
}

async fn write_records(
    repository: SqliteTelemetryRepository,
    mut rx: mpsc::Receiver<TelemetryRecord>,
) {
    let mut written = 0u64;
    while let Some(record) = rx.recv().await {
        let result = match &record {
            TelemetryRecord::Transition(transition) => repository
                .insert_transition(transition)
                .await
                .map(|_| ()),
            TelemetryRecord::Statistic(statistic) => {
                repository
                    .save_statistic(statistic.kind, statistic.value)
                    .await
            }
        };

        match result {
            Ok(()) => written += 1,
            Err(e) => warn!("Failed to persist telemetry record: {}", e),
        }
    }
    debug!("Telemetry writer finished after {} records", written);
}
