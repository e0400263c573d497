//! Integration tests for the telemetry database on disk and in memory.
//!
//! Run with: cargo test --package stockbox-storage --test integration_database

use std::sync::Arc;

use chrono::Utc;
use stockbox_core::{Level, SessionId};
use stockbox_flow::{
    FlowEvent, PurchaseState, StatKind, StatisticRecord, TelemetryRecord, TelemetrySink,
    TransitionRecord,
};
use stockbox_storage::{
    Database, DatabaseConfig, RECORDER_QUEUE_SIZE, SqliteRecorder, SqliteTelemetryRepository,
    TelemetryRepository,
};
use tokio::sync::Barrier;

fn transition(
    session: SessionId,
    from: PurchaseState,
    to: PurchaseState,
    event: FlowEvent,
) -> TelemetryRecord {
    TelemetryRecord::Transition(TransitionRecord {
        session_id: Some(session),
        level: Some(Level::new(2).unwrap()),
        from,
        to,
        event,
        occurred_at: Utc::now(),
    })
}

#[tokio::test]
async fn test_in_memory_database() {
    let db = Database::in_memory().await.unwrap();
    db.health_check().await.unwrap();
    db.close().await;
}

#[tokio::test]
async fn test_migration_idempotency() {
    let db = Database::in_memory().await.unwrap();

    db.migrate().await.unwrap();
    db.migrate().await.unwrap();

    for table in ["transitions", "statistics"] {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?")
                .bind(table)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(count, 1, "table {} missing", table);
    }

    db.close().await;
}

#[tokio::test]
async fn test_statistics_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("stockbox.db");
    let path = path.to_str().unwrap().to_string();

    let db = Database::new(DatabaseConfig::new(path.clone())).await.unwrap();
    let (recorder, writer) = SqliteRecorder::spawn(&db, RECORDER_QUEUE_SIZE);
    for value in 1..=3 {
        recorder.record(TelemetryRecord::Statistic(StatisticRecord {
            kind: StatKind::CompletedPurchases,
            value,
            occurred_at: Utc::now(),
        }));
    }
    recorder.record(TelemetryRecord::Statistic(StatisticRecord {
        kind: StatKind::ServerIncidents,
        value: 1,
        occurred_at: Utc::now(),
    }));
    drop(recorder);
    writer.await.unwrap();
    db.close().await;

    let db = Database::new(DatabaseConfig::new(path)).await.unwrap();
    let stats = SqliteTelemetryRepository::new(db.pool().clone())
        .load_statistics()
        .await
        .unwrap();
    assert_eq!(stats.completed_purchases, 3);
    assert_eq!(stats.server_incidents, 1);
    assert_eq!(stats.failed_purchases, 0);
    db.close().await;
}

#[tokio::test]
async fn test_recorder_writes_purchase_history() {
    let db = Database::in_memory().await.unwrap();
    let (recorder, writer) = SqliteRecorder::spawn(&db, RECORDER_QUEUE_SIZE);

    let session = SessionId::new();
    let level = Level::new(2).unwrap();
    recorder.record(transition(
        session,
        PurchaseState::Idle,
        PurchaseState::CheckingPurchase,
        FlowEvent::LevelSelected(level),
    ));
    recorder.record(transition(
        session,
        PurchaseState::CheckingPurchase,
        PurchaseState::DoorUnlocked,
        FlowEvent::PurchaseValid,
    ));
    recorder.record(transition(
        session,
        PurchaseState::DoorUnlocked,
        PurchaseState::Idle,
        FlowEvent::Reset,
    ));
    drop(recorder);
    writer.await.unwrap();

    let history = SqliteTelemetryRepository::new(db.pool().clone())
        .recent_transitions(10)
        .await
        .unwrap();
    let events: Vec<&str> = history.iter().map(|row| row.event.as_str()).collect();
    assert_eq!(events, vec!["Reset", "PurchaseValid", "LevelSelected(2)"]);

    let session = session.to_string();
    assert!(history.iter().all(|row| row.session_id.as_deref() == Some(session.as_str())));

    db.close().await;
}

#[tokio::test]
async fn test_concurrent_reads_while_recording() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stockbox.db");
    let db = Database::new(DatabaseConfig::new(path.to_str().unwrap()))
        .await
        .unwrap();
    let (recorder, writer) = SqliteRecorder::spawn(&db, RECORDER_QUEUE_SIZE);

    const READERS: usize = 4;
    let barrier = Arc::new(Barrier::new(READERS));
    let mut readers = Vec::new();
    for _ in 0..READERS {
        let repo = SqliteTelemetryRepository::new(db.pool().clone());
        let barrier = barrier.clone();
        readers.push(tokio::spawn(async move {
            barrier.wait().await;
            repo.recent_transitions(50).await.map(|rows| rows.len())
        }));
    }

    let session = SessionId::new();
    for _ in 0..20 {
        recorder.record(transition(
            session,
            PurchaseState::Idle,
            PurchaseState::Sleep,
            FlowEvent::TimeoutSleep,
        ));
    }

    for result in futures::future::join_all(readers).await {
        assert!(result.unwrap().unwrap() <= 20);
    }

    drop(recorder);
    writer.await.unwrap();
    let rows = SqliteTelemetryRepository::new(db.pool().clone())
        .recent_transitions(100)
        .await
        .unwrap();
    assert_eq!(rows.len(), 20);

    db.close().await;
}
