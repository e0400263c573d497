#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use stockbox_flow::{StatKind, Statistics, TransitionRecord};

use crate::error::{StorageError, StorageResult};

/// A transition row as stored.
///
/// States and events are kept in their display form (`DoorUnlocked`,
/// `LevelSelected(3)`) so the table stays readable from the sqlite shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredTransition {
    pub id: i64,
    pub session_id: Option<String>,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    pub level: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

impl fmt::Display for StoredTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} on {}",
            self.occurred_at.format("%Y-%m-%d %H:%M:%S"),
            self.from_state,
            self.to_state,
            self.event
        )?;
        if let Some(level) = self.level {
            write!(f, " (level {})", level)?;
        }
        if let Some(session) = &self.session_id {
            write!(f, " [{}]", session)?;
        }
        Ok(())
    }
}

/// Persistence of purchase flow telemetry.
pub trait TelemetryRepository: Send + Sync {
    /// Append one transition, returning its row id.
    async fn insert_transition(&self, record: &TransitionRecord) -> StorageResult<i64>;

    /// Store the absolute value of one counter.
    async fn save_statistic(&self, kind: StatKind, value: u64) -> StorageResult<()>;

    /// Counters as last saved. Missing counters are zero.
    async fn load_statistics(&self) -> StorageResult<Statistics>;

    /// Most recent transitions, newest first.
    async fn recent_transitions(&self, limit: i64) -> StorageResult<Vec<StoredTransition>>;
}

/// SQLite implementation of [`TelemetryRepository`].
#[derive(Debug, Clone)]
pub struct SqliteTelemetryRepository {
    pool: SqlitePool,
}

impl SqliteTelemetryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl TelemetryRepository for SqliteTelemetryRepository {
    async fn insert_transition(&self, record: &TransitionRecord) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO transitions (session_id, from_state, to_state, event, level, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.session_id.map(|id| id.to_string()))
        .bind(record.from.to_string())
        .bind(record.to.to_string())
        .bind(record.event.to_string())
        .bind(record.level.map(|level| i64::from(level.get())))
        .bind(record.occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn save_statistic(&self, kind: StatKind, value: u64) -> StorageResult<()> {
        let value = i64::try_from(value)
            .map_err(|_| StorageError::invalid_value(kind.as_str(), value))?;
        sqlx::query(
            r#"
            INSERT INTO statistics (name, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(name) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(kind.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_statistics(&self) -> StorageResult<Statistics> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT name, value FROM statistics")
            .fetch_all(&self.pool)
            .await?;

        let mut pairs = Vec::with_capacity(rows.len());
        for (name, value) in &rows {
            let value = u64::try_from(*value)
                .map_err(|_| StorageError::invalid_value(name.as_str(), value))?;
            pairs.push((name.as_str(), value));
        }
        Ok(Statistics::from_pairs(pairs))
    }

    async fn recent_transitions(&self, limit: i64) -> StorageResult<Vec<StoredTransition>> {
        let rows = sqlx::query_as::<_, StoredTransition>(
            r#"
            SELECT id, session_id, from_state, to_state, event, level, occurred_at
            FROM transitions
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Database;
    use rstest::rstest;
    use stockbox_core::{Level, SessionId};
    use stockbox_flow::{FlowEvent, PurchaseState};

    fn record(from: PurchaseState, to: PurchaseState, event: FlowEvent) -> TransitionRecord {
        TransitionRecord {
            session_id: Some(SessionId::new()),
            level: Some(Level::new(3).unwrap()),
            from,
            to,
            event,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_transitions_come_back_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTelemetryRepository::new(db.pool().clone());

        let level = Level::new(3).unwrap();
        repo.insert_transition(&record(
            PurchaseState::Idle,
            PurchaseState::CheckingPurchase,
            FlowEvent::LevelSelected(level),
        ))
        .await
        .unwrap();
        repo.insert_transition(&record(
            PurchaseState::CheckingPurchase,
            PurchaseState::DoorUnlocked,
            FlowEvent::PurchaseValid,
        ))
        .await
        .unwrap();

        let rows = repo.recent_transitions(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].to_state, "DoorUnlocked");
        assert_eq!(rows[1].event, "LevelSelected(3)");
        assert_eq!(rows[1].level, Some(3));

        let limited = repo.recent_transitions(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, rows[0].id);
    }

    #[tokio::test]
    async fn test_statistics_are_upserted() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTelemetryRepository::new(db.pool().clone());

        repo.save_statistic(StatKind::CompletedPurchases, 1).await.unwrap();
        repo.save_statistic(StatKind::CompletedPurchases, 2).await.unwrap();
        repo.save_statistic(StatKind::NetworkIncidents, 5).await.unwrap();

        let stats = repo.load_statistics().await.unwrap();
        assert_eq!(stats.completed_purchases, 2);
        assert_eq!(stats.network_incidents, 5);
        assert_eq!(stats.failed_purchases, 0);

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM statistics")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[rstest]
    #[case(StatKind::CompletedPurchases)]
    #[case(StatKind::FailedPurchases)]
    #[case(StatKind::NetworkIncidents)]
    #[case(StatKind::ServerIncidents)]
    #[tokio::test]
    async fn test_counter_is_loaded_into_its_own_field(#[case] kind: StatKind) {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTelemetryRepository::new(db.pool().clone());

        repo.save_statistic(kind, 7).await.unwrap();

        let stats = repo.load_statistics().await.unwrap();
        for other in StatKind::ALL {
            let expected = if other == kind { 7 } else { 0 };
            assert_eq!(stats.get(other), expected, "{}", other.as_str());
        }
    }

    #[tokio::test]
    async fn test_statistic_beyond_column_range_is_rejected() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTelemetryRepository::new(db.pool().clone());

        let err = repo
            .save_statistic(StatKind::FailedPurchases, u64::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_empty_database_loads_zero_counters() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTelemetryRepository::new(db.pool().clone());

        assert_eq!(repo.load_statistics().await.unwrap(), Statistics::default());
        assert!(repo.recent_transitions(5).await.unwrap().is_empty());
    }

    #[test]
    fn test_stored_transition_display() {
        let row = StoredTransition {
            id: 1,
            session_id: None,
            from_state: "DoorOpened".to_string(),
            to_state: "Completing".to_string(),
            event: "DoorClosed".to_string(),
            level: Some(4),
            occurred_at: DateTime::parse_from_rfc3339("2025-06-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        assert_eq!(
            row.to_string(),
            "2025-06-01 10:00:00 DoorOpened -> Completing on DoorClosed (level 4)"
        );
    }
}
