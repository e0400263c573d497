//! SQLite persistence for the stockbox kiosk.
//!
//! Two tables, created by the migrations in the workspace `migrations/`
//! directory:
//!
//! - `transitions`: one row per purchase-flow state change, written by the
//!   [`SqliteRecorder`] telemetry sink.
//! - `statistics`: the four purchase counters, upserted on every change and
//!   loaded at startup to seed the dispatcher.
//!
//! ```no_run
//! use stockbox_storage::{
//!     Database, DatabaseConfig, RECORDER_QUEUE_SIZE, SqliteRecorder, SqliteTelemetryRepository,
//!     TelemetryRepository,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("stockbox.db")).await?;
//! let statistics = SqliteTelemetryRepository::new(db.pool().clone())
//!     .load_statistics()
//!     .await?;
//! let (recorder, writer) = SqliteRecorder::spawn(&db, RECORDER_QUEUE_SIZE);
//! // hand `recorder` and `statistics` to the dispatcher ...
//! drop(recorder);
//! writer.await?;
//! # let _ = statistics;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod recorder;
pub mod repositories;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use recorder::{RECORDER_QUEUE_SIZE, SqliteRecorder};
pub use repositories::{SqliteTelemetryRepository, StoredTransition, TelemetryRepository};
