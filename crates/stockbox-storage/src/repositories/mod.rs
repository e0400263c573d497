pub mod telemetry;

pub use telemetry::{SqliteTelemetryRepository, StoredTransition, TelemetryRepository};
