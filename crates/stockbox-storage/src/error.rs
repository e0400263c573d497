use thiserror::Error;

/// Errors raised while persisting or loading kiosk telemetry.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection or query failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Database path or pool settings are unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stored row cannot be turned back into a domain value
    #[error("Invalid stored value in {column}: {value}")]
    InvalidValue { column: String, value: String },
}

impl StorageError {
    pub fn invalid_value(column: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidValue {
            column: column.into(),
            value: value.to_string(),
        }
    }
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
