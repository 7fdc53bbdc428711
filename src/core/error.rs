use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwitchyardError {
    #[error("Task does not declare a required capability")]
    MissingCapability,
    #[error("No registered agent provides capability: {0}")]
    NoCapableAgent(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Write for '{key}' failed after the index write succeeded: {source}")]
    WriteConsistencyFailure {
        key: String,
        #[source]
        source: Box<SwitchyardError>,
    },
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(#[from] toml::de::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl SwitchyardError {
    /// True for SQLite failures that mean the backing file could not be
    /// reached at all (busy, locked, unopenable) rather than a bad query.
    pub fn is_unavailable(&self) -> bool {
        match self {
            SwitchyardError::StoreUnavailable(_) => true,
            SwitchyardError::RusqliteError(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::ReadOnly
            ),
            _ => false,
        }
    }
}
