//! Storage errors and their mapping onto collaborator errors.

use rollcall_core::CollaboratorError;

/// Errors raised by the SQLite repositories.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite rejected a statement.
    #[error("database error: {0}")]
    Database(String),

    /// No class with the requested id.
    #[error("not found: {0}")]
    NotFound(String),

    /// JSON input could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem or blocking task failure.
    #[error("IO error: {0}")]
    Io(String),

    /// A stored value could not be decoded.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// Offending column.
        column: &'static str,
        /// Decoder message.
        detail: String,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for CollaboratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => CollaboratorError::NotFound(what),
            other => CollaboratorError::Backend(other.to_string()),
        }
    }
}
