//! Error surface for the memory engine.
//!
//! Every fallible operation in the core returns [`MemoryError`]. Each variant
//! maps to one of the eight conceptual error kinds, carries a stable code,
//! and can produce a recovery hint for the user-facing response path.

use std::path::PathBuf;

/// Conceptual error kinds surfaced to callers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Database,
    Cache,
    Protocol,
    Configuration,
    FileSystem,
    Resource,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Database => "database",
            ErrorKind::Cache => "cache",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Configuration => "configuration",
            ErrorKind::FileSystem => "filesystem",
            ErrorKind::Resource => "resource",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Argument validation failure. Terminal for a single call; the handler
    /// is never invoked.
    #[error("invalid value for '{field}': {reason} (got {value})")]
    Validation {
        field: String,
        value: String,
        reason: String,
    },

    /// Database failure, tagged with the store operation that hit it.
    #[error("database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Cache-internal failure. Never surfaced to tool callers; the system
    /// falls through to the store.
    #[error("cache error: {0}")]
    Cache(String),

    /// Malformed or out-of-contract protocol input.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Bad configuration value.
    #[error("configuration error for {key}: {reason}")]
    Configuration { key: String, reason: String },

    /// Filesystem failure (env file, log file, discovery walk).
    #[error("filesystem error at {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A bounded resource was exhausted.
    #[error("resource limit exceeded: {0}")]
    Resource(String),

    /// Anything that does not fit the other kinds.
    #[error("unexpected error: {0}")]
    Unknown(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// Validation failure with field context.
    pub fn validation(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        MemoryError::Validation {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap a rusqlite error with the operation that produced it.
    pub fn db(operation: impl Into<String>, source: rusqlite::Error) -> Self {
        MemoryError::Database {
            operation: operation.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::Validation { .. } => ErrorKind::Validation,
            MemoryError::Database { .. } => ErrorKind::Database,
            MemoryError::Cache(_) => ErrorKind::Cache,
            MemoryError::Protocol(_) => ErrorKind::Protocol,
            MemoryError::Configuration { .. } => ErrorKind::Configuration,
            MemoryError::FileSystem { .. } => ErrorKind::FileSystem,
            MemoryError::Resource(_) => ErrorKind::Resource,
            MemoryError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Stable machine-readable code for logs and counters.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "E_VALIDATION",
            ErrorKind::Database => "E_DATABASE",
            ErrorKind::Cache => "E_CACHE",
            ErrorKind::Protocol => "E_PROTOCOL",
            ErrorKind::Configuration => "E_CONFIG",
            ErrorKind::FileSystem => "E_FILESYSTEM",
            ErrorKind::Resource => "E_RESOURCE",
            ErrorKind::Unknown => "E_UNKNOWN",
        }
    }

    /// Best-effort recovery hint for the user-visible error body.
    ///
    /// Database hints are keyed on the native SQLite error class.
    pub fn recovery(&self) -> String {
        match self {
            MemoryError::Validation { field, .. } => {
                format!("Correct the '{}' argument and retry the call", field)
            }
            MemoryError::Database { source, .. } => match source {
                rusqlite::Error::SqliteFailure(err, _) => match err.code {
                    rusqlite::ErrorCode::CannotOpen => {
                        "Check that the database path exists and is readable/writable".to_string()
                    }
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                        "The database is busy; retry the operation shortly".to_string()
                    }
                    rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                        "The database file appears corrupt; restore it from a backup".to_string()
                    }
                    rusqlite::ErrorCode::ReadOnly => {
                        "The database is read-only; check file permissions".to_string()
                    }
                    rusqlite::ErrorCode::DiskFull => {
                        "The disk is full; free some space and retry".to_string()
                    }
                    _ => "Check the server log for the underlying database error".to_string(),
                },
                _ => "Check the server log for the underlying database error".to_string(),
            },
            MemoryError::Cache(_) => "The cache recovered by falling back to the store".to_string(),
            MemoryError::Protocol(_) => {
                "Check the request against the tool schema from tools/list".to_string()
            }
            MemoryError::Configuration { key, .. } => {
                format!("Fix the '{}' setting in the environment or .env file", key)
            }
            MemoryError::FileSystem { path, .. } => {
                format!("Check permissions and free space for {}", path.display())
            }
            MemoryError::Resource(_) => "Reduce the request size or raise the limit".to_string(),
            MemoryError::Unknown(_) => "Check the server log for details".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_carries_field_and_value() {
        let err = MemoryError::validation("importance", 1.5, "must be between 0 and 1");
        let msg = err.to_string();
        assert!(msg.contains("importance"));
        assert!(msg.contains("1.5"));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.code(), "E_VALIDATION");
    }

    #[test]
    fn test_database_recovery_hint_for_busy() {
        let native = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let err = MemoryError::db("store_memory", native);
        assert_eq!(err.kind(), ErrorKind::Database);
        assert!(err.recovery().contains("retry"));
    }

    #[test]
    fn test_every_kind_has_a_recovery_hint() {
        let errors = vec![
            MemoryError::validation("content", "", "must not be empty"),
            MemoryError::Cache("poisoned lock".into()),
            MemoryError::Protocol("missing params".into()),
            MemoryError::Configuration {
                key: "CACHE_MAX_SIZE".into(),
                reason: "not a number".into(),
            },
            MemoryError::FileSystem {
                path: PathBuf::from("/tmp/x"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            },
            MemoryError::Resource("too many prefetch tasks".into()),
            MemoryError::Unknown("boom".into()),
        ];
        for err in errors {
            assert!(!err.recovery().is_empty(), "{:?}", err.kind());
        }
    }
}
