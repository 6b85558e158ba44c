//! Error types for the port-call backend data layer.
//!
//! Every engine failure is mapped exactly once, here, into the closed
//! [`DbError`] taxonomy. Callers above the data layer only ever match on the
//! variants, never on driver-specific codes.

use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// No configured database target could hand out a connection.
    #[error("Database unreachable: {message}")]
    Connectivity { message: String, suggestion: String },

    #[error("Statement failed: {message}")]
    Execution {
        message: String,
        /// Engine error code when one was reported, e.g. "42P01".
        code: Option<String>,
        suggestion: String,
    },

    #[error("Duplicate key: {message}")]
    DuplicateKey {
        message: String,
        constraint: Option<String>,
    },

    #[error("Row is still referenced: {message}")]
    ReferentialIntegrity {
        message: String,
        constraint: Option<String>,
    },

    #[error("Cursor aggregation failed on '{cursor}': {message}")]
    Aggregation { cursor: String, message: String },
}

impl DbError {
    /// Create a connectivity error with a helpful suggestion.
    pub fn connectivity(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an execution error with an optional engine code.
    pub fn execution(
        message: impl Into<String>,
        code: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            code,
            suggestion: suggestion.into(),
        }
    }

    pub fn duplicate_key(message: impl Into<String>, constraint: Option<String>) -> Self {
        Self::DuplicateKey {
            message: message.into(),
            constraint,
        }
    }

    pub fn referential_integrity(message: impl Into<String>, constraint: Option<String>) -> Self {
        Self::ReferentialIntegrity {
            message: message.into(),
            constraint,
        }
    }

    pub fn aggregation(cursor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Aggregation {
            cursor: cursor.into(),
            message: message.into(),
        }
    }

    /// Error for a statement that did not finish within the configured timeout.
    pub fn statement_timeout(operation: &str, secs: u64) -> Self {
        Self::execution(
            format!("{} exceeded {}s", operation, secs),
            Some(TIMEOUT_CODE.to_string()),
            "Raise --statement-timeout or narrow the statement",
        )
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connectivity { suggestion, .. } => Some(suggestion),
            Self::Execution { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Engine code carried by an execution error.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Execution { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the session that produced this error should be discarded
    /// instead of going back to its pool.
    pub fn poisons_connection(&self) -> bool {
        match self {
            Self::Connectivity { .. } => true,
            Self::Execution { code, .. } => code.as_deref() == Some(TIMEOUT_CODE),
            _ => false,
        }
    }
}

/// Pseudo engine code attached to statement timeouts.
pub const TIMEOUT_CODE: &str = "timeout";

/// Constraint family an engine error code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintViolation {
    Unique,
    ForeignKey,
}

/// Classify a raw engine code.
///
/// Covers SQLSTATE (PostgreSQL), SQLite extended result codes, MySQL error
/// numbers and the Oracle codes stored procedures re-raise verbatim.
pub fn classify_code(code: &str) -> Option<ConstraintViolation> {
    let code = code.trim();
    match code {
        "23505" | "2067" | "1555" | "1062" | "ORA-00001" => Some(ConstraintViolation::Unique),
        "23503" | "787" | "1451" | "1452" | "ORA-02291" | "ORA-02292" => {
            Some(ConstraintViolation::ForeignKey)
        }
        _ => None,
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let constraint = db_err.constraint().map(String::from);
                let by_kind = match db_err.kind() {
                    ErrorKind::UniqueViolation => Some(ConstraintViolation::Unique),
                    ErrorKind::ForeignKeyViolation => Some(ConstraintViolation::ForeignKey),
                    _ => None,
                };
                match by_kind.or_else(|| code.as_deref().and_then(classify_code)) {
                    Some(ConstraintViolation::Unique) => {
                        DbError::duplicate_key(db_err.message(), constraint)
                    }
                    Some(ConstraintViolation::ForeignKey) => {
                        DbError::referential_integrity(db_err.message(), constraint)
                    }
                    None => DbError::execution(
                        db_err.message(),
                        code,
                        "Check the statement, its bind values and the referenced objects",
                    ),
                }
            }
            sqlx::Error::Configuration(msg) => DbError::connectivity(
                msg.to_string(),
                "Check the target URL format and credentials",
            ),
            sqlx::Error::PoolTimedOut => DbError::connectivity(
                "Timed out waiting for a pooled connection",
                "Raise acquire_timeout or max_connections on the target",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connectivity("Connection pool is closed", "The server is shutting down")
            }
            sqlx::Error::Io(io_err) => DbError::connectivity(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connectivity(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connectivity(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::RowNotFound => DbError::execution(
                "No rows returned",
                None,
                "Verify the statement conditions match existing data",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::execution(
                format!("Column not found: {}", col),
                None,
                "Check the column list of the statement",
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::execution(
                format!("Failed to decode column {}: {}", index, source),
                None,
                "Cast the column to a supported type in the statement",
            ),
            other => DbError::execution(
                format!("Unknown database error: {}", other),
                None,
                "Check the server logs",
            ),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
