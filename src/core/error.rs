use std::fmt;
use thiserror::Error;

/// Kind of provider operation, attached to errors surfaced by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    OpenSession,
    CreateTable,
    DropTable,
    Insert,
    Select,
    Count,
    Exists,
    Update,
    Delete,
    BulkCopy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenSession => "OPEN SESSION",
            Self::CreateTable => "CREATE TABLE",
            Self::DropTable => "DROP TABLE",
            Self::Insert => "INSERT",
            Self::Select => "SELECT",
            Self::Count => "COUNT",
            Self::Exists => "EXISTS",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::BulkCopy => "BULK COPY",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------
    #[error("Type overflow in column '{column}': {message}")]
    TypeOverflow { column: String, message: String },

    #[error("Column '{0}' cannot be NULL")]
    NullabilityViolation(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    // ------------------------------------------------------------------
    // Translation
    // ------------------------------------------------------------------
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Statement too large: {0}")]
    StatementTooLarge(String),

    #[error("Invalid assignment: {0}")]
    InvalidAssignment(String),

    // ------------------------------------------------------------------
    // Statement execution
    // ------------------------------------------------------------------
    #[error("Table '{0}' not found")]
    NotFound(String),

    #[error("Constraint violation during {operation} on '{table}': {message}")]
    ConstraintViolation {
        operation: Operation,
        table: String,
        message: String,
    },

    #[error("{operation} on '{table}' rejected by session: {message}")]
    StatementRejected {
        operation: Operation,
        table: String,
        message: String,
    },

    #[error("Transport error during {operation} on '{table}': {message}")]
    TransportError {
        operation: Operation,
        table: String,
        message: String,
    },

    #[error("{operation} on '{table}' cancelled after {rows_committed} committed row(s): {reason}")]
    Cancelled {
        operation: Operation,
        table: String,
        rows_committed: u64,
        reason: String,
    },

    #[error(
        "Bulk copy into '{table}' failed at batch {batch_index} ({batch_rows} row(s)) \
         after {rows_committed} committed row(s): {message}"
    )]
    BulkBatchFailed {
        table: String,
        rows_committed: u64,
        batch_index: usize,
        batch_rows: usize,
        message: String,
    },

    // ------------------------------------------------------------------
    // Ambient
    // ------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    /// Number of rows known to be committed when the error was raised.
    ///
    /// Only bulk copy and cancellation carry partial progress; everything
    /// else reports zero.
    pub fn rows_committed(&self) -> u64 {
        match self {
            Self::BulkBatchFailed { rows_committed, .. } | Self::Cancelled { rows_committed, .. } => {
                *rows_committed
            }
            _ => 0,
        }
    }

    /// `true` for errors raised while building a statement, i.e. before any
    /// session was touched.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::TypeOverflow { .. }
                | Self::NullabilityViolation(_)
                | Self::TypeMismatch(_)
                | Self::InvalidSchema(_)
                | Self::ColumnNotFound(..)
                | Self::UnsupportedExpression(_)
                | Self::StatementTooLarge(_)
                | Self::InvalidAssignment(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
