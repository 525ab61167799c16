//! Error types for StrataDB
//!
//! Defines a unified error type that can represent errors from every layer:
//! the binary codec, storage operations, the lock manager, and the
//! transaction manager.

use std::fmt;
use std::io;

/// Unified error type for StrataDB operations
#[derive(Debug)]
pub enum Error {
    /// Named table file absent
    TableNotFound(String),
    /// Type/length/schema mismatch, duplicate column, unknown column, etc.
    InvalidData(String),
    /// Filesystem error (read/write/rename/unlink)
    Io(io::Error),
    /// Bad magic, truncated read, or unsupported version
    CorruptFile(String),
    /// `RequestAndWait` deadline exceeded
    LockTimeout(String),
    /// `Execute` called on a non-`Active` transaction
    TransactionNotActive,
    /// Reference SQL front end parse failure; never raised by the core
    Syntax(String),
}

impl Error {
    pub fn table_not_found(table_name: &str) -> Self {
        Error::TableNotFound(format!("table '{}' doesn't exist", table_name))
    }

    pub fn table_already_exists(table_name: &str) -> Self {
        Error::InvalidData(format!("table '{}' already exists", table_name))
    }

    pub fn unknown_column(column_name: &str) -> Self {
        Error::InvalidData(format!("unknown column '{}'", column_name))
    }

    pub fn duplicate_column(column_name: &str) -> Self {
        Error::InvalidData(format!("duplicate column '{}'", column_name))
    }

    pub fn column_count_mismatch(expected: usize, got: usize) -> Self {
        Error::InvalidData(format!(
            "column count doesn't match value count (expected {}, got {})",
            expected, got
        ))
    }

    pub fn lock_timeout(resource_id: &str) -> Self {
        Error::LockTimeout(format!("timed out waiting for lock on '{}'", resource_id))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TableNotFound(msg) => write!(f, "{}", msg),
            Error::InvalidData(msg) => write!(f, "{}", msg),
            Error::Io(e) => write!(f, "{}", e),
            Error::CorruptFile(msg) => write!(f, "{}", msg),
            Error::LockTimeout(msg) => write!(f, "{}", msg),
            Error::TransactionNotActive => write!(f, "transaction is not active"),
            Error::Syntax(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type alias for StrataDB operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_bare_message() {
        let e = Error::table_not_found("users");
        assert_eq!(e.to_string(), "table 'users' doesn't exist");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
