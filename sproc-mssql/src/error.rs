//! Error types for SQL Server operations.

use sproc_core::SprocError;
use thiserror::Error;

/// Result type for MSSQL operations.
pub type MssqlResult<T> = Result<T, MssqlError>;

/// SQL Server error number for a deadlock victim.
pub const DEADLOCK_VICTIM: u32 = 1205;
/// SQL Server error number for a primary key or unique constraint violation.
pub const UNIQUE_CONSTRAINT_VIOLATION: u32 = 2627;
/// SQL Server error number for a duplicate key in a unique index.
pub const UNIQUE_INDEX_VIOLATION: u32 = 2601;
/// SQL Server error number for a foreign key or check constraint conflict.
pub const CONSTRAINT_CONFLICT: u32 = 547;
/// SQL Server error number for a missing stored procedure.
pub const PROCEDURE_NOT_FOUND: u32 = 2812;

/// Errors that can occur during MSSQL operations.
#[derive(Error, Debug)]
pub enum MssqlError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(String),

    /// Tiberius/SQL Server error.
    #[error("sql server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Type conversion error.
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// Timeout error.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Socket error while connecting.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MssqlError {
    /// Create a pool error.
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Connection(_) | Self::Io(_))
            || matches!(self, Self::SqlServer(tiberius::error::Error::Io { .. }))
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The SQL Server error number, when the server raised the error.
    pub fn server_code(&self) -> Option<u32> {
        match self {
            Self::SqlServer(tiberius::error::Error::Server(token)) => Some(token.code()),
            _ => None,
        }
    }

    /// Check if the server chose this session as a deadlock victim.
    pub fn is_deadlock(&self) -> bool {
        self.server_code() == Some(DEADLOCK_VICTIM)
    }

    /// Check if a unique constraint or index was violated.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self.server_code(),
            Some(UNIQUE_CONSTRAINT_VIOLATION | UNIQUE_INDEX_VIOLATION)
        )
    }

    /// Check if a foreign key or check constraint was violated.
    pub fn is_constraint_conflict(&self) -> bool {
        self.server_code() == Some(CONSTRAINT_CONFLICT)
    }
}

impl<E> From<bb8::RunError<E>> for MssqlError
where
    E: std::error::Error,
{
    fn from(err: bb8::RunError<E>) -> Self {
        match err {
            bb8::RunError::User(e) => MssqlError::Pool(e.to_string()),
            bb8::RunError::TimedOut => MssqlError::Pool("timed out waiting for a connection".into()),
        }
    }
}

impl From<MssqlError> for SprocError {
    fn from(err: MssqlError) -> Self {
        match err {
            MssqlError::Config(msg) => SprocError::Config(msg),
            MssqlError::TypeConversion(msg) => SprocError::TypeConversion(msg),
            MssqlError::Timeout(ms) => SprocError::Timeout(ms),
            other => SprocError::driver(other),
        }
    }
}

/// The SQL Server error number behind an engine error, if any.
pub fn server_code(err: &SprocError) -> Option<u32> {
    err.driver_error::<MssqlError>()
        .and_then(MssqlError::server_code)
}
