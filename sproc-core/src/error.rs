//! Error types for stored-procedure execution.
//!
//! Errors fall into four categories:
//!
//! - **Configuration**: invalid or unreachable connection target, surfaced at connect time.
//! - **Binding**: parameter name/type/direction mismatches, surfaced at execute time.
//! - **Execution**: constraint violations, deadlocks and timeouts raised by the database.
//! - **Lifecycle**: operations on a disposed or concurrently used [`Context`](crate::Context).
//!
//! Errors raised by the database driver are carried unchanged in
//! [`SprocError::Driver`]; use [`SprocError::driver_error`] to get the native error back.
//!
//! ```rust
//! use sproc_core::{ErrorCategory, SprocError};
//!
//! let err = SprocError::Busy;
//! assert_eq!(err.category(), ErrorCategory::Lifecycle);
//!
//! let err = SprocError::binding("parameter name must not be empty");
//! assert_eq!(err.to_string(), "binding error: parameter name must not be empty");
//! ```

use thiserror::Error;

/// Result type for sproc operations.
pub type SprocResult<T> = Result<T, SprocError>;

/// Boxed native driver error.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while executing stored procedures or bulk loads.
#[derive(Error, Debug)]
pub enum SprocError {
    /// Error raised by the database driver, passed through unchanged.
    #[error(transparent)]
    Driver(DriverError),

    /// Configuration error (connection string, options).
    #[error("configuration error: {0}")]
    Config(String),

    /// Parameter or column binding error.
    #[error("binding error: {0}")]
    Binding(String),

    /// Value conversion error.
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// The call exceeded its timeout.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// The call was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The context has been disposed.
    #[error("context used after dispose")]
    Disposed,

    /// Another call is already in flight on the same context.
    #[error("context busy: another call is in flight")]
    Busy,

    /// The connection is closed and cannot be re-established.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// I/O error outside the driver (runtime construction and the like).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classification of a [`SprocError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid or unreachable connection target.
    Configuration,
    /// Parameter name/type/direction mismatch.
    Binding,
    /// Failure raised while the database executed statements.
    Execution,
    /// Misuse of a context: disposed, busy, or closed.
    Lifecycle,
}

impl SprocError {
    /// Wrap a native driver error.
    pub fn driver(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Driver(Box::new(err))
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a binding error.
    pub fn binding(message: impl Into<String>) -> Self {
        Self::Binding(message.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion(message.into())
    }

    /// Create a connection-closed error.
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed(message.into())
    }

    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::Io(_) => ErrorCategory::Configuration,
            Self::Binding(_) | Self::TypeConversion(_) => ErrorCategory::Binding,
            Self::Driver(_) | Self::Timeout(_) | Self::Cancelled => ErrorCategory::Execution,
            Self::Disposed | Self::Busy | Self::ConnectionClosed(_) => ErrorCategory::Lifecycle,
        }
    }

    /// Get the native driver error, if this error came from the driver and has type `E`.
    pub fn driver_error<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Driver(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this error means the call was interrupted before completion.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled)
    }
}
