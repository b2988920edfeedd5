//! Context options.
//!
//! # Environment Variables
//!
//! - `SPROC_COMMAND_TIMEOUT` - Command timeout in seconds (`0` disables it)
//! - `SPROC_ISOLATION` - Isolation level (`read_committed`, `serializable`, ...)
//! - `SPROC_BULK_BATCH_SIZE` - Rows per bulk-copy batch
//! - `SPROC_BULK_TIMEOUT` - Bulk-copy timeout per batch in seconds (`0` disables it)
//!
//! ```rust
//! use std::time::Duration;
//! use sproc_core::{ConnectionLifetime, ContextOptions, IsolationLevel};
//!
//! let options = ContextOptions::new()
//!     .command_timeout(Duration::from_secs(5))
//!     .isolation(IsolationLevel::Serializable)
//!     .connection_lifetime(ConnectionLifetime::Context);
//!
//! assert_eq!(options.command_timeout, Some(Duration::from_secs(5)));
//! assert_eq!(options.bulk_batch_size, 5_000);
//! ```

use std::env;
use std::time::Duration;

use crate::error::{SprocError, SprocResult};
use crate::transaction::IsolationLevel;

/// Default command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of rows per bulk-copy batch.
pub const DEFAULT_BULK_BATCH_SIZE: usize = 5_000;

/// Default bulk-copy timeout per batch.
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a driver-opened connection is kept by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionLifetime {
    /// Open at the start of each call and close at its end.
    #[default]
    PerCall,
    /// Open on first use and keep until the context is disposed.
    Context,
}

/// Options that apply to every call made through a context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Timeout applied to calls that do not set their own.
    pub command_timeout: Option<Duration>,
    /// Isolation level of every transaction.
    pub isolation: IsolationLevel,
    /// Lifetime of driver-opened connections.
    pub connection_lifetime: ConnectionLifetime,
    /// Rows per bulk-copy batch when the caller does not pass one.
    pub bulk_batch_size: usize,
    /// Timeout for each bulk-copy batch.
    pub bulk_timeout: Option<Duration>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            isolation: IsolationLevel::default(),
            connection_lifetime: ConnectionLifetime::default(),
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
            bulk_timeout: Some(DEFAULT_BULK_TIMEOUT),
        }
    }
}

impl ContextOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options from `SPROC_*` environment variables, falling back to defaults.
    pub fn from_env() -> SprocResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read options through a key lookup function.
    pub fn from_lookup<F>(lookup: F) -> SprocResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(v) = lookup("SPROC_COMMAND_TIMEOUT") {
            options.command_timeout = parse_timeout("SPROC_COMMAND_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("SPROC_ISOLATION") {
            options.isolation = v.parse()?;
        }
        if let Some(v) = lookup("SPROC_BULK_BATCH_SIZE") {
            let size = v.trim().parse::<usize>().map_err(|_| {
                SprocError::config(format!("SPROC_BULK_BATCH_SIZE is not a number: {}", v))
            })?;
            if size == 0 {
                return Err(SprocError::config("SPROC_BULK_BATCH_SIZE must be positive"));
            }
            options.bulk_batch_size = size;
        }
        if let Some(v) = lookup("SPROC_BULK_TIMEOUT") {
            options.bulk_timeout = parse_timeout("SPROC_BULK_TIMEOUT", &v)?;
        }

        Ok(options)
    }

    /// Set the command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Disable the command timeout.
    pub fn no_command_timeout(mut self) -> Self {
        self.command_timeout = None;
        self
    }

    /// Set the isolation level.
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Set the connection lifetime.
    pub fn connection_lifetime(mut self, lifetime: ConnectionLifetime) -> Self {
        self.connection_lifetime = lifetime;
        self
    }

    /// Set the default bulk-copy batch size. Zero is ignored.
    pub fn bulk_batch_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.bulk_batch_size = size;
        }
        self
    }

    /// Set the bulk-copy timeout per batch.
    pub fn bulk_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_timeout = Some(timeout);
        self
    }
}

fn parse_timeout(key: &str, value: &str) -> SprocResult<Option<Duration>> {
    let secs = value
        .trim()
        .parse::<u64>()
        .map_err(|_| SprocError::config(format!("{} is not a number of seconds: {}", key, value)))?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
