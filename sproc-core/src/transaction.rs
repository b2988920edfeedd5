//! Transaction isolation levels.
//!
//! ```rust
//! use sproc_core::IsolationLevel;
//!
//! assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
//! assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
//! assert_eq!(
//!     IsolationLevel::Snapshot.to_begin_sql(),
//!     "SET TRANSACTION ISOLATION LEVEL SNAPSHOT; BEGIN TRANSACTION"
//! );
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SprocError;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Read uncommitted - allows dirty reads.
    ReadUncommitted,
    /// Read committed - prevents dirty reads.
    #[default]
    ReadCommitted,
    /// Repeatable read - prevents non-repeatable reads.
    RepeatableRead,
    /// Serializable - highest locking isolation level.
    Serializable,
    /// Snapshot - row versioning.
    Snapshot,
}

impl IsolationLevel {
    /// Get the SQL clause for this isolation level.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }

    /// Generate the statement batch that starts a transaction at this level.
    pub fn to_begin_sql(&self) -> String {
        debug!(isolation = %self.as_sql(), "Transaction BEGIN");
        format!(
            "SET TRANSACTION ISOLATION LEVEL {}; BEGIN TRANSACTION",
            self.as_sql()
        )
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = SprocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "read uncommitted" => Ok(Self::ReadUncommitted),
            "read committed" => Ok(Self::ReadCommitted),
            "repeatable read" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            "snapshot" => Ok(Self::Snapshot),
            _ => Err(SprocError::config(format!("unknown isolation level: {}", s))),
        }
    }
}
