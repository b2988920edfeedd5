//! # sproc-core
//!
//! Transactional stored-procedure execution engine.
//!
//! This crate provides:
//! - Parameter descriptors with `In`, `Out`, `InOut` and `ReturnValue` directions
//! - A command runner that wraps every call in a transaction: commit on success,
//!   rollback on any failure, resources released on every path
//! - Result projection over the live, transaction-scoped command
//! - A bulk loader with batch-level (weaker) consistency
//! - An execution context with an explicit lifecycle and a busy guard
//! - A blocking facade over the async API
//!
//! The engine is database-agnostic; drivers implement [`Driver`] and
//! [`Connection`]. `sproc-mssql` provides the SQL Server driver.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sproc_core::prelude::*;
//!
//! let ctx = Context::new(driver);
//!
//! let mut cmd = Command::new("dbo.SetActive")
//!     .input("UserId", SqlType::Int, 7)
//!     .output("WasActive", SqlType::Bit);
//! ctx.execute_non_query(&mut cmd).await?;
//!
//! let was_active: bool = cmd.parameter_named("WasActive").unwrap().value_as()?;
//! ctx.dispose().await;
//! ```

pub mod blocking;
pub mod bulk;
pub mod command;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod logging;
pub mod parameter;
pub mod row;
pub mod runner;
pub mod transaction;
pub mod value;

pub use bulk::{BulkCopyOptions, IterRowSource, RowBuffer, RowSource};
pub use command::Command;
pub use config::{ConnectionLifetime, ContextOptions};
pub use context::{Context, ContextState};
pub use driver::{BoxFuture, BulkBatch, CallRequest, ColumnInfo, Connection, Driver, Execution};
pub use error::{DriverError, ErrorCategory, SprocError, SprocResult};
pub use parameter::{Direction, Parameter, validate_parameters};
pub use row::{FromRow, ResultSet, Row};
pub use runner::LiveCommand;
pub use transaction::IsolationLevel;
pub use value::{FromSqlValue, SqlType, SqlValue};

/// Re-exported so drivers and callers use the same token type.
pub use tokio_util::sync::CancellationToken;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bulk::{BulkCopyOptions, IterRowSource, RowBuffer, RowSource};
    pub use crate::command::Command;
    pub use crate::config::{ConnectionLifetime, ContextOptions};
    pub use crate::context::{Context, ContextState};
    pub use crate::driver::BoxFuture;
    pub use crate::error::{SprocError, SprocResult};
    pub use crate::impl_from_row;
    pub use crate::parameter::{Direction, Parameter};
    pub use crate::row::{FromRow, ResultSet, Row};
    pub use crate::runner::LiveCommand;
    pub use crate::transaction::IsolationLevel;
    pub use crate::value::{FromSqlValue, SqlType, SqlValue};
    pub use tokio_util::sync::CancellationToken;
}
