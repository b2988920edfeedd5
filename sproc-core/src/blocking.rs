//! Blocking facade over the async engine.
//!
//! [`Context`] here drives the async [`crate::Context`] on a private
//! current-thread runtime, so every call blocks the invoking thread until its
//! I/O completes. Transaction semantics are identical to the async API.
//!
//! Do not call these methods from inside an async runtime; use the async
//! context there.
//!
//! ```rust,ignore
//! use sproc_core::{Command, SqlType, blocking};
//!
//! let ctx = blocking::Context::new(driver)?;
//! let mut cmd = Command::new("dbo.Touch").input("Id", SqlType::Int, 1);
//! let rows = ctx.execute_non_query(&mut cmd)?;
//! ctx.dispose();
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

use crate::bulk::{BulkCopyOptions, RowSource};
use crate::command::Command;
use crate::config::ContextOptions;
use crate::context::ContextState;
use crate::driver::{BoxFuture, Connection, Driver};
use crate::error::SprocResult;
use crate::runner::LiveCommand;
use crate::value::FromSqlValue;

/// A context whose execution methods block.
pub struct Context {
    inner: crate::Context,
    runtime: Runtime,
}

impl Context {
    /// Create a blocking context that opens connections through `driver`.
    pub fn new(driver: impl Driver + 'static) -> SprocResult<Self> {
        Self::from_async(crate::Context::new(driver))
    }

    /// Create a blocking context from a shared driver with explicit options.
    pub fn with_options(driver: Arc<dyn Driver>, options: ContextOptions) -> SprocResult<Self> {
        Self::from_async(crate::Context::with_options(driver, options))
    }

    /// Adopt an already-open connection.
    pub fn adopt(connection: Box<dyn Connection>) -> SprocResult<Self> {
        Self::from_async(crate::Context::adopt(connection))
    }

    /// Wrap an async context.
    pub fn from_async(inner: crate::Context) -> SprocResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { inner, runtime })
    }

    /// The wrapped async context.
    pub fn as_async(&self) -> &crate::Context {
        &self.inner
    }

    /// Unique id of this context.
    pub fn id(&self) -> Uuid {
        self.inner.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        self.inner.state()
    }

    /// See [`crate::Context::execute_non_query`].
    pub fn execute_non_query(&self, command: &mut Command) -> SprocResult<u64> {
        self.runtime.block_on(self.inner.execute_non_query(command))
    }

    /// See [`crate::Context::execute_scalar`].
    pub fn execute_scalar<T>(&self, command: &mut Command) -> SprocResult<T>
    where
        T: FromSqlValue + Send + 'static,
    {
        self.runtime.block_on(self.inner.execute_scalar(command))
    }

    /// See [`crate::Context::execute_with_return_value`].
    pub fn execute_with_return_value<T>(&self, command: &mut Command) -> SprocResult<T>
    where
        T: FromSqlValue + Send + 'static,
    {
        self.runtime
            .block_on(self.inner.execute_with_return_value(command))
    }

    /// See [`crate::Context::execute_transaction`].
    pub fn execute_transaction<R, F>(&self, command: &mut Command, projection: F) -> SprocResult<R>
    where
        F: for<'c, 'a> FnOnce(&'c mut LiveCommand<'a>) -> BoxFuture<'c, SprocResult<R>> + Send,
        R: Send,
    {
        self.runtime
            .block_on(self.inner.execute_transaction(command, projection))
    }

    /// See [`crate::Context::execute_bulk_copy`].
    pub fn execute_bulk_copy(
        &self,
        table: &str,
        source: &mut dyn RowSource,
        has_identity: bool,
        batch_size: Option<usize>,
    ) -> SprocResult<u64> {
        self.runtime.block_on(
            self.inner
                .execute_bulk_copy(table, source, has_identity, batch_size),
        )
    }

    /// See [`crate::Context::execute_bulk_copy_with`].
    pub fn execute_bulk_copy_with(
        &self,
        options: &BulkCopyOptions,
        source: &mut dyn RowSource,
    ) -> SprocResult<u64> {
        self.runtime
            .block_on(self.inner.execute_bulk_copy_with(options, source))
    }

    /// Release the connection. Idempotent.
    pub fn dispose(&self) {
        self.runtime.block_on(self.inner.dispose());
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("blocking::Context").field(&self.inner).finish()
    }
}
