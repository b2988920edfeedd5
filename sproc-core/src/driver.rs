//! The database driver capability.
//!
//! The engine never speaks a wire protocol itself. A [`Driver`] opens
//! [`Connection`]s, and a connection runs transactions, procedure calls,
//! ad-hoc statements and bulk-load batches. Errors raised by an implementation
//! should be passed through [`SprocError::driver`](crate::SprocError::driver) so
//! callers get the native error back unchanged.

use std::future::Future;
use std::pin::Pin;

use crate::error::SprocResult;
use crate::parameter::Parameter;
use crate::row::ResultSet;
use crate::transaction::IsolationLevel;
use crate::value::{SqlType, SqlValue};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Factory for connections.
pub trait Driver: Send + Sync {
    /// Open a new connection.
    fn connect(&self) -> BoxFuture<'_, SprocResult<Box<dyn Connection>>>;
}

/// A live database connection.
///
/// The engine guarantees that at most one transaction is open on a connection
/// and that calls on one connection never overlap.
pub trait Connection: Send {
    /// Check if the connection is still usable.
    fn is_open(&self) -> bool;

    /// Begin a transaction.
    fn begin(&mut self, isolation: IsolationLevel) -> BoxFuture<'_, SprocResult<()>>;

    /// Commit the current transaction.
    fn commit(&mut self) -> BoxFuture<'_, SprocResult<()>>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> BoxFuture<'_, SprocResult<()>>;

    /// Execute a stored procedure.
    fn call<'a>(&'a mut self, request: CallRequest<'a>) -> BoxFuture<'a, SprocResult<Execution>>;

    /// Run an ad-hoc statement and collect its result sets.
    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, SprocResult<Vec<ResultSet>>>;

    /// Run an ad-hoc statement and return the number of affected rows.
    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, SprocResult<u64>>;

    /// Describe the insertable columns of a table, in table order.
    fn table_columns<'a>(&'a mut self, table: &'a str)
    -> BoxFuture<'a, SprocResult<Vec<ColumnInfo>>>;

    /// Load one batch of rows into a table using the native bulk path.
    fn bulk_insert<'a>(&'a mut self, batch: BulkBatch<'a>) -> BoxFuture<'a, SprocResult<u64>>;

    /// Close the connection.
    fn close(self: Box<Self>) -> BoxFuture<'static, SprocResult<()>>;
}

/// A stored procedure call handed to a [`Connection`].
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    /// Procedure name, optionally schema-qualified.
    pub procedure: &'a str,
    /// Parameters in binding order.
    pub parameters: &'a [Parameter],
    /// Capture the procedure's return status even without a return-value descriptor.
    pub capture_return: bool,
}

/// Outcome of a stored procedure call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    /// Result sets produced by the procedure, in order.
    pub result_sets: Vec<ResultSet>,
    /// Post-execution values of `Out` and `InOut` parameters, by parameter name.
    pub outputs: Vec<(String, SqlValue)>,
    /// Return status of the procedure, when captured.
    pub return_value: Option<SqlValue>,
    /// Rows affected as reported by the driver.
    pub rows_affected: u64,
}

impl Execution {
    /// Look up an output value by parameter name (case-insensitive).
    pub fn output(&self, name: &str) -> Option<&SqlValue> {
        self.outputs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// Metadata for one destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Semantic type, when the driver reports one.
    pub sql_type: Option<SqlType>,
    /// Whether the column is an identity column.
    pub identity: bool,
}

impl ColumnInfo {
    /// Create column metadata.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: None,
            identity: false,
        }
    }

    /// Set the semantic type.
    pub fn with_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    /// Mark the column as an identity column.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }
}

/// One batch of rows for [`Connection::bulk_insert`].
///
/// Every row lines up with `columns`.
#[derive(Debug, Clone)]
pub struct BulkBatch<'a> {
    /// Destination table.
    pub table: &'a str,
    /// Destination columns, in the order values appear in each row.
    pub columns: &'a [ColumnInfo],
    /// Row values.
    pub rows: Vec<Vec<SqlValue>>,
    /// Send explicit values for identity columns.
    pub keep_identity: bool,
}
