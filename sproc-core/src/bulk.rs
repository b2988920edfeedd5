//! The bulk loader.
//!
//! Streams rows from a [`RowSource`] into a table in batches using the driver's
//! native bulk path. Each batch is its own server-side unit of work: a failing
//! batch stops the load, and batches written before it stay committed. This is
//! a weaker guarantee than the command runner gives. To load rows atomically,
//! call [`LiveCommand::bulk_copy`](crate::LiveCommand::bulk_copy) from inside
//! [`Context::execute_transaction`].
//!
//! ```rust
//! use sproc_core::{RowBuffer, RowSource, SqlValue};
//!
//! let mut rows = RowBuffer::new(["Id", "Name"]);
//! rows.push(vec![SqlValue::I32(1), "Alice".into()]).unwrap();
//! rows.push(vec![SqlValue::I32(2), "Bob".into()]).unwrap();
//!
//! assert_eq!(rows.columns(), ["Id", "Name"]);
//! assert_eq!(rows.len(), 2);
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ContextOptions;
use crate::context::Context;
use crate::driver::{BulkBatch, ColumnInfo, Connection};
use crate::error::{SprocError, SprocResult};
use crate::runner::guarded;
use crate::value::SqlValue;

/// A forward-only sequence of rows with a fixed column schema.
///
/// Consumed once. The loader borrows the source and never takes ownership.
pub trait RowSource: Send {
    /// Column names, in the order values appear in each row.
    fn columns(&self) -> &[String];

    /// Produce the next row, or `None` when the source is exhausted.
    fn next_row(&mut self) -> SprocResult<Option<Vec<SqlValue>>>;
}

/// An in-memory row source.
#[derive(Debug, Clone, Default)]
pub struct RowBuffer {
    columns: Vec<String>,
    rows: VecDeque<Vec<SqlValue>>,
}

impl RowBuffer {
    /// Create an empty buffer with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: VecDeque::new(),
        }
    }

    /// Append a row. Its width must match the column count.
    pub fn push(&mut self, row: Vec<SqlValue>) -> SprocResult<()> {
        if row.len() != self.columns.len() {
            return Err(SprocError::binding(format!(
                "row has {} values but the source has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push_back(row);
        Ok(())
    }

    /// Number of rows not yet consumed.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if every row has been consumed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowSource for RowBuffer {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> SprocResult<Option<Vec<SqlValue>>> {
        Ok(self.rows.pop_front())
    }
}

/// A row source backed by an iterator of rows.
pub struct IterRowSource<I> {
    columns: Vec<String>,
    rows: I,
}

impl<I> IterRowSource<I>
where
    I: Iterator<Item = Vec<SqlValue>> + Send,
{
    /// Wrap an iterator. Rows are checked against the columns as they are read.
    pub fn new<C, S>(columns: C, rows: I) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }
}

impl<I> RowSource for IterRowSource<I>
where
    I: Iterator<Item = Vec<SqlValue>> + Send,
{
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> SprocResult<Option<Vec<SqlValue>>> {
        Ok(self.rows.next())
    }
}

/// Bulk-copy settings for one load.
#[derive(Debug, Clone)]
pub struct BulkCopyOptions {
    /// Destination table, optionally schema-qualified.
    pub table: String,
    /// Send source values for identity columns instead of letting the server generate them.
    pub keep_identity: bool,
    /// Rows per batch. Falls back to the context default.
    pub batch_size: Option<usize>,
    /// Timeout per batch. Falls back to the context default.
    pub timeout: Option<Duration>,
    /// Abandons the load between or during batches.
    pub cancellation: Option<CancellationToken>,
}

impl BulkCopyOptions {
    /// Create options for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            keep_identity: false,
            batch_size: None,
            timeout: None,
            cancellation: None,
        }
    }

    /// Keep source identity values.
    pub fn keep_identity(mut self, keep: bool) -> Self {
        self.keep_identity = keep;
        self
    }

    /// Set the batch size. Zero means the context default.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = (size > 0).then_some(size);
        self
    }

    /// Set the timeout per batch.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a cancellation token.
    ///
    /// Batches written before the token fires stay in the table.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl Context {
    /// Bulk-load rows into `table`.
    ///
    /// Returns the number of rows written. Not transactional: when a batch fails,
    /// rows from earlier batches remain in the table.
    pub async fn execute_bulk_copy(
        &self,
        table: &str,
        source: &mut dyn RowSource,
        has_identity: bool,
        batch_size: Option<usize>,
    ) -> SprocResult<u64> {
        let mut options = BulkCopyOptions::new(table).keep_identity(has_identity);
        options.batch_size = batch_size.filter(|n| *n > 0);
        self.execute_bulk_copy_with(&options, source).await
    }

    /// Bulk-load rows with explicit options.
    pub async fn execute_bulk_copy_with(
        &self,
        options: &BulkCopyOptions,
        source: &mut dyn RowSource,
    ) -> SprocResult<u64> {
        let mut slot = self.enter()?;
        let timeout = options.timeout.or(self.options().bulk_timeout);
        let mut conn = guarded(timeout, options.cancellation.as_ref(), self.acquire(&mut slot)).await?;

        let result = load(&mut *conn, self.options(), options, source).await;
        let poisoned = result.as_ref().is_err_and(|e| e.is_interrupted());
        self.release(&mut slot, conn, poisoned).await;

        if let Ok(rows) = &result {
            info!(context = %self.id(), table = %options.table, rows, "Bulk copy complete");
        }
        result
    }
}

/// Mapping from source rows to destination columns.
#[derive(Debug)]
struct ColumnPlan {
    targets: Vec<ColumnInfo>,
    sources: Vec<Option<usize>>,
}

impl ColumnPlan {
    fn build(source: &[String], dest: &[ColumnInfo], keep_identity: bool) -> SprocResult<Self> {
        for (i, name) in source.iter().enumerate() {
            if source[..i].iter().any(|n| n.eq_ignore_ascii_case(name)) {
                return Err(SprocError::binding(format!("duplicate source column {}", name)));
            }
            if !dest.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
                return Err(SprocError::binding(format!(
                    "source column {} does not exist in the destination table",
                    name
                )));
            }
        }

        let targets: Vec<ColumnInfo> = dest
            .iter()
            .filter(|c| keep_identity || !c.identity)
            .cloned()
            .collect();
        let sources: Vec<Option<usize>> = targets
            .iter()
            .map(|c| source.iter().position(|n| n.eq_ignore_ascii_case(&c.name)))
            .collect();

        if sources.iter().all(Option::is_none) {
            return Err(SprocError::binding(
                "no source column maps to a writable destination column",
            ));
        }

        Ok(Self { targets, sources })
    }

    fn project(&self, mut row: Vec<SqlValue>) -> Vec<SqlValue> {
        self.sources
            .iter()
            .map(|index| match index {
                Some(i) => std::mem::replace(&mut row[*i], SqlValue::Null),
                None => SqlValue::Null,
            })
            .collect()
    }
}

/// Stream `source` into the table on `conn` in batches.
pub(crate) async fn load(
    conn: &mut dyn Connection,
    defaults: &ContextOptions,
    options: &BulkCopyOptions,
    source: &mut dyn RowSource,
) -> SprocResult<u64> {
    let batch_size = options.batch_size.unwrap_or(defaults.bulk_batch_size).max(1);
    let timeout = options.timeout.or(defaults.bulk_timeout);
    let cancellation = options.cancellation.as_ref();
    let table = options.table.as_str();

    if cancellation.is_some_and(|t| t.is_cancelled()) {
        return Err(SprocError::Cancelled);
    }
    let dest = guarded(timeout, cancellation, conn.table_columns(table)).await?;
    if dest.is_empty() {
        return Err(SprocError::binding(format!(
            "table {} does not exist or has no writable columns",
            table
        )));
    }
    let plan = ColumnPlan::build(source.columns(), &dest, options.keep_identity)?;
    let width = source.columns().len();

    debug!(table, batch_size, keep_identity = options.keep_identity, "Starting bulk copy");

    let mut read = 0usize;
    let mut written = 0u64;
    let mut batches = 0usize;

    loop {
        let mut rows = Vec::with_capacity(batch_size.min(1024));
        while rows.len() < batch_size {
            let Some(row) = source.next_row()? else {
                break;
            };
            read += 1;
            if row.len() != width {
                return Err(SprocError::binding(format!(
                    "source row {} has {} values, expected {}",
                    read,
                    row.len(),
                    width
                )));
            }
            rows.push(plan.project(row));
        }

        if rows.is_empty() {
            break;
        }
        let full = rows.len() == batch_size;

        let batch = BulkBatch {
            table,
            columns: &plan.targets,
            rows,
            keep_identity: options.keep_identity,
        };
        let count = guarded(timeout, cancellation, conn.bulk_insert(batch)).await?;
        written += count;
        batches += 1;
        debug!(table, batch = batches, rows = count, "Bulk batch written");

        if !full {
            break;
        }
    }

    Ok(written)
}
