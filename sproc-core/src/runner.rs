//! The command runner.
//!
//! Every execution mode runs the same sequence on the context's connection:
//!
//! 1. acquire the connection (opening it if needed)
//! 2. begin a transaction at the context's isolation level
//! 3. bind the parameters and call the procedure
//! 4. run the mode's projection against the live command
//! 5. stage `Out`, `InOut` and `ReturnValue` values
//! 6. commit, then write staged values into the parameters
//! 7. on any failure in 3-5: roll back and return the original error
//! 8. release the command, then the transaction, then the connection
//!
//! Timeouts and cancellation abandon the in-flight I/O, attempt a rollback
//! within a short grace period, and discard the connection.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bulk::{self, BulkCopyOptions, RowSource};
use crate::command::{CallControls, Command};
use crate::config::ContextOptions;
use crate::context::{Context, ROLLBACK_GRACE};
use crate::driver::{BoxFuture, CallRequest, Connection, Execution};
use crate::error::{SprocError, SprocResult};
use crate::parameter::{Direction, Parameter, validate_parameters};
use crate::row::{FromRow, ResultSet};
use crate::value::{FromSqlValue, SqlValue};

/// The live, transaction-scoped command handed to a projection.
///
/// Holds the result sets the procedure produced and gives access to the
/// connection inside the open transaction for further reads and writes.
pub struct LiveCommand<'a> {
    conn: &'a mut dyn Connection,
    options: &'a ContextOptions,
    procedure: &'a str,
    result_sets: VecDeque<ResultSet>,
    outputs: Vec<(String, SqlValue)>,
    return_value: Option<SqlValue>,
    rows_affected: u64,
}

impl<'a> LiveCommand<'a> {
    fn new(
        conn: &'a mut dyn Connection,
        options: &'a ContextOptions,
        procedure: &'a str,
        execution: Execution,
    ) -> Self {
        Self {
            conn,
            options,
            procedure,
            result_sets: execution.result_sets.into(),
            outputs: execution.outputs,
            return_value: execution.return_value,
            rows_affected: execution.rows_affected,
        }
    }

    /// Name of the executing procedure.
    pub fn procedure(&self) -> &str {
        self.procedure
    }

    /// Rows affected by the procedure.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Number of result sets not yet taken.
    pub fn remaining_results(&self) -> usize {
        self.result_sets.len()
    }

    /// Take the next result set.
    pub fn next_result(&mut self) -> Option<ResultSet> {
        self.result_sets.pop_front()
    }

    /// Take the next result set and map every row into `T`.
    pub fn read<T: FromRow>(&mut self) -> SprocResult<Vec<T>> {
        let set = self.next_result().ok_or_else(|| {
            SprocError::type_conversion(format!(
                "procedure {} produced no further result sets",
                self.procedure
            ))
        })?;
        set.map()
    }

    /// First column of the first row of the next result set; NULL when there is none.
    pub fn scalar<T: FromSqlValue>(&mut self) -> SprocResult<T> {
        let value = self
            .next_result()
            .and_then(|set| set.into_rows().into_iter().next())
            .and_then(|row| row.into_values().into_iter().next())
            .unwrap_or(SqlValue::Null);
        T::from_sql_value(&value)
    }

    /// Value the procedure assigned to an output parameter.
    ///
    /// Parameters themselves are only updated after commit.
    pub fn output(&self, name: &str) -> Option<&SqlValue> {
        let name = name.strip_prefix('@').unwrap_or(name);
        self.outputs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Return status of the procedure, when captured.
    pub fn return_value(&self) -> Option<&SqlValue> {
        self.return_value.as_ref()
    }

    /// Run an ad-hoc statement inside the transaction and collect its result sets.
    pub async fn query(&mut self, sql: &str, params: &[SqlValue]) -> SprocResult<Vec<ResultSet>> {
        debug!(procedure = self.procedure, "Additional read in transaction");
        self.conn.query(sql, params).await
    }

    /// Run an ad-hoc statement inside the transaction.
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> SprocResult<u64> {
        debug!(procedure = self.procedure, "Additional statement in transaction");
        self.conn.execute(sql, params).await
    }

    /// Bulk-load rows inside the transaction.
    ///
    /// Unlike [`Context::execute_bulk_copy`], the rows commit or roll back with
    /// the surrounding call.
    pub async fn bulk_copy(
        &mut self,
        options: &BulkCopyOptions,
        source: &mut dyn RowSource,
    ) -> SprocResult<u64> {
        bulk::load(&mut *self.conn, self.options, options, source).await
    }
}

impl Context {
    /// Call a procedure for its side effects and return the rows affected.
    pub async fn execute_non_query(&self, command: &mut Command) -> SprocResult<u64> {
        self.run(command, false, |cmd| {
            Box::pin(async move { Ok(cmd.rows_affected()) })
        })
        .await
    }

    /// Call a procedure and return the first column of the first row it produces.
    ///
    /// A procedure that produces no rows yields NULL, which converts into
    /// `Option<T>` as `None` and fails for any other `T`.
    pub async fn execute_scalar<T>(&self, command: &mut Command) -> SprocResult<T>
    where
        T: FromSqlValue + Send + 'static,
    {
        self.run(command, false, |cmd| Box::pin(async move { cmd.scalar::<T>() }))
            .await
    }

    /// Call a procedure and return its return status.
    pub async fn execute_with_return_value<T>(&self, command: &mut Command) -> SprocResult<T>
    where
        T: FromSqlValue + Send + 'static,
    {
        self.run(command, true, |cmd| {
            Box::pin(async move {
                let status = cmd.return_value().cloned().unwrap_or(SqlValue::Null);
                T::from_sql_value(&status)
            })
        })
        .await
    }

    /// Call a procedure and hand the live command to `projection` inside the transaction.
    ///
    /// Whatever the projection returns is the call's result. A projection error
    /// rolls back everything the call wrote.
    ///
    /// ```rust,ignore
    /// let people: Vec<Person> = ctx
    ///     .execute_transaction(&mut Command::new("dbo.ListPeople"), |cmd| {
    ///         Box::pin(async move { cmd.read::<Person>() })
    ///     })
    ///     .await?;
    /// ```
    pub async fn execute_transaction<R, F>(&self, command: &mut Command, projection: F) -> SprocResult<R>
    where
        F: for<'c, 'a> FnOnce(&'c mut LiveCommand<'a>) -> BoxFuture<'c, SprocResult<R>> + Send,
        R: Send,
    {
        self.run(command, false, projection).await
    }

    async fn run<R, F>(&self, command: &mut Command, capture_return: bool, projection: F) -> SprocResult<R>
    where
        F: for<'c, 'a> FnOnce(&'c mut LiveCommand<'a>) -> BoxFuture<'c, SprocResult<R>> + Send,
        R: Send,
    {
        let mut slot = self.enter()?;
        let (procedure, params, controls) = command.split();
        validate_parameters(params)?;

        let options = self.options();
        let CallControls { timeout, cancellation } = controls;
        if cancellation.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(SprocError::Cancelled);
        }
        let guard = Guard::new(timeout.or(options.command_timeout), cancellation.as_ref());

        let mut conn = guard.run(self.acquire(&mut slot)).await?;

        debug!(context = %self.id(), procedure, isolation = %options.isolation, "Beginning transaction");
        if let Err(e) = guard.run(conn.begin(options.isolation)).await {
            self.release(&mut slot, conn, e.is_interrupted()).await;
            return Err(e);
        }

        let outcome = guard.run(async {
            let request = CallRequest {
                procedure,
                parameters: &*params,
                capture_return,
            };
            let execution = conn.call(request).await?;
            debug!(procedure, result_sets = execution.result_sets.len(), "Procedure executed");

            let mut live = LiveCommand::new(&mut *conn, options, procedure, execution);
            let value = projection(&mut live).await?;
            let staged = stage_outputs(params, &live.outputs, live.return_value.as_ref())?;
            drop(live);
            Ok((value, staged))
        })
        .await;

        match outcome {
            Ok((value, staged)) => {
                if let Err(e) = guard.run(conn.commit()).await {
                    warn!(context = %self.id(), procedure, error = %e, "Commit failed");
                    let rolled_back = roll_back(&mut conn, procedure).await;
                    self.release(&mut slot, conn, e.is_interrupted() || !rolled_back)
                        .await;
                    return Err(e);
                }
                debug!(context = %self.id(), procedure, "Transaction committed");
                self.release(&mut slot, conn, false).await;

                for (index, value) in staged {
                    params[index].set_output(value);
                }
                Ok(value)
            }
            Err(e) => {
                debug!(context = %self.id(), procedure, error = %e, "Rolling back transaction");
                let rolled_back = roll_back(&mut conn, procedure).await;
                self.release(&mut slot, conn, e.is_interrupted() || !rolled_back)
                    .await;
                Err(e)
            }
        }
    }
}

/// Pair every output-bearing parameter with the value the driver reported for it.
fn stage_outputs(
    params: &[Parameter],
    outputs: &[(String, SqlValue)],
    return_value: Option<&SqlValue>,
) -> SprocResult<Vec<(usize, SqlValue)>> {
    params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.direction().is_output())
        .map(|(index, p)| {
            let value = match p.direction() {
                Direction::ReturnValue => return_value.cloned(),
                _ => outputs
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(p.name()))
                    .map(|(_, v)| v.clone()),
            };
            value.map(|v| (index, v)).ok_or_else(|| {
                SprocError::binding(format!("no value returned for output parameter @{}", p.name()))
            })
        })
        .collect()
}

/// Roll back within the grace period. Returns `false` if the rollback failed or hung.
async fn roll_back(conn: &mut Box<dyn Connection>, procedure: &str) -> bool {
    match tokio::time::timeout(ROLLBACK_GRACE, conn.rollback()).await {
        Ok(Ok(())) => {
            debug!(procedure, "Transaction rolled back");
            true
        }
        Ok(Err(e)) => {
            warn!(procedure, error = %e, "Rollback failed");
            false
        }
        Err(_) => {
            warn!(procedure, grace_ms = ROLLBACK_GRACE.as_millis() as u64, "Rollback timed out");
            false
        }
    }
}

/// Time limit and cancellation shared by every I/O step of one operation.
///
/// The deadline is fixed when the guard is created, so a slow step leaves less
/// time for the steps after it.
pub(crate) struct Guard<'t> {
    deadline: Option<(Instant, Duration)>,
    cancellation: Option<&'t CancellationToken>,
}

impl<'t> Guard<'t> {
    pub(crate) fn new(timeout: Option<Duration>, cancellation: Option<&'t CancellationToken>) -> Self {
        Self {
            deadline: timeout.map(|limit| (Instant::now() + limit, limit)),
            cancellation,
        }
    }

    /// Run one step, abandoning it when the deadline passes or the token fires.
    pub(crate) async fn run<T, Fut>(&self, fut: Fut) -> SprocResult<T>
    where
        Fut: Future<Output = SprocResult<T>>,
    {
        let deadline = self.deadline;
        let timed = async move {
            match deadline {
                Some((at, limit)) => tokio::time::timeout_at(at, fut)
                    .await
                    .unwrap_or(Err(SprocError::Timeout(limit.as_millis() as u64))),
                None => fut.await,
            }
        };

        match self.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(SprocError::Cancelled),
                result = timed => result,
            },
            None => timed.await,
        }
    }
}

/// Run `fut` under an optional timeout and cancellation token.
pub(crate) async fn guarded<T, Fut>(
    timeout: Option<Duration>,
    cancellation: Option<&CancellationToken>,
    fut: Fut,
) -> SprocResult<T>
where
    Fut: Future<Output = SprocResult<T>>,
{
    Guard::new(timeout, cancellation).run(fut).await
}
