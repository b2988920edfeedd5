//! In-memory driver for integration tests.
//!
//! [`FakeDb`] models a database with tables and stored procedures. Each
//! connection buffers its writes while a transaction is open; they become
//! visible to other connections only on commit. Bulk batches outside a
//! transaction commit on their own, like the server-side batches of a real
//! bulk load.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sproc::{
    BoxFuture, BulkBatch, CallRequest, ColumnInfo, Connection, Direction, Driver, Execution,
    IsolationLevel, ResultSet, SprocError, SprocResult, SqlValue,
};
use tokio::sync::Notify;

/// Error raised by the fake database, standing in for a native driver error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeError {
    pub code: u32,
    pub message: String,
}

impl FakeError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for FakeError {}

fn fail<T>(code: u32, message: impl Into<String>) -> SprocResult<T> {
    Err(SprocError::driver(FakeError::new(code, message)))
}

/// Procedure body. Runs synchronously against the caller's view of the data.
pub type Body = Arc<dyn Fn(&mut ProcCall<'_>) -> Result<(), FakeError> + Send + Sync>;

/// A registered procedure.
#[derive(Clone)]
pub struct Procedure {
    body: Body,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
}

/// A table: column metadata, committed rows, and the next identity value.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<SqlValue>>,
    next_identity: i64,
}

type RejectRule = Arc<dyn Fn(&[SqlValue]) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    procedures: HashMap<String, Procedure>,
    rejects: HashMap<String, RejectRule>,
    events: Vec<String>,
    next_connection: usize,
    open_connections: usize,
    connect_delay: Option<Duration>,
    commit_delay: Option<Duration>,
}

/// Shared in-memory database.
#[derive(Clone, Default)]
pub struct FakeDb {
    state: Arc<Mutex<State>>,
}

fn key(name: &str) -> String {
    name.split('.')
        .map(|p| p.trim().trim_start_matches('[').trim_end_matches(']'))
        .collect::<Vec<_>>()
        .join(".")
        .to_lowercase()
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Create a table. An identity column starts at 1.
    pub fn create_table(&self, name: &str, columns: Vec<ColumnInfo>) {
        let table = Table {
            columns,
            rows: Vec::new(),
            next_identity: 1,
        };
        self.lock().tables.insert(key(name), table);
    }

    /// Register a procedure.
    pub fn procedure<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut ProcCall<'_>) -> Result<(), FakeError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(body), None, None);
    }

    /// Register a procedure that sleeps before running.
    pub fn slow_procedure<F>(&self, name: &str, delay: Duration, body: F)
    where
        F: Fn(&mut ProcCall<'_>) -> Result<(), FakeError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(body), Some(delay), None);
    }

    /// Register a procedure that waits for `gate` before running.
    pub fn gated_procedure<F>(&self, name: &str, gate: Arc<Notify>, body: F)
    where
        F: Fn(&mut ProcCall<'_>) -> Result<(), FakeError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(body), None, Some(gate));
    }

    fn register(&self, name: &str, body: Body, delay: Option<Duration>, gate: Option<Arc<Notify>>) {
        self.lock()
            .procedures
            .insert(key(name), Procedure { body, delay, gate });
    }

    /// Make every new connection take `delay` to open.
    pub fn slow_connects(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Make every commit take `delay` before it applies writes.
    pub fn slow_commits(&self, delay: Duration) {
        self.lock().commit_delay = Some(delay);
    }

    /// Reject bulk rows matching `rule` with a constraint error.
    pub fn reject_rows<F>(&self, table: &str, rule: F)
    where
        F: Fn(&[SqlValue]) -> bool + Send + Sync + 'static,
    {
        self.lock().rejects.insert(key(table), Arc::new(rule));
    }

    /// Committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Vec<SqlValue>> {
        self.lock()
            .tables
            .get(&key(table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Every driver interaction so far, in order.
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Number of connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    /// A driver opening connections to this database.
    pub fn driver(&self) -> FakeDriver {
        FakeDriver { db: self.clone() }
    }

    /// Open a connection directly, for adoption.
    pub fn connect(&self) -> FakeConnection {
        let mut state = self.lock();
        state.next_connection += 1;
        state.open_connections += 1;
        let id = state.next_connection;
        state.events.push(format!("connect#{}", id));
        FakeConnection {
            db: self.clone(),
            id,
            open: true,
            pending: None,
        }
    }

    fn log(&self, event: String) {
        self.lock().events.push(event);
    }
}

/// Driver over a [`FakeDb`].
pub struct FakeDriver {
    db: FakeDb,
}

impl Driver for FakeDriver {
    fn connect(&self) -> BoxFuture<'_, SprocResult<Box<dyn Connection>>> {
        Box::pin(async move {
            let delay = self.db.lock().connect_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Box::new(self.db.connect()) as Box<dyn Connection>)
        })
    }
}

/// Writes buffered by an open transaction.
type Pending = Vec<(String, Vec<SqlValue>)>;

/// The view a procedure body runs against.
pub struct ProcCall<'a> {
    params: &'a [sproc::Parameter],
    tables: &'a HashMap<String, Table>,
    pending: &'a mut Pending,
    outputs: HashMap<String, SqlValue>,
    result_sets: Vec<ResultSet>,
    return_value: i32,
    rows_affected: u64,
}

impl ProcCall<'_> {
    /// Input value of a parameter.
    pub fn input(&self, name: &str) -> SqlValue {
        self.params
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .and_then(|p| p.value().cloned())
            .unwrap_or(SqlValue::Null)
    }

    /// Assign an output parameter.
    pub fn set_output(&mut self, name: &str, value: impl Into<SqlValue>) {
        self.outputs.insert(name.to_lowercase(), value.into());
    }

    /// Set the return status.
    pub fn set_return(&mut self, status: i32) {
        self.return_value = status;
    }

    /// Produce a result set.
    pub fn select(&mut self, columns: &[&str], rows: Vec<Vec<SqlValue>>) {
        let mut set = ResultSet::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            set.push(row).unwrap();
        }
        self.result_sets.push(set);
    }

    /// Insert a row; it stays pending until the transaction commits.
    pub fn insert(&mut self, table: &str, row: Vec<SqlValue>) -> Result<(), FakeError> {
        let table = key(table);
        if !self.tables.contains_key(&table) {
            return Err(FakeError::new(208, format!("Invalid object name '{}'", table)));
        }
        self.pending.push((table, row));
        self.rows_affected += 1;
        Ok(())
    }

    /// Rows of a table as this transaction sees them.
    pub fn rows(&self, table: &str) -> Vec<Vec<SqlValue>> {
        let table = key(table);
        let mut rows = self
            .tables
            .get(&table)
            .map(|t| t.rows.clone())
            .unwrap_or_default();
        rows.extend(
            self.pending
                .iter()
                .filter(|(t, _)| *t == table)
                .map(|(_, r)| r.clone()),
        );
        rows
    }
}

/// A connection to a [`FakeDb`].
pub struct FakeConnection {
    db: FakeDb,
    id: usize,
    open: bool,
    pending: Option<Pending>,
}

impl FakeConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    fn ensure_open(&self) -> SprocResult<()> {
        if self.open {
            Ok(())
        } else {
            fail(10054, "connection is closed")
        }
    }

    fn apply(state: &mut State, writes: Pending) {
        for (table, row) in writes {
            if let Some(t) = state.tables.get_mut(&table) {
                t.rows.push(row);
            }
        }
    }

    async fn run_call(&mut self, request: CallRequest<'_>) -> SprocResult<Execution> {
        self.ensure_open()?;
        let name = key(request.procedure);
        let procedure = self.db.lock().procedures.get(&name).cloned();
        let Some(procedure) = procedure else {
            return fail(2812, format!("Could not find stored procedure '{}'", request.procedure));
        };
        self.db.log(format!("call#{} {}", self.id, name));

        if let Some(gate) = &procedure.gate {
            gate.notified().await;
        }
        if let Some(delay) = procedure.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.db.lock();
        let mut local = Vec::new();
        let pending = self.pending.as_mut().unwrap_or(&mut local);
        let mut call = ProcCall {
            params: request.parameters,
            tables: &state.tables,
            pending,
            outputs: HashMap::new(),
            result_sets: Vec::new(),
            return_value: 0,
            rows_affected: 0,
        };
        (procedure.body)(&mut call).map_err(SprocError::driver)?;

        let ProcCall {
            mut outputs,
            result_sets,
            return_value,
            rows_affected,
            ..
        } = call;

        let outputs = request
            .parameters
            .iter()
            .filter(|p| matches!(p.direction(), Direction::Out | Direction::InOut))
            .map(|p| {
                let value = outputs
                    .remove(&p.name().to_lowercase())
                    .or_else(|| p.value().cloned())
                    .unwrap_or(SqlValue::Null);
                (p.name().to_string(), value)
            })
            .collect();

        let wants_status = request.capture_return
            || request
                .parameters
                .iter()
                .any(|p| p.direction() == Direction::ReturnValue);

        // Autocommit when no transaction is open.
        if self.pending.is_none() {
            Self::apply(&mut state, local);
        }

        Ok(Execution {
            result_sets,
            outputs,
            return_value: wants_status.then_some(SqlValue::I32(return_value)),
            rows_affected,
        })
    }

    fn run_bulk(&mut self, batch: BulkBatch<'_>) -> SprocResult<u64> {
        self.ensure_open()?;
        let table_key = key(batch.table);
        let mut state = self.db.lock();
        state.events.push(format!("bulk#{} {} rows", self.id, batch.rows.len()));

        let reject = state.rejects.get(&table_key).cloned();
        let Some(table) = state.tables.get_mut(&table_key) else {
            return fail(208, format!("Invalid object name '{}'", batch.table));
        };

        let mut prepared = Vec::with_capacity(batch.rows.len());
        let mut next_identity = table.next_identity;
        for row in &batch.rows {
            if reject.as_ref().is_some_and(|rule| rule(row)) {
                return fail(547, "The INSERT statement conflicted with a CHECK constraint");
            }

            let mut full = Vec::with_capacity(table.columns.len());
            for column in &table.columns {
                let sent = batch
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(&column.name))
                    .map(|i| row[i].clone());
                let value = match (column.identity, sent) {
                    (true, Some(SqlValue::I32(v))) if batch.keep_identity => {
                        next_identity = next_identity.max(i64::from(v) + 1);
                        SqlValue::I32(v)
                    }
                    (true, Some(SqlValue::I64(v))) if batch.keep_identity => {
                        next_identity = next_identity.max(v + 1);
                        SqlValue::I64(v)
                    }
                    (true, _) => {
                        let id = next_identity;
                        next_identity += 1;
                        SqlValue::I64(id)
                    }
                    (false, value) => value.unwrap_or(SqlValue::Null),
                };
                full.push(value);
            }
            prepared.push(full);
        }
        table.next_identity = next_identity;

        let count = prepared.len() as u64;
        match self.pending.as_mut() {
            Some(pending) => pending.extend(prepared.into_iter().map(|r| (table_key.clone(), r))),
            None => table.rows.extend(prepared),
        }
        Ok(count)
    }
}

impl Connection for FakeConnection {
    fn is_open(&self) -> bool {
        self.open
    }

    fn begin(&mut self, isolation: IsolationLevel) -> BoxFuture<'_, SprocResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            if self.pending.is_some() {
                return fail(3902, "a transaction is already open");
            }
            self.db.log(format!("begin#{} {}", self.id, isolation.as_sql()));
            self.pending = Some(Vec::new());
            Ok(())
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, SprocResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            let delay = self.db.lock().commit_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let Some(writes) = self.pending.take() else {
                return fail(3902, "COMMIT has no corresponding BEGIN TRANSACTION");
            };
            let mut state = self.db.lock();
            state.events.push(format!("commit#{}", self.id));
            Self::apply(&mut state, writes);
            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, SprocResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.pending = None;
            self.db.log(format!("rollback#{}", self.id));
            Ok(())
        })
    }

    fn call<'a>(&'a mut self, request: CallRequest<'a>) -> BoxFuture<'a, SprocResult<Execution>> {
        Box::pin(self.run_call(request))
    }

    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        _params: &'a [SqlValue],
    ) -> BoxFuture<'a, SprocResult<Vec<ResultSet>>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.db.log(format!("query#{} {}", self.id, sql));
            // Supports `COUNT <table>` only.
            let Some(table) = sql.strip_prefix("COUNT ") else {
                return fail(102, format!("Incorrect syntax near '{}'", sql));
            };
            let table = key(table);
            let committed = self
                .db
                .lock()
                .tables
                .get(&table)
                .map(|t| t.rows.len())
                .unwrap_or(0);
            let pending = self
                .pending
                .as_ref()
                .map(|p| p.iter().filter(|(t, _)| *t == table).count())
                .unwrap_or(0);

            let mut set = ResultSet::new(vec!["count".to_string()]);
            set.push(vec![SqlValue::I64((committed + pending) as i64)])?;
            Ok(vec![set])
        })
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, SprocResult<u64>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.db.log(format!("execute#{} {}", self.id, sql));
            // Supports `INSERT <table>` with the row as parameters.
            let Some(table) = sql.strip_prefix("INSERT ") else {
                return fail(102, format!("Incorrect syntax near '{}'", sql));
            };
            let table = key(table);
            let row = params.to_vec();
            match self.pending.as_mut() {
                Some(pending) => pending.push((table, row)),
                None => Self::apply(&mut self.db.lock(), vec![(table, row)]),
            }
            Ok(1)
        })
    }

    fn table_columns<'a>(
        &'a mut self,
        table: &'a str,
    ) -> BoxFuture<'a, SprocResult<Vec<ColumnInfo>>> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(self
                .db
                .lock()
                .tables
                .get(&key(table))
                .map(|t| t.columns.clone())
                .unwrap_or_default())
        })
    }

    fn bulk_insert<'a>(&'a mut self, batch: BulkBatch<'a>) -> BoxFuture<'a, SprocResult<u64>> {
        Box::pin(async move { self.run_bulk(batch) })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, SprocResult<()>> {
        Box::pin(async move {
            let mut state = self.db.lock();
            state.open_connections -= 1;
            if self.pending.is_some() {
                state.events.push(format!("rollback#{}", self.id));
            }
            state.events.push(format!("close#{}", self.id));
            Ok(())
        })
    }
}

/// Events of one connection, without the connection id.
pub fn events_for(events: &[String], id: usize) -> Vec<String> {
    let suffix = format!("#{}", id);
    events
        .iter()
        .filter_map(|e| {
            let (head, tail) = e.split_once(' ').unwrap_or((e.as_str(), ""));
            head.strip_suffix(&suffix).map(|name| {
                if tail.is_empty() {
                    name.to_string()
                } else {
                    format!("{} {}", name, tail)
                }
            })
        })
        .collect()
}
