//! SQL Server connection.
//!
//! [`MssqlConnection`] implements the engine's [`Connection`] over a tiberius
//! client, either owned directly or checked out of a `bb8` pool.

use bb8::PooledConnection;
use futures::TryStreamExt;
use sproc_core::{
    BoxFuture, BulkBatch, CallRequest, ColumnInfo, Connection, Direction, Execution, IsolationLevel,
    ResultSet, SprocError, SprocResult, SqlValue,
};
use tiberius::{Client, Query, QueryItem, QueryStream, TokenRow};
use tokio::net::TcpStream;
use tokio_util::compat::Compat;
use tracing::{debug, warn};

use crate::error::MssqlError;
use crate::pool::SessionManager;
use crate::procedure::{self, RETURN_VALUE_COLUMN, ROWS_AFFECTED_COLUMN};
use crate::types::{bind_value, coerce, from_column_data, parse_type_name, to_column_data};

/// The tiberius client type used by direct and pooled connections.
pub type TdsClient = Client<Compat<TcpStream>>;

/// TDS limits a request to 2100 parameters.
const MAX_PARAMS_PER_STATEMENT: usize = 2000;
/// SQL Server limits a table value constructor to 1000 rows.
const MAX_ROWS_PER_INSERT: usize = 1000;

const TABLE_COLUMNS_SQL: &str = "\
SELECT c.name, t.name, c.max_length, c.precision, c.scale, c.is_identity
FROM sys.columns c
JOIN sys.types t ON c.user_type_id = t.user_type_id
WHERE c.object_id = OBJECT_ID(@P1)
  AND c.is_computed = 0
  AND t.name NOT IN ('timestamp', 'rowversion')
ORDER BY c.column_id";

enum Inner {
    Direct(TdsClient),
    Pooled(PooledConnection<'static, SessionManager>),
}

/// Request bookkeeping for one TDS session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SessionState {
    broken: bool,
    /// A request was sent and its response not fully read.
    pending: bool,
    in_transaction: bool,
}

impl SessionState {
    fn start(&mut self) -> SprocResult<()> {
        if self.pending {
            // The previous request was abandoned mid-response.
            self.broken = true;
        }
        if self.broken {
            return Err(SprocError::connection_closed(
                "SQL Server session is unusable after an interrupted request",
            ));
        }
        self.pending = true;
        Ok(())
    }

    fn finish(&mut self) {
        self.pending = false;
    }

    fn is_usable(&self) -> bool {
        !self.broken && !self.pending
    }

    fn must_discard(&self) -> bool {
        self.broken || self.pending || self.in_transaction
    }
}

/// A SQL Server connection usable by an execution context.
pub struct MssqlConnection {
    inner: Inner,
    state: SessionState,
}

impl MssqlConnection {
    /// Wrap a directly opened client.
    pub fn from_client(client: TdsClient) -> Self {
        Self {
            inner: Inner::Direct(client),
            state: SessionState::default(),
        }
    }

    pub(crate) fn from_pooled(session: PooledConnection<'static, SessionManager>) -> Self {
        Self {
            inner: Inner::Pooled(session),
            state: SessionState::default(),
        }
    }

    /// Check if the connection came from a pool.
    pub fn is_pooled(&self) -> bool {
        matches!(self.inner, Inner::Pooled(_))
    }

    /// Get the underlying client.
    pub fn client(&mut self) -> &mut TdsClient {
        match &mut self.inner {
            Inner::Direct(client) => client,
            Inner::Pooled(session) => &mut session.client,
        }
    }

    /// Mirror the session state onto the pooled session, so a dropped
    /// connection is never reused while unsafe.
    fn sync(&mut self) {
        let discard = self.state.must_discard();
        if let Inner::Pooled(session) = &mut self.inner {
            session.tainted = discard;
        }
    }

    fn start(&mut self) -> SprocResult<()> {
        let started = self.state.start();
        self.sync();
        started
    }

    fn finish(&mut self) {
        self.state.finish();
        self.sync();
    }

    /// Convert a tiberius error, marking the connection broken on transport failures.
    fn fail(&mut self, err: tiberius::error::Error) -> SprocError {
        if matches!(err, tiberius::error::Error::Io { .. }) {
            warn!(error = %err, "SQL Server connection broken");
            self.state.broken = true;
        }
        MssqlError::SqlServer(err).into()
    }

    async fn simple(&mut self, sql: &str) -> SprocResult<()> {
        debug!(sql = %sql, "Executing batch");
        let result = match self.client().simple_query(sql).await {
            Ok(stream) => stream.into_results().await.map(drop),
            Err(e) => Err(e),
        };
        result.map_err(|e| self.fail(e))
    }

    async fn run_query(&mut self, sql: &str, params: &[SqlValue]) -> SprocResult<Vec<ResultSet>> {
        debug!(sql = %sql, params = params.len(), "Executing query");
        let mut query = Query::new(sql);
        for value in params {
            bind_value(&mut query, value, None);
        }
        let result = match query.query(self.client()).await {
            Ok(stream) => collect_result_sets(stream).await,
            Err(e) => Err(e.into()),
        };
        result.map_err(|e| self.fail_mssql(e))
    }

    async fn run_execute(&mut self, sql: &str, params: &[SqlValue]) -> SprocResult<u64> {
        debug!(sql = %sql, params = params.len(), "Executing statement");
        let mut query = Query::new(sql);
        for value in params {
            bind_value(&mut query, value, None);
        }
        match query.execute(self.client()).await {
            Ok(result) => Ok(result.total()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail_mssql(&mut self, err: MssqlError) -> SprocError {
        match err {
            MssqlError::SqlServer(e) => self.fail(e),
            other => other.into(),
        }
    }

    async fn run_call(&mut self, request: CallRequest<'_>) -> SprocResult<Execution> {
        sproc_core::validate_parameters(request.parameters)?;
        let batch = procedure::build_call(&request);
        debug!(procedure = request.procedure, binds = batch.binds.len(), "Calling procedure");

        let mut query = Query::new(batch.sql);
        for &index in &batch.binds {
            let param = &request.parameters[index];
            let value = param.value().unwrap_or(&SqlValue::Null);
            bind_value(&mut query, value, Some(param.sql_type()));
        }

        let result_sets = match query.query(self.client()).await {
            Ok(stream) => collect_result_sets(stream).await,
            Err(e) => Err(e.into()),
        };
        let mut result_sets = result_sets.map_err(|e| self.fail_mssql(e))?;

        let trailer = match result_sets.pop() {
            Some(set) if set.columns().first().map(String::as_str) == Some(RETURN_VALUE_COLUMN) => set,
            _ => {
                return Err(SprocError::type_conversion(format!(
                    "procedure {} returned no status row",
                    request.procedure
                )));
            }
        };
        let status = trailer.first().ok_or_else(|| {
            SprocError::type_conversion("procedure status row is empty")
        })?;

        let return_value = status.value(RETURN_VALUE_COLUMN).cloned().unwrap_or(SqlValue::Null);
        let rows_affected = status.get::<Option<i64>>(ROWS_AFFECTED_COLUMN)?.unwrap_or(0);

        let mut outputs = Vec::with_capacity(batch.outputs.len());
        for (position, &index) in batch.outputs.iter().enumerate() {
            let param = &request.parameters[index];
            let value = status
                .values()
                .get(position + 2)
                .cloned()
                .unwrap_or(SqlValue::Null);
            outputs.push((param.name().to_string(), coerce(value, param.sql_type())?));
        }

        let wants_status = request.capture_return
            || request
                .parameters
                .iter()
                .any(|p| p.direction() == Direction::ReturnValue);

        Ok(Execution {
            result_sets,
            outputs,
            return_value: wants_status.then_some(return_value),
            rows_affected: u64::try_from(rows_affected).unwrap_or(0),
        })
    }

    async fn run_table_columns(&mut self, table: &str) -> SprocResult<Vec<ColumnInfo>> {
        let sets = self
            .run_query(TABLE_COLUMNS_SQL, &[SqlValue::String(table.to_string())])
            .await?;

        let mut columns = Vec::new();
        for row in sets.into_iter().flat_map(ResultSet::into_rows) {
            let name: String = row.get_index(0)?;
            let type_name: String = row.get_index(1)?;
            let max_length: i16 = row.get_index(2)?;
            let precision: u8 = row.get_index(3)?;
            let scale: u8 = row.get_index(4)?;
            let identity: bool = row.get_index(5)?;

            let mut column = ColumnInfo::new(name);
            column.sql_type = parse_type_name(&type_name, max_length, precision, scale);
            column.identity = identity;
            columns.push(column);
        }
        Ok(columns)
    }

    async fn run_bulk_insert(&mut self, batch: BulkBatch<'_>) -> SprocResult<u64> {
        if batch.keep_identity && batch.columns.iter().any(|c| c.identity) {
            return self.insert_with_identity(batch).await;
        }

        debug!(table = batch.table, rows = batch.rows.len(), "Sending bulk load batch");
        let result = self.native_bulk_insert(&batch).await;
        result.map_err(|e| self.fail_mssql(e))
    }

    async fn native_bulk_insert(&mut self, batch: &BulkBatch<'_>) -> Result<u64, MssqlError> {
        let mut request = self.client().bulk_insert(batch.table).await?;
        for row in &batch.rows {
            let mut token_row = TokenRow::new();
            for (value, column) in row.iter().zip(batch.columns) {
                token_row.push(to_column_data(value.clone(), column.sql_type)?);
            }
            request.send(token_row).await?;
        }
        let result = request.finalize().await?;
        Ok(result.total())
    }

    /// Keep-identity load: explicit identity values need `IDENTITY_INSERT` and a plain `INSERT`.
    async fn insert_with_identity(&mut self, batch: BulkBatch<'_>) -> SprocResult<u64> {
        let table = procedure::quote_ident(batch.table);
        let statements = identity_statements(&table, &batch)?;
        let own_transaction = !self.state.in_transaction;

        debug!(table = %table, rows = batch.rows.len(), "Sending identity-preserving batch");

        if own_transaction {
            self.simple("BEGIN TRANSACTION").await?;
        }
        let outcome = self.identity_inserts(&table, &statements).await;

        if let Err(e) = self.simple(&format!("SET IDENTITY_INSERT {} OFF", table)).await {
            warn!(table = %table, error = %e, "Failed to reset IDENTITY_INSERT");
        }
        if !own_transaction {
            return outcome;
        }

        let outcome = match outcome {
            Ok(written) => self.simple("COMMIT TRANSACTION").await.map(|()| written),
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            if let Err(rollback) = self.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
                warn!(table = %table, error = %rollback, "Failed to roll back batch");
            }
        }
        outcome
    }

    async fn identity_inserts(
        &mut self,
        table: &str,
        statements: &[(String, Vec<SqlValue>)],
    ) -> SprocResult<u64> {
        self.simple(&format!("SET IDENTITY_INSERT {} ON", table)).await?;
        let mut written = 0;
        for (sql, values) in statements {
            written += self.run_execute(sql, values).await?;
        }
        Ok(written)
    }
}

/// Build the `INSERT` statements for a keep-identity batch, coercing every value up front.
fn identity_statements(
    table: &str,
    batch: &BulkBatch<'_>,
) -> SprocResult<Vec<(String, Vec<SqlValue>)>> {
    let columns = batch
        .columns
        .iter()
        .map(|c| procedure::quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let width = batch.columns.len().max(1);
    let rows_per_statement = (MAX_PARAMS_PER_STATEMENT / width).clamp(1, MAX_ROWS_PER_INSERT);

    let mut statements = Vec::new();
    for chunk in batch.rows.chunks(rows_per_statement) {
        let mut values = Vec::with_capacity(chunk.len() * width);
        let mut tuples = Vec::with_capacity(chunk.len());
        for row in chunk {
            let start = values.len();
            for (value, column) in row.iter().zip(batch.columns) {
                let value = match column.sql_type {
                    Some(ty) => coerce(value.clone(), ty)?,
                    None => value.clone(),
                };
                values.push(value);
            }
            let placeholders = (start + 1..=values.len())
                .map(|n| format!("@P{}", n))
                .collect::<Vec<_>>()
                .join(", ");
            tuples.push(format!("({})", placeholders));
        }
        let sql = format!("INSERT INTO {} ({}) VALUES {}", table, columns, tuples.join(", "));
        statements.push((sql, values));
    }
    Ok(statements)
}

/// Read every result set from a query stream.
async fn collect_result_sets(mut stream: QueryStream<'_>) -> Result<Vec<ResultSet>, MssqlError> {
    let mut sets: Vec<ResultSet> = Vec::new();

    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                let columns = meta.columns().iter().map(|c| c.name().to_string()).collect();
                sets.push(ResultSet::new(columns));
            }
            QueryItem::Row(row) => {
                let set = sets.last_mut().ok_or_else(|| {
                    MssqlError::type_conversion("row received before column metadata")
                })?;
                let values = row
                    .cells()
                    .map(|(_, data)| from_column_data(data))
                    .collect::<Result<Vec<_>, _>>()?;
                set.push(values)
                    .map_err(|e| MssqlError::type_conversion(e.to_string()))?;
            }
        }
    }

    Ok(sets)
}

impl Connection for MssqlConnection {
    fn is_open(&self) -> bool {
        self.state.is_usable()
    }

    fn begin(&mut self, isolation: IsolationLevel) -> BoxFuture<'_, SprocResult<()>> {
        Box::pin(async move {
            self.start()?;
            let result = self.simple(&isolation.to_begin_sql()).await;
            self.state.in_transaction |= result.is_ok();
            self.finish();
            result
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, SprocResult<()>> {
        Box::pin(async move {
            self.start()?;
            let result = self.simple("COMMIT TRANSACTION").await;
            self.state.in_transaction &= result.is_err();
            self.finish();
            result
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, SprocResult<()>> {
        Box::pin(async move {
            self.start()?;
            let result = self.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await;
            self.state.in_transaction &= result.is_err();
            self.finish();
            result
        })
    }

    fn call<'a>(&'a mut self, request: CallRequest<'a>) -> BoxFuture<'a, SprocResult<Execution>> {
        Box::pin(async move {
            self.start()?;
            let result = self.run_call(request).await;
            self.finish();
            result
        })
    }

    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, SprocResult<Vec<ResultSet>>> {
        Box::pin(async move {
            self.start()?;
            let result = self.run_query(sql, params).await;
            self.finish();
            result
        })
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, SprocResult<u64>> {
        Box::pin(async move {
            self.start()?;
            let result = self.run_execute(sql, params).await;
            self.finish();
            result
        })
    }

    fn table_columns<'a>(
        &'a mut self,
        table: &'a str,
    ) -> BoxFuture<'a, SprocResult<Vec<ColumnInfo>>> {
        Box::pin(async move {
            self.start()?;
            let result = self.run_table_columns(table).await;
            self.finish();
            result
        })
    }

    fn bulk_insert<'a>(&'a mut self, batch: BulkBatch<'a>) -> BoxFuture<'a, SprocResult<u64>> {
        Box::pin(async move {
            self.start()?;
            let result = self.run_bulk_insert(batch).await;
            self.finish();
            result
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, SprocResult<()>> {
        Box::pin(async move {
            let state = self.state;
            match self.inner {
                Inner::Direct(client) => {
                    debug!("Closing SQL Server connection");
                    client
                        .close()
                        .await
                        .map_err(|e| SprocError::from(MssqlError::SqlServer(e)))
                }
                Inner::Pooled(mut session) => {
                    if state.must_discard() {
                        warn!(state = ?state, "Discarding pooled SQL Server connection");
                        session.tainted = true;
                    } else {
                        debug!("Returning SQL Server connection to pool");
                    }
                    drop(session);
                    Ok(())
                }
            }
        })
    }
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("pooled", &self.is_pooled())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sproc_core::SqlType;

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("Id").with_type(SqlType::TinyInt).identity(),
            ColumnInfo::new("Customer").with_type(SqlType::NVarChar(Some(50))),
        ]
    }

    fn batch<'a>(columns: &'a [ColumnInfo], rows: Vec<Vec<SqlValue>>) -> BulkBatch<'a> {
        BulkBatch {
            table: "dbo.Orders",
            columns,
            rows,
            keep_identity: true,
        }
    }

    #[test]
    fn test_identity_statements_chunk_by_parameter_limit() {
        let columns = columns();
        let rows = (0..1500)
            .map(|n| vec![SqlValue::I32(n % 200), SqlValue::String(format!("c{}", n))])
            .collect();
        let statements = identity_statements("[dbo].[Orders]", &batch(&columns, rows)).unwrap();

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].1.len(), 2000);
        assert_eq!(statements[1].1.len(), 1000);
        assert!(statements[0].0.starts_with(
            "INSERT INTO [dbo].[Orders] ([Id], [Customer]) VALUES (@P1, @P2), (@P3, @P4)"
        ));
        assert_eq!(statements[0].1[0], SqlValue::U8(0));
    }

    #[test]
    fn test_identity_statements_reject_bad_rows_before_sending() {
        let columns = columns();
        let rows = vec![
            vec![SqlValue::I32(1), SqlValue::String("ok".into())],
            vec![SqlValue::I32(300), SqlValue::String("too big".into())],
        ];
        let err = identity_statements("[dbo].[Orders]", &batch(&columns, rows)).unwrap_err();

        assert!(matches!(err, SprocError::TypeConversion(_)));
    }

    #[test]
    fn test_session_state_transaction_lifecycle() {
        let mut state = SessionState::default();
        assert!(state.is_usable());
        assert!(!state.must_discard());

        state.start().unwrap();
        assert!(!state.is_usable());
        state.in_transaction = true;
        state.finish();
        assert!(state.is_usable());
        assert!(state.must_discard());

        state.start().unwrap();
        state.in_transaction = false;
        state.finish();
        assert!(!state.must_discard());
    }

    #[test]
    fn test_abandoned_request_breaks_session() {
        let mut state = SessionState::default();
        state.start().unwrap();
        // Dropped before finish, e.g. by a timeout.
        assert!(state.must_discard());

        let err = state.start().unwrap_err();
        assert!(matches!(err, SprocError::ConnectionClosed(_)));
        state.finish();
        assert!(!state.is_usable());
        assert!(state.must_discard());
    }
}
