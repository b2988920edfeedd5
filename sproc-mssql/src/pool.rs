//! Connection pool for Microsoft SQL Server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use bb8_tiberius::ConnectionManager;
use tracing::{debug, info, warn};

use crate::config::MssqlConfig;
use crate::connection::{MssqlConnection, TdsClient};
use crate::error::{MssqlError, MssqlResult};

type TiberiusPool = Pool<SessionManager>;

/// A pooled client.
///
/// A tainted session is dropped by the pool instead of being handed out again.
pub struct Session {
    pub(crate) client: TdsClient,
    pub(crate) tainted: bool,
}

/// Pool manager over `bb8_tiberius` that refuses sessions left mid-transaction.
pub struct SessionManager {
    inner: ConnectionManager,
}

impl SessionManager {
    /// Wrap a tiberius connection manager.
    pub fn new(inner: ConnectionManager) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ManageConnection for SessionManager {
    type Connection = Session;
    type Error = bb8_tiberius::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let client = self.inner.connect().await?;
        Ok(Session {
            client,
            tainted: false,
        })
    }

    async fn is_valid(&self, session: &mut Self::Connection) -> Result<(), Self::Error> {
        let row = session
            .client
            .simple_query("SELECT @@TRANCOUNT")
            .await?
            .into_row()
            .await?;
        let open = match row {
            Some(row) => row.try_get::<i32, _>(0)?.unwrap_or(0),
            None => 0,
        };
        check_trancount(open)
    }

    fn has_broken(&self, session: &mut Self::Connection) -> bool {
        if session.tainted {
            warn!("Dropping pooled SQL Server session");
        }
        session.tainted
    }
}

fn check_trancount(open: i32) -> Result<(), bb8_tiberius::Error> {
    if open > 0 {
        let message = format!("session still holds {} open transaction(s)", open);
        return Err(tiberius::error::Error::Protocol(message.into()).into());
    }
    Ok(())
}

/// A connection pool for Microsoft SQL Server.
#[derive(Clone)]
pub struct MssqlPool {
    inner: TiberiusPool,
    config: Arc<MssqlConfig>,
    max_size: usize,
}

impl MssqlPool {
    /// Create a new connection pool from configuration.
    pub async fn new(config: MssqlConfig) -> MssqlResult<Self> {
        Self::with_pool_config(config, PoolConfig::default()).await
    }

    /// Create a new connection pool with custom pool configuration.
    pub async fn with_pool_config(
        config: MssqlConfig,
        pool_config: PoolConfig,
    ) -> MssqlResult<Self> {
        let mgr = SessionManager::new(ConnectionManager::new(config.to_tiberius_config()?));

        let pool = Pool::builder()
            .max_size(pool_config.max_connections as u32)
            .min_idle(Some(pool_config.min_connections as u32))
            .connection_timeout(
                pool_config
                    .connection_timeout
                    .unwrap_or(Duration::from_secs(30)),
            )
            .idle_timeout(pool_config.idle_timeout)
            .max_lifetime(pool_config.max_lifetime)
            .test_on_check_out(pool_config.test_on_check_out)
            .build(mgr)
            .await
            .map_err(|e| MssqlError::pool(format!("failed to create pool: {}", e)))?;

        info!(
            host = %config.host,
            port = %config.port,
            database = %config.database,
            max_connections = %pool_config.max_connections,
            "MSSQL connection pool created"
        );

        Ok(Self {
            inner: pool,
            config: Arc::new(config),
            max_size: pool_config.max_connections,
        })
    }

    /// Check out a connection.
    ///
    /// The connection owns its pool slot and returns it when closed or dropped.
    pub async fn get(&self) -> MssqlResult<MssqlConnection> {
        debug!("Acquiring connection from pool");
        let client = self.inner.get_owned().await?;
        Ok(MssqlConnection::from_pooled(client))
    }

    /// Get the current pool status.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state();
        PoolStatus {
            connections: state.connections as usize,
            idle_connections: state.idle_connections as usize,
            max_size: self.max_size,
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &MssqlConfig {
        &self.config
    }

    /// Check if the pool is healthy by attempting to get a connection.
    pub async fn is_healthy(&self) -> bool {
        match self.inner.get().await {
            Ok(mut session) => match session.client.simple_query("SELECT 1").await {
                Ok(stream) => stream.into_results().await.is_ok(),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Create a builder for configuring the pool.
    pub fn builder() -> MssqlPoolBuilder {
        MssqlPoolBuilder::new()
    }
}

impl std::fmt::Debug for MssqlPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlPool")
            .field("host", &self.config.host)
            .field("database", &self.config.database)
            .field("max_size", &self.max_size)
            .finish()
    }
}

/// Pool status information.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Current number of connections (including idle).
    pub connections: usize,
    /// Number of idle connections.
    pub idle_connections: usize,
    /// Maximum size of the pool.
    pub max_size: usize,
}

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: usize,
    /// Minimum number of idle connections to keep.
    pub min_connections: usize,
    /// Maximum time to wait for a connection.
    pub connection_timeout: Option<Duration>,
    /// Maximum idle time before a connection is closed.
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// Validate connections on checkout.
    ///
    /// A session that still reports `@@TRANCOUNT > 0` fails validation.
    pub test_on_check_out: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connection_timeout: Some(Duration::from_secs(30)),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
            test_on_check_out: true,
        }
    }
}

/// Builder for creating a connection pool.
#[derive(Debug, Default)]
pub struct MssqlPoolBuilder {
    config: Option<MssqlConfig>,
    connection_string: Option<String>,
    pool_config: PoolConfig,
}

impl MssqlPoolBuilder {
    /// Create a new pool builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection string.
    pub fn connection_string(mut self, conn_str: impl Into<String>) -> Self {
        self.connection_string = Some(conn_str.into());
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: MssqlConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the pool configuration.
    pub fn pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.pool_config.max_connections = n;
        self
    }

    /// Set the minimum number of idle connections.
    pub fn min_connections(mut self, n: usize) -> Self {
        self.pool_config.min_connections = n;
        self
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.connection_timeout = Some(timeout);
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.idle_timeout = Some(timeout);
        self
    }

    /// Set the maximum connection lifetime.
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.pool_config.max_lifetime = Some(lifetime);
        self
    }

    /// Build the connection pool.
    pub async fn build(self) -> MssqlResult<MssqlPool> {
        let config = if let Some(config) = self.config {
            config
        } else if let Some(conn_str) = self.connection_string {
            MssqlConfig::from_connection_string(conn_str)?
        } else {
            return Err(MssqlError::config(
                "no connection string or config provided",
            ));
        };

        MssqlPool::with_pool_config(config, self.pool_config).await
    }
}
