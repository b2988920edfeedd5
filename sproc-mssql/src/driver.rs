//! SQL Server driver.

use std::sync::Arc;

use sproc_core::{BoxFuture, Connection, Driver, SprocResult};
use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;
use tracing::{debug, info};

use crate::config::MssqlConfig;
use crate::connection::{MssqlConnection, TdsClient};
use crate::error::{MssqlError, MssqlResult};
use crate::pool::MssqlPool;

enum Source {
    Direct(Arc<MssqlConfig>),
    Pooled(MssqlPool),
}

/// Opens SQL Server connections for an execution context.
///
/// A direct driver opens a fresh TDS session per connection; a pooled driver
/// checks connections out of a [`MssqlPool`].
#[derive(Clone)]
pub struct MssqlDriver {
    source: Arc<Source>,
}

impl MssqlDriver {
    /// Create a driver that opens a new session for every connection.
    pub fn new(config: MssqlConfig) -> Self {
        Self {
            source: Arc::new(Source::Direct(Arc::new(config))),
        }
    }

    /// Create a driver from a connection string.
    pub fn from_connection_string(conn_str: impl AsRef<str>) -> MssqlResult<Self> {
        Ok(Self::new(MssqlConfig::from_connection_string(conn_str)?))
    }

    /// Create a driver backed by a connection pool.
    pub fn pooled(pool: MssqlPool) -> Self {
        Self {
            source: Arc::new(Source::Pooled(pool)),
        }
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &MssqlConfig {
        match self.source.as_ref() {
            Source::Direct(config) => config,
            Source::Pooled(pool) => pool.config(),
        }
    }

    /// Open a connection.
    pub async fn open(&self) -> MssqlResult<MssqlConnection> {
        match self.source.as_ref() {
            Source::Direct(config) => {
                let client = connect(config).await?;
                Ok(MssqlConnection::from_client(client))
            }
            Source::Pooled(pool) => pool.get().await,
        }
    }
}

impl Driver for MssqlDriver {
    fn connect(&self) -> BoxFuture<'_, SprocResult<Box<dyn Connection>>> {
        Box::pin(async move {
            let conn = self.open().await?;
            Ok(Box::new(conn) as Box<dyn Connection>)
        })
    }
}

impl std::fmt::Debug for MssqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config();
        f.debug_struct("MssqlDriver")
            .field("host", &config.host)
            .field("database", &config.database)
            .field("pooled", &matches!(self.source.as_ref(), Source::Pooled(_)))
            .finish()
    }
}

/// Open a TDS session, following one server redirect.
async fn connect(config: &MssqlConfig) -> MssqlResult<TdsClient> {
    let tiberius_config = config.to_tiberius_config()?;
    let addr = tiberius_config.get_addr();

    match open_session(&tiberius_config, &addr, config).await {
        Err(MssqlError::SqlServer(tiberius::error::Error::Routing { host, port })) => {
            debug!(host = %host, port = port, "Server redirected connection");
            let mut redirected = tiberius_config.clone();
            redirected.host(&host);
            redirected.port(port);
            open_session(&redirected, &format!("{}:{}", host, port), config).await
        }
        other => other,
    }
}

async fn open_session(
    tiberius_config: &Config,
    addr: &str,
    config: &MssqlConfig,
) -> MssqlResult<TdsClient> {
    let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| MssqlError::Timeout(config.connect_timeout.as_millis() as u64))??;
    tcp.set_nodelay(true)?;

    let client = Client::connect(tiberius_config.clone(), tcp.compat_write()).await?;

    info!(
        host = %config.host,
        port = %config.port,
        database = %config.database,
        "Connected to SQL Server"
    );

    Ok(client)
}
