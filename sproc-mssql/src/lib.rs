//! # sproc-mssql
//!
//! Microsoft SQL Server driver for the sproc execution engine.
//!
//! This crate provides:
//! - A [`Driver`](sproc_core::Driver) that opens direct or pooled TDS sessions
//! - Stored procedure calls with output parameters and return status
//! - Native bulk load, with an identity-preserving fallback
//! - Connection pool management using `bb8` and `tiberius`
//!
//! ## Example
//!
//! ```rust,ignore
//! use sproc_core::prelude::*;
//! use sproc_mssql::MssqlDriver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = MssqlDriver::from_connection_string(
//!         "Server=localhost;Database=shop;User Id=sa;Password=YourPassword123!",
//!     )?;
//!     let ctx = Context::new(driver);
//!
//!     let mut cmd = Command::new("dbo.CalculateTotals")
//!         .input("OrderId", SqlType::Int, 123)
//!         .output("Total", SqlType::Decimal { precision: 18, scale: 2 });
//!     ctx.execute_non_query(&mut cmd).await?;
//!
//!     ctx.dispose().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod pool;
pub mod procedure;
pub mod types;

pub use config::{EncryptionMode, MssqlConfig, MssqlConfigBuilder};
pub use connection::{MssqlConnection, TdsClient};
pub use driver::MssqlDriver;
pub use error::{MssqlError, MssqlResult, server_code};
pub use pool::{MssqlPool, MssqlPoolBuilder, PoolConfig, PoolStatus};

use sproc_core::{Context, ContextOptions};

/// Create a context that opens SQL Server connections from a connection string.
pub fn context(conn_str: impl AsRef<str>) -> MssqlResult<Context> {
    Ok(Context::new(MssqlDriver::from_connection_string(conn_str)?))
}

/// Create a context over a pool.
pub fn pooled_context(pool: MssqlPool, options: ContextOptions) -> Context {
    Context::with_options(std::sync::Arc::new(MssqlDriver::pooled(pool)), options)
}

/// Create a context over an already-open client.
///
/// The context uses the client for every call and closes it only on dispose.
pub fn adopt(client: TdsClient) -> Context {
    Context::adopt(Box::new(MssqlConnection::from_client(client)))
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{MssqlConfig, MssqlConfigBuilder};
    pub use crate::connection::MssqlConnection;
    pub use crate::driver::MssqlDriver;
    pub use crate::error::{MssqlError, MssqlResult};
    pub use crate::pool::{MssqlPool, MssqlPoolBuilder};
}
