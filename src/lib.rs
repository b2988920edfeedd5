//! # sproc
//!
//! Transactional stored-procedure execution for Rust.
//!
//! sproc provides:
//! - Parameter descriptors with `In`, `Out`, `InOut` and `ReturnValue` directions
//! - Command execution wrapped in a transaction: commit on success, rollback on
//!   any failure, connection released on every path
//! - Result projection over the live command inside the transaction
//! - Bulk copy with batch-level consistency
//! - Async-first design built on Tokio, with a blocking facade
//! - Support for Microsoft SQL Server
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sproc::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sproc::SprocError> {
//!     let ctx = sproc::open("Server=localhost;Database=shop;User Id=sa;Password=...")?;
//!
//!     let mut cmd = Command::new("dbo.CalculateTotals")
//!         .input("OrderId", SqlType::Int, 123)
//!         .output("Total", SqlType::Decimal { precision: 18, scale: 2 });
//!     ctx.execute_non_query(&mut cmd).await?;
//!
//!     let total: rust_decimal::Decimal = cmd.parameter_named("Total").unwrap().value_as()?;
//!     ctx.dispose().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use sproc_core::*;

/// Microsoft SQL Server driver.
#[cfg(feature = "mssql")]
pub mod mssql {
    pub use sproc_mssql::*;
}

/// Create a context over SQL Server from a connection string.
///
/// No connection is opened until the first call.
#[cfg(feature = "mssql")]
pub fn open(conn_str: impl AsRef<str>) -> SprocResult<Context> {
    Ok(sproc_mssql::context(conn_str)?)
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use sproc_core::prelude::*;

    #[cfg(feature = "mssql")]
    pub use sproc_mssql::{MssqlConfig, MssqlDriver, MssqlPool};
}
