//! Execution contexts.
//!
//! A [`Context`] owns one database connection handle end-to-end and exposes the
//! execution entry points (see [`runner`](crate::runner) and [`bulk`](crate::bulk)).
//!
//! States: `Unopened -> Open -> Disposed`. A context built from a [`Driver`]
//! starts `Unopened` and connects on first use; a context built by adopting a
//! live [`Connection`] starts `Open` and never re-opens or closes it between
//! calls. After [`Context::dispose`] every execution method fails with
//! [`SprocError::Disposed`].
//!
//! A context runs one call at a time. A call that starts while another is in
//! flight fails immediately with [`SprocError::Busy`]; distinct contexts share
//! nothing and may run concurrently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::{ConnectionLifetime, ContextOptions};
use crate::driver::{Connection, Driver};
use crate::error::{SprocError, SprocResult};

/// Time allowed for a rollback after a failed or interrupted call.
pub(crate) const ROLLBACK_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    /// No connection is held.
    Unopened,
    /// A connection is held (or a call is in flight).
    Open,
    /// The context has been disposed.
    Disposed,
}

pub(crate) struct Slot {
    connection: Option<Box<dyn Connection>>,
    adopted: bool,
    disposed: bool,
}

/// Owner of one connection and the entry point for all execution modes.
pub struct Context {
    id: Uuid,
    driver: Option<Arc<dyn Driver>>,
    options: ContextOptions,
    slot: Mutex<Slot>,
}

impl Context {
    /// Create a context that opens connections through `driver`. Nothing is
    /// opened until the first call.
    pub fn new(driver: impl Driver + 'static) -> Self {
        Self::with_options(Arc::new(driver), ContextOptions::default())
    }

    /// Create a context from a shared driver with explicit options.
    pub fn with_options(driver: Arc<dyn Driver>, options: ContextOptions) -> Self {
        let id = Uuid::new_v4();
        debug!(context = %id, "Context created");
        Self {
            id,
            driver: Some(driver),
            options,
            slot: Mutex::new(Slot {
                connection: None,
                adopted: false,
                disposed: false,
            }),
        }
    }

    /// Adopt an already-open connection. It is used as-is and released only on dispose.
    pub fn adopt(connection: Box<dyn Connection>) -> Self {
        Self::adopt_with_options(connection, ContextOptions::default())
    }

    /// Adopt an already-open connection with explicit options.
    pub fn adopt_with_options(connection: Box<dyn Connection>, options: ContextOptions) -> Self {
        let id = Uuid::new_v4();
        debug!(context = %id, "Context adopted an open connection");
        Self {
            id,
            driver: None,
            options,
            slot: Mutex::new(Slot {
                connection: Some(connection),
                adopted: true,
                disposed: false,
            }),
        }
    }

    /// Unique id of this context, used in log records.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Options applied to every call.
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        match self.slot.try_lock() {
            Ok(slot) if slot.disposed => ContextState::Disposed,
            Ok(slot) if slot.connection.is_some() => ContextState::Open,
            Ok(_) => ContextState::Unopened,
            Err(_) => ContextState::Open,
        }
    }

    /// Check if a call is in flight.
    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    /// Release the connection and any in-flight transaction.
    ///
    /// Waits for an in-flight call to finish. Calling it again is a no-op.
    pub async fn dispose(&self) {
        let mut slot = self.slot.lock().await;
        if slot.disposed {
            trace!(context = %self.id, "Context already disposed");
            return;
        }
        slot.disposed = true;

        if let Some(conn) = slot.connection.take() {
            if let Err(e) = conn.close().await {
                warn!(context = %self.id, error = %e, "Failed to close connection on dispose");
            }
        }
        debug!(context = %self.id, "Context disposed");
    }

    /// Claim the context for one call.
    pub(crate) fn enter(&self) -> SprocResult<MutexGuard<'_, Slot>> {
        let slot = self.slot.try_lock().map_err(|_| SprocError::Busy)?;
        if slot.disposed {
            return Err(SprocError::Disposed);
        }
        Ok(slot)
    }

    /// Take the connection out of the slot for the duration of a call, opening one if needed.
    pub(crate) async fn acquire(&self, slot: &mut Slot) -> SprocResult<Box<dyn Connection>> {
        if let Some(conn) = slot.connection.take() {
            if conn.is_open() {
                return Ok(conn);
            }
            debug!(context = %self.id, "Discarding closed connection");
        }

        let driver = self.driver.as_ref().ok_or_else(|| {
            SprocError::connection_closed("the adopted connection is no longer open")
        })?;

        debug!(context = %self.id, "Opening connection");
        driver.connect().await
    }

    /// Hand the connection back after a call.
    ///
    /// Adopted connections and `ConnectionLifetime::Context` connections are kept
    /// while healthy; everything else is closed.
    pub(crate) async fn release(&self, slot: &mut Slot, conn: Box<dyn Connection>, poisoned: bool) {
        let keep = !poisoned
            && conn.is_open()
            && (slot.adopted || self.options.connection_lifetime == ConnectionLifetime::Context);

        if keep {
            slot.connection = Some(conn);
            return;
        }

        debug!(context = %self.id, poisoned, "Closing connection");
        if let Err(e) = conn.close().await {
            warn!(context = %self.id, error = %e, "Failed to close connection");
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if !slot.disposed && slot.connection.is_some() {
            debug!(context = %self.id, "Context dropped without dispose; dropping connection");
        }
    }
}
