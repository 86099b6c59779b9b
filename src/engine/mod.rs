// Engine seam - the blocking database the dispatcher drives
//
// - Engine: the database handle every pooled connection is opened from
// - EngineConnection: one blocking connection; may be shared by overlapping callers
// - sqlite: rusqlite-backed implementation

#[cfg(feature = "sqlite")]
pub mod sqlite;

use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::results::ResultSet;
use crate::types::Params;

/// A database instance that can hand out connections.
pub trait Engine: Send + Sync + 'static {
    type Connection: EngineConnection;

    /// Open one new connection against this database.
    ///
    /// # Errors
    /// Returns `DispatchError::ConnectionError` if the connection cannot be opened.
    fn connect(&self) -> Result<Self::Connection, DispatchError>;
}

/// Blocking connection operations. Every method may block the calling thread except
/// [`interrupt`](EngineConnection::interrupt), which must be callable from any thread at any
/// time.
///
/// Each execution carries its own `cancel` token. A connection may be shared by overlapping
/// calls, so cancellation is scoped to the call that owns the token, never to the whole
/// connection.
pub trait EngineConnection: Send + Sync + 'static {
    /// Run query text, possibly several statements, returning one result set per statement.
    ///
    /// # Errors
    /// `QueryError` for engine failures, `TimeoutError` when the configured timeout expires,
    /// `CancelledError` when `cancel` fired before or during the run, `ParameterError` for
    /// bad bindings.
    fn execute(
        &self,
        query: &str,
        params: &Params,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultSet>, DispatchError>;

    /// Compile `query` into this connection's statement cache.
    ///
    /// # Errors
    /// Returns `DispatchError::QueryError` if the statement does not compile.
    fn prepare(&self, query: &str) -> Result<(), DispatchError>;

    /// Run a statement previously compiled on this same connection.
    ///
    /// # Errors
    /// Same as [`execute`](EngineConnection::execute).
    fn execute_prepared(
        &self,
        query: &str,
        params: &Params,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, DispatchError>;

    /// Stop the call running under `cancel` at its next safepoint. Other calls on this
    /// connection keep running; a call still waiting to start never runs.
    fn interrupt(&self, cancel: &CancellationToken);

    /// Bound every later statement to `timeout_ms`; 0 disables the limit.
    ///
    /// # Errors
    /// Returns an error if the connection rejects the setting.
    fn set_query_timeout(&self, timeout_ms: u64) -> Result<(), DispatchError>;

    /// Cap the threads one statement may use; 0 keeps the engine default.
    ///
    /// # Errors
    /// Returns an error if the connection rejects the setting.
    fn set_max_threads(&self, limit: usize) -> Result<(), DispatchError>;

    /// Close the connection. Closing twice is a no-op.
    ///
    /// # Errors
    /// Returns an error if the engine fails to release the connection.
    fn close(&self) -> Result<(), DispatchError>;
}
