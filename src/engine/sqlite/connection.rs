use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::{Batch, Connection, ErrorCode, OpenFlags};
use tokio_util::sync::CancellationToken;

use crate::engine::EngineConnection;
use crate::error::DispatchError;
use crate::results::ResultSet;
use crate::types::Params;

use super::config::SqliteOptions;
use super::query::run_statement;

/// VM instructions between progress-handler checks of the deadline and the call's token.
const PROGRESS_OPS: i32 = 1_000;

/// Blocking `SQLite` connection used by one pool slot.
///
/// The rusqlite handle is not `Sync`, so statements on one connection run one at a time
/// behind a mutex. Cancellation and timeouts never take that mutex: the progress handler
/// polls the token and deadline of whichever call currently holds it, so cancelling a call
/// that is still waiting for the lock cannot stop the statement running ahead of it.
pub struct SqliteConnection {
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
    monitor: Arc<CallMonitor>,
}

impl SqliteConnection {
    /// Open a connection and apply the configured pragmas.
    ///
    /// # Errors
    /// Returns `DispatchError::ConnectionError` if the database cannot be opened or configured.
    pub fn open(options: &SqliteOptions) -> Result<Self, DispatchError> {
        let conn = Connection::open_with_flags(options.uri(), OpenFlags::default())
            .map_err(|e| connection_error("open", &e))?;
        conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))
            .map_err(|e| connection_error("busy timeout", &e))?;
        if options.wal {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
                .map_err(|e| connection_error("WAL pragma", &e))?;
        }
        conn.set_prepared_statement_cache_capacity(options.statement_cache_capacity);

        let monitor = Arc::new(CallMonitor::new());
        let handler_monitor = Arc::clone(&monitor);
        conn.progress_handler(PROGRESS_OPS, Some(move || handler_monitor.should_abort()))
            .map_err(|e| connection_error("progress handler", &e))?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
            monitor,
        })
    }

    /// Run synchronous rusqlite logic under this connection's lock with the query timeout armed.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` if the connection was closed, otherwise whatever
    /// `func` returns.
    pub fn with_connection<F, R>(&self, func: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&Connection) -> Result<R, DispatchError>,
    {
        self.run_call(None, func)
    }

    fn run_call<F, R>(&self, cancel: Option<&CancellationToken>, func: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&Connection) -> Result<R, DispatchError>,
    {
        let guard = self.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| DispatchError::closed("SQLite connection"))?;
        // cancelled while waiting for the lock
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(DispatchError::CancelledError);
        }
        self.monitor.arm(cancel);
        let result = func(conn);
        self.monitor.disarm();
        result
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        match self.conn.lock() {
            Ok(guard) => guard,
            // A panicked statement leaves the connection itself usable.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn map_error(&self, err: rusqlite::Error) -> DispatchError {
        if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
            return if self.monitor.expired() {
                DispatchError::TimeoutError(format!(
                    "query exceeded {}ms",
                    self.monitor.timeout_ms()
                ))
            } else {
                DispatchError::CancelledError
            };
        }
        match err {
            rusqlite::Error::InvalidParameterName(_)
            | rusqlite::Error::InvalidParameterCount(..)
            | rusqlite::Error::ToSqlConversionFailure(_) => {
                DispatchError::ParameterError(err.to_string())
            }
            other => DispatchError::QueryError(other.to_string()),
        }
    }
}

impl EngineConnection for SqliteConnection {
    fn execute(
        &self,
        query: &str,
        params: &Params,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultSet>, DispatchError> {
        let map_err = |e: rusqlite::Error| self.map_error(e);
        self.run_call(Some(cancel), |conn| {
            let mut batch = Batch::new(conn, query);
            let mut sets = Vec::new();
            while let Some(mut stmt) = batch.next().map_err(map_err)? {
                sets.push(run_statement(conn, &mut stmt, params, &map_err)?);
            }
            if sets.is_empty() {
                return Err(DispatchError::QueryError("query is empty".into()));
            }
            Ok(sets)
        })
    }

    fn prepare(&self, query: &str) -> Result<(), DispatchError> {
        let map_err = |e: rusqlite::Error| self.map_error(e);
        // warm the cache so executions through the handle don't re-compile
        self.with_connection(|conn| conn.prepare_cached(query).map(|_| ()).map_err(map_err))
    }

    fn execute_prepared(
        &self,
        query: &str,
        params: &Params,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, DispatchError> {
        let map_err = |e: rusqlite::Error| self.map_error(e);
        self.run_call(Some(cancel), |conn| {
            let mut stmt = conn.prepare_cached(query).map_err(map_err)?;
            run_statement(conn, &mut stmt, params, &map_err)
        })
    }

    fn interrupt(&self, cancel: &CancellationToken) {
        // picked up by the progress handler only while this call holds the connection
        cancel.cancel();
    }

    fn set_query_timeout(&self, timeout_ms: u64) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::closed("SQLite connection"));
        }
        self.monitor.set_timeout_ms(timeout_ms);
        Ok(())
    }

    fn set_max_threads(&self, limit: usize) -> Result<(), DispatchError> {
        if limit == 0 {
            return Ok(());
        }
        let threads = i64::try_from(limit).unwrap_or(i64::MAX);
        let map_err = |e: rusqlite::Error| self.map_error(e);
        self.with_connection(|conn| {
            conn.pragma_update_and_check(None, "threads", threads, |_| Ok(()))
                .map_err(map_err)
        })
    }

    fn close(&self) -> Result<(), DispatchError> {
        self.closed.store(true, Ordering::Release);
        let Some(conn) = self.lock().take() else {
            return Ok(());
        };
        conn.close()
            .map_err(|(_, e)| connection_error("close", &e))
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("timeout_ms", &self.monitor.timeout_ms())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

fn connection_error(ctx: &str, err: &rusqlite::Error) -> DispatchError {
    DispatchError::ConnectionError(format!("SQLite {ctx} failed: {err}"))
}

/// State polled by the progress handler for the call holding the connection: its
/// deadline and its cancel token.
///
/// Times are milliseconds since `origin`; a deadline of 0 means unarmed.
struct CallMonitor {
    origin: Instant,
    timeout_ms: AtomicU64,
    deadline_ms: AtomicU64,
    expired: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl CallMonitor {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            timeout_ms: AtomicU64::new(0),
            deadline_ms: AtomicU64::new(0),
            expired: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Acquire)
    }

    fn set_timeout_ms(&self, timeout_ms: u64) {
        self.timeout_ms.store(timeout_ms, Ordering::Release);
    }

    fn active_cancel(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        match self.cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn arm(&self, cancel: Option<&CancellationToken>) {
        self.expired.store(false, Ordering::Release);
        *self.active_cancel() = cancel.cloned();
        let timeout = self.timeout_ms();
        let deadline = if timeout == 0 {
            0
        } else {
            self.now_ms().saturating_add(timeout).max(1)
        };
        self.deadline_ms.store(deadline, Ordering::Release);
    }

    fn disarm(&self) {
        self.deadline_ms.store(0, Ordering::Release);
        *self.active_cancel() = None;
    }

    fn expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    /// Progress-handler body: returning true aborts the running statement.
    fn should_abort(&self) -> bool {
        let deadline = self.deadline_ms.load(Ordering::Acquire);
        if deadline != 0 && self.now_ms() >= deadline {
            self.expired.store(true, Ordering::Release);
            return true;
        }
        self.active_cancel()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}
