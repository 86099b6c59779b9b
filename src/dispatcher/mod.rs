// Dispatcher - async facade over the connection pool and worker pool
//
// - config: options and builder
// - prepared: prepared handles and the raw/prepared request variant
// - task: per-request state machine and the `QueryTask` future

pub mod config;
pub mod prepared;
pub mod task;

pub use config::{DispatcherOptions, DispatcherOptionsBuilder};
pub use prepared::{PreparedHandle, QueryRequest};
pub use task::{QueryTask, TaskState};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, EngineConnection};
use crate::error::DispatchError;
use crate::pool::{ConnectionPool, PooledConnection, SlotLease};
use crate::results::QueryResult;
use crate::types::Params;
use crate::worker::WorkerPool;

use task::TaskCell;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Runs queries from async code on a fixed pool of blocking engine connections.
///
/// Raw queries go to the least-loaded connection; prepared handles always go back to the
/// connection that compiled them. Blocking engine calls run on a dedicated worker pool, so
/// awaiting a query never blocks the caller's runtime thread.
///
/// ```rust,no_run
/// use sql_dispatcher::prelude::*;
///
/// # async fn demo() -> Result<(), DispatchError> {
/// let dispatcher = Dispatcher::new(SqliteEngine::memory("demo"), 4, 0)?;
/// let result = dispatcher
///     .execute("SELECT $n * 2", Params::new().bind("n", 21))
///     .await?;
/// let rows = result.single().map(ResultSet::into_values);
/// assert_eq!(rows, Some(vec![vec![Value::Int(42)]]));
/// dispatcher.close();
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher<E: Engine> {
    id: u64,
    pool: ConnectionPool<E>,
    workers: WorkerPool,
    closed: AtomicBool,
}

impl<E: Engine> Dispatcher<E> {
    /// Open `pool_size` connections on `engine` with one worker thread per connection.
    ///
    /// # Errors
    /// Returns `DispatchError::ConfigError` when `pool_size` is zero, or the first error
    /// raised while opening a connection.
    pub fn new(engine: E, pool_size: usize, per_query_thread_limit: usize) -> Result<Self, DispatchError> {
        Self::with_options(
            engine,
            DispatcherOptions {
                pool_size,
                per_query_thread_limit,
                ..DispatcherOptions::default()
            },
        )
    }

    /// # Errors
    /// Returns `DispatchError` if the pool or the worker pool cannot be created, or if the
    /// configured query timeout cannot be applied.
    pub fn with_options(engine: E, options: DispatcherOptions) -> Result<Self, DispatchError> {
        let pool = ConnectionPool::new(engine, options.pool_size, options.per_query_thread_limit)?;
        let workers = WorkerPool::new(options.worker_capacity())?;
        if options.query_timeout_ms > 0 {
            pool.set_query_timeout(options.query_timeout_ms)?;
        }
        let id = NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            dispatcher = id,
            pool_size = pool.size(),
            workers = workers.capacity(),
            "dispatcher started"
        );
        Ok(Self {
            id,
            pool,
            workers,
            closed: AtomicBool::new(false),
        })
    }

    /// Dispatch a request and return its task without waiting for it.
    ///
    /// Parameters are validated before any slot is touched.
    ///
    /// # Errors
    /// Returns `DispatchError::ParameterError` for invalid parameters and
    /// `DispatchError::ResourceError` after [`close`](Dispatcher::close) or for a prepared
    /// handle created by another dispatcher.
    pub fn spawn(
        &self,
        request: impl Into<QueryRequest>,
        params: Params,
    ) -> Result<QueryTask<QueryResult>, DispatchError> {
        let request = request.into();
        params.validate()?;
        self.ensure_open()?;
        let lease = match &request {
            QueryRequest::Raw(_) => self.pool.lease()?,
            QueryRequest::Prepared(handle) => {
                if handle.owner() != self.id {
                    return Err(DispatchError::ResourceError(
                        "prepared handle belongs to another dispatcher".into(),
                    ));
                }
                self.pool.lease_slot(handle.slot_index())?
            }
        };
        self.submit(lease, move |conn, _, cancel| match request {
            QueryRequest::Raw(query) => conn
                .execute(&query, &params, cancel)
                .map(QueryResult::from_sets),
            QueryRequest::Prepared(handle) => conn
                .execute_prepared(handle.sql(), &params, cancel)
                .map(QueryResult::Single),
        })
    }

    /// Run a raw query or a prepared handle and wait for its results.
    ///
    /// Multi-statement text resolves to [`QueryResult::Multiple`] in statement order.
    /// Dropping the returned future cancels the query.
    ///
    /// # Errors
    /// Returns the engine's `QueryError`/`TimeoutError`, plus the errors of
    /// [`spawn`](Dispatcher::spawn).
    pub async fn execute(
        &self,
        request: impl Into<QueryRequest>,
        params: Params,
    ) -> Result<QueryResult, DispatchError> {
        self.spawn(request, params)?.await
    }

    /// Like [`execute`](Dispatcher::execute), cancelled when `cancel` fires.
    ///
    /// # Errors
    /// Returns `DispatchError::CancelledError` if the token fires before the query
    /// resolves, otherwise as [`execute`](Dispatcher::execute).
    pub async fn execute_with_cancel(
        &self,
        request: impl Into<QueryRequest>,
        params: Params,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, DispatchError> {
        let mut task = self.spawn(request, params)?;
        tokio::select! {
            biased;
            result = &mut task => result,
            () = cancel.cancelled() => {
                task.cancel();
                task.await
            }
        }
    }

    /// Compile `query` on the least-loaded connection without waiting for it.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` after [`close`](Dispatcher::close).
    pub fn spawn_prepare(&self, query: &str) -> Result<QueryTask<PreparedHandle>, DispatchError> {
        self.ensure_open()?;
        let lease = self.pool.lease()?;
        let statement: Arc<str> = Arc::from(query);
        let owner = self.id;
        self.submit(lease, move |conn, slot_index, _| {
            conn.prepare(&statement)?;
            Ok(PreparedHandle::new(statement, slot_index, owner))
        })
    }

    /// Compile `query` and return a handle bound to the connection that compiled it.
    ///
    /// # Errors
    /// Returns the engine's `QueryError` if the statement does not compile, or
    /// `DispatchError::ResourceError` after [`close`](Dispatcher::close).
    pub async fn prepare(&self, query: &str) -> Result<PreparedHandle, DispatchError> {
        self.spawn_prepare(query)?.await
    }

    /// Borrow a pooled connection for synchronous use. The borrow counts as load on its
    /// slot until it is released or dropped.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` after [`close`](Dispatcher::close).
    pub fn acquire_connection(&self) -> Result<PooledConnection<E::Connection>, DispatchError> {
        self.ensure_open()?;
        self.pool.acquire_scoped()
    }

    /// Return a connection borrowed with [`acquire_connection`](Dispatcher::acquire_connection).
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` if the handle's slot is outside this pool.
    pub fn release_connection(
        &self,
        handle: PooledConnection<E::Connection>,
    ) -> Result<(), DispatchError> {
        self.pool.slot(handle.slot_index())?;
        handle.release();
        Ok(())
    }

    /// Broadcast a per-query timeout to every connection; 0 disables it.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` after [`close`](Dispatcher::close), or the
    /// first connection that rejected the value.
    pub fn set_query_timeout(&self, timeout_ms: u64) -> Result<(), DispatchError> {
        self.ensure_open()?;
        self.pool.set_query_timeout(timeout_ms)
    }

    /// Stop accepting work, wait for queued and running tasks, then close every connection.
    /// Closing again does nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.mark_closed();
        self.workers.shutdown(true);
        self.pool.close();
        tracing::info!(dispatcher = self.id, "dispatcher closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool<E> {
        &self.pool
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Snapshot of every slot's outstanding-task counter.
    #[must_use]
    pub fn outstanding(&self) -> Vec<usize> {
        self.pool.outstanding()
    }

    fn ensure_open(&self) -> Result<(), DispatchError> {
        if self.is_closed() {
            Err(DispatchError::closed("dispatcher"))
        } else {
            Ok(())
        }
    }

    /// Queue `call` on a worker against the lease's slot.
    ///
    /// The worker releases the lease after the engine call and before replying, so a
    /// resolved task has always been counted off its slot. `call` gets the task's own
    /// cancel token; cancelling the task touches nothing else on the connection.
    fn submit<T, F>(&self, lease: SlotLease, call: F) -> Result<QueryTask<T>, DispatchError>
    where
        F: FnOnce(&E::Connection, usize, &CancellationToken) -> Result<T, DispatchError>
            + Send
            + 'static,
        T: Send + 'static,
    {
        let slot_index = lease.index();
        let connection = Arc::clone(self.pool.slot(slot_index)?.connection());
        let lease = Arc::new(lease);
        let cell = Arc::new(TaskCell::new());
        let cancel = CancellationToken::new();

        let job_lease = Arc::clone(&lease);
        let job_cell = Arc::clone(&cell);
        let job_connection = Arc::clone(&connection);
        let job_cancel = cancel.clone();
        cell.mark_queued();
        let submitted = self.workers.submit(move || {
            if !job_cell.start() {
                return Err(DispatchError::CancelledError);
            }
            let result = call(&job_connection, slot_index, &job_cancel);
            job_cell.finish(&result);
            job_lease.release();
            result
        });
        let rx = match submitted {
            Ok(rx) => rx,
            Err(err) => {
                cell.abandon();
                return Err(err);
            }
        };

        tracing::debug!(dispatcher = self.id, slot = slot_index, "task queued");
        let interrupter: Arc<dyn EngineConnection> = connection;
        Ok(QueryTask::new(rx, cell, lease, interrupter, cancel))
    }
}

impl<E: Engine> Drop for Dispatcher<E> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<E: Engine> fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("workers", &self.workers)
            .field("closed", &self.is_closed())
            .finish()
    }
}
