// Connection pool - fixed slots, least-loaded selection, counted leases
//
// - load: lock-guarded outstanding-task counters
// - lease: RAII guard pairing each increment with exactly one decrement
// - slot: one engine connection plus its counter
// - connection: manual borrow handle for synchronous use

mod connection;
mod lease;
mod load;
mod slot;

pub use connection::PooledConnection;
pub use lease::SlotLease;
pub use slot::ConnectionSlot;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::engine::{Engine, EngineConnection};
use crate::error::DispatchError;

use load::LoadTable;

/// Fixed-size set of engine connections opened against one database.
///
/// The slot array never changes after construction. Counters track load for selection
/// only; they do not give a task exclusive use of its connection.
pub struct ConnectionPool<E: Engine> {
    engine: E,
    slots: Vec<ConnectionSlot<E::Connection>>,
    load: Arc<LoadTable>,
    timeout_ms: AtomicU64,
    connections_closed: AtomicBool,
}

impl<E: Engine> ConnectionPool<E> {
    /// Open `size` connections and apply `per_query_thread_limit` to each.
    ///
    /// # Errors
    /// Returns `DispatchError::ConfigError` when `size` is zero, or the first error raised
    /// while opening or configuring a connection. Connections opened before the failure are
    /// closed first.
    pub fn new(engine: E, size: usize, per_query_thread_limit: usize) -> Result<Self, DispatchError> {
        if size < 1 {
            return Err(DispatchError::ConfigError(
                "connection pool size must be at least 1".into(),
            ));
        }

        let load = Arc::new(LoadTable::new(size));
        let mut slots = Vec::with_capacity(size);
        for index in 0..size {
            let opened = engine.connect().and_then(|conn| {
                match conn.set_max_threads(per_query_thread_limit) {
                    Ok(()) => Ok(conn),
                    Err(err) => {
                        let _ = conn.close();
                        Err(err)
                    }
                }
            });
            match opened {
                Ok(conn) => slots.push(ConnectionSlot::new(index, conn, Arc::clone(&load))),
                Err(err) => {
                    close_all(&slots);
                    return Err(err);
                }
            }
        }

        tracing::info!(size, per_query_thread_limit, "connection pool opened");
        Ok(Self {
            engine,
            slots,
            load,
            timeout_ms: AtomicU64::new(0),
            connections_closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn slots(&self) -> &[ConnectionSlot<E::Connection>] {
        &self.slots
    }

    /// # Errors
    /// Returns `DispatchError::ResourceError` for an index outside the pool.
    pub fn slot(&self, index: usize) -> Result<&ConnectionSlot<E::Connection>, DispatchError> {
        self.slots.get(index).ok_or_else(|| {
            DispatchError::ResourceError(format!(
                "slot {index} out of range for pool of {}",
                self.slots.len()
            ))
        })
    }

    /// Least-loaded slot, lowest index on ties, counted before the lock is released.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` once the pool is closed.
    pub fn select_and_increment(&self) -> Result<usize, DispatchError> {
        let index = self.load.select_and_increment()?;
        tracing::debug!(slot = index, "selected least-loaded slot");
        Ok(index)
    }

    /// Count one more task against a specific slot.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` once the pool is closed or for a bad index.
    pub fn increment(&self, index: usize) -> Result<(), DispatchError> {
        self.load.increment(index)
    }

    /// Count one task off a slot. A counter already at zero stays at zero.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` for an index outside the pool.
    pub fn decrement(&self, index: usize) -> Result<(), DispatchError> {
        self.load.decrement(index)
    }

    /// Select a slot and wrap the increment in a lease.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` once the pool is closed.
    pub fn lease(&self) -> Result<SlotLease, DispatchError> {
        let index = self.select_and_increment()?;
        Ok(SlotLease::new(Arc::clone(&self.load), index))
    }

    /// Lease a specific slot, skipping selection.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` once the pool is closed or for a bad index.
    pub fn lease_slot(&self, index: usize) -> Result<SlotLease, DispatchError> {
        self.increment(index)?;
        Ok(SlotLease::new(Arc::clone(&self.load), index))
    }

    /// Manual borrow: select a slot and hand out its connection.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` once the pool is closed.
    pub fn acquire(&self) -> Result<(Arc<E::Connection>, usize), DispatchError> {
        let index = self.select_and_increment()?;
        Ok((Arc::clone(self.slots[index].connection()), index))
    }

    /// Return a manual borrow by slot index. Ownership is not checked.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` for an index outside the pool.
    pub fn release(&self, index: usize) -> Result<(), DispatchError> {
        self.decrement(index)
    }

    /// Manual borrow wrapped so it is returned on drop.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` once the pool is closed.
    pub fn acquire_scoped(&self) -> Result<PooledConnection<E::Connection>, DispatchError> {
        let lease = self.lease()?;
        let connection = Arc::clone(self.slots[lease.index()].connection());
        Ok(PooledConnection::new(connection, lease))
    }

    /// Broadcast a per-query timeout to every connection; 0 disables it.
    ///
    /// Every connection is attempted; connections that accepted the value keep it even when
    /// another one fails.
    ///
    /// # Errors
    /// Returns `DispatchError::ResourceError` once the pool is closed, otherwise the first
    /// connection error.
    pub fn set_query_timeout(&self, timeout_ms: u64) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::closed("connection pool"));
        }
        self.timeout_ms.store(timeout_ms, Ordering::Release);
        let mut first_err = None;
        for slot in &self.slots {
            if let Err(err) = slot.connection().set_query_timeout(timeout_ms) {
                tracing::warn!(slot = slot.index(), error = %err, "failed to set query timeout");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    #[must_use]
    pub fn query_timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Acquire)
    }

    /// Snapshot of every slot's outstanding counter.
    #[must_use]
    pub fn outstanding(&self) -> Vec<usize> {
        self.load.snapshot()
    }

    /// Decrements that found a counter already at zero.
    #[must_use]
    pub fn underflow_count(&self) -> usize {
        self.load.underflows()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.load.is_closed()
    }

    /// Stop handing out slots without touching the connections.
    pub(crate) fn mark_closed(&self) {
        self.load.close();
    }

    /// Close every connection; later selections fail. Safe to call more than once.
    pub fn close(&self) {
        self.mark_closed();
        if self.connections_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        close_all(&self.slots);
        tracing::info!(size = self.slots.len(), "connection pool closed");
    }
}

impl<E: Engine> Drop for ConnectionPool<E> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<E: Engine> fmt::Debug for ConnectionPool<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.slots.len())
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn close_all<C: EngineConnection>(slots: &[ConnectionSlot<C>]) {
    for slot in slots {
        if let Err(err) = slot.connection().close() {
            tracing::warn!(slot = slot.index(), error = %err, "failed to close connection");
        }
    }
}
