use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::lease::SlotLease;

/// A pooled connection borrowed for synchronous use outside the async dispatch path.
///
/// The borrow is counted against its slot like any dispatched task, so least-loaded
/// selection steers work away from it. Dropping the handle returns it.
pub struct PooledConnection<C> {
    connection: Arc<C>,
    lease: SlotLease,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(connection: Arc<C>, lease: SlotLease) -> Self {
        Self { connection, lease }
    }

    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.lease.index()
    }

    /// Shared handle to the underlying connection; it does not extend the borrow.
    #[must_use]
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Return the connection to the pool now instead of at drop.
    pub fn release(self) {
        self.lease.release();
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("slot_index", &self.slot_index())
            .finish_non_exhaustive()
    }
}
