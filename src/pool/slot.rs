use std::fmt;
use std::sync::Arc;

use super::load::LoadTable;

/// One pooled engine connection and its position in the load table.
pub struct ConnectionSlot<C> {
    index: usize,
    connection: Arc<C>,
    load: Arc<LoadTable>,
}

impl<C> ConnectionSlot<C> {
    pub(crate) fn new(index: usize, connection: C, load: Arc<LoadTable>) -> Self {
        Self {
            index,
            connection: Arc::new(connection),
            load,
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Tasks currently counted against this slot.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.load.count(self.index)
    }
}

impl<C> fmt::Debug for ConnectionSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("index", &self.index)
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}
