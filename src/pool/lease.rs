use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::load::LoadTable;

/// One counted unit of load on a slot.
///
/// The increment happened when the lease was created; the matching decrement happens
/// exactly once, on the first of [`release`](SlotLease::release) or drop.
pub struct SlotLease {
    table: Arc<LoadTable>,
    index: usize,
    released: AtomicBool,
}

impl SlotLease {
    pub(crate) fn new(table: Arc<LoadTable>, index: usize) -> Self {
        Self {
            table,
            index,
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Decrement the slot counter; later calls do nothing.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        // index was validated when the lease was issued
        let _ = self.table.decrement(self.index);
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLease")
            .field("index", &self.index)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_then_drop_decrements_once() {
        let table = Arc::new(LoadTable::new(2));
        table.increment(1).unwrap();
        table.increment(1).unwrap();
        let lease = SlotLease::new(Arc::clone(&table), 1);
        lease.release();
        lease.release();
        drop(lease);
        assert_eq!(table.snapshot(), vec![0, 1]);
        assert_eq!(table.underflows(), 0);
    }

    #[test]
    fn shared_lease_released_from_either_side() {
        let table = Arc::new(LoadTable::new(1));
        table.increment(0).unwrap();
        let lease = Arc::new(SlotLease::new(Arc::clone(&table), 0));
        let worker_side = Arc::clone(&lease);
        std::thread::spawn(move || worker_side.release())
            .join()
            .unwrap();
        lease.release();
        drop(lease);
        assert_eq!(table.count(0), 0);
        assert_eq!(table.underflows(), 0);
    }
}
