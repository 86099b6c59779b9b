use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::DispatchError;

/// Outstanding-task counters for every slot, guarded by one pool-wide lock.
///
/// Selection compares all counters, so a per-slot lock would not help.
#[derive(Debug)]
pub(crate) struct LoadTable {
    state: Mutex<LoadState>,
    underflows: AtomicUsize,
}

#[derive(Debug)]
struct LoadState {
    counts: Vec<usize>,
    closed: bool,
}

impl LoadTable {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(LoadState {
                counts: vec![0; size],
                closed: false,
            }),
            underflows: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoadState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Pick the least-loaded slot (lowest index on ties) and count the new task against it
    /// without releasing the lock in between.
    pub(crate) fn select_and_increment(&self) -> Result<usize, DispatchError> {
        let mut state = self.lock();
        if state.closed {
            return Err(DispatchError::closed("connection pool"));
        }
        // min_by_key keeps the first of equal minima
        let (index, _) = state
            .counts
            .iter()
            .enumerate()
            .min_by_key(|(_, count)| **count)
            .ok_or_else(|| DispatchError::ResourceError("connection pool has no slots".into()))?;
        state.counts[index] += 1;
        Ok(index)
    }

    pub(crate) fn increment(&self, index: usize) -> Result<(), DispatchError> {
        let mut state = self.lock();
        if state.closed {
            return Err(DispatchError::closed("connection pool"));
        }
        let size = state.counts.len();
        let count = state
            .counts
            .get_mut(index)
            .ok_or_else(|| out_of_range(index, size))?;
        *count += 1;
        Ok(())
    }

    /// Decrement, clamping at zero. Works on a closed pool so in-flight tasks can finish.
    pub(crate) fn decrement(&self, index: usize) -> Result<(), DispatchError> {
        let mut state = self.lock();
        let size = state.counts.len();
        let count = state
            .counts
            .get_mut(index)
            .ok_or_else(|| out_of_range(index, size))?;
        if *count == 0 {
            self.underflows.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(slot = index, "outstanding counter already zero; decrement ignored");
        } else {
            *count -= 1;
        }
        Ok(())
    }

    /// Returns true for the call that actually closed the table.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.lock();
        !std::mem::replace(&mut state.closed, true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn snapshot(&self) -> Vec<usize> {
        self.lock().counts.clone()
    }

    pub(crate) fn count(&self, index: usize) -> usize {
        self.lock().counts.get(index).copied().unwrap_or(0)
    }

    pub(crate) fn underflows(&self) -> usize {
        self.underflows.load(Ordering::Relaxed)
    }
}

fn out_of_range(index: usize, size: usize) -> DispatchError {
    DispatchError::ResourceError(format!("slot {index} out of range for pool of {size}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_go_to_lowest_index() {
        let table = LoadTable::new(3);
        let picks: Vec<usize> = (0..6)
            .map(|_| table.select_and_increment().unwrap())
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
        table.decrement(1).unwrap();
        assert_eq!(table.select_and_increment().unwrap(), 1);
        assert_eq!(table.snapshot(), vec![2, 2, 2]);
    }

    #[test]
    fn decrement_clamps_at_zero() {
        let table = LoadTable::new(2);
        table.decrement(0).unwrap();
        assert_eq!(table.snapshot(), vec![0, 0]);
        assert_eq!(table.underflows(), 1);
        assert!(table.decrement(5).is_err());
    }

    #[test]
    fn closed_table_rejects_new_work_but_accepts_decrements() {
        let table = LoadTable::new(1);
        table.increment(0).unwrap();
        assert!(table.close());
        assert!(!table.close());
        assert!(matches!(
            table.select_and_increment(),
            Err(DispatchError::ResourceError(_))
        ));
        assert!(table.increment(0).is_err());
        table.decrement(0).unwrap();
        assert_eq!(table.count(0), 0);
    }

    #[test]
    fn concurrent_selection_spreads_evenly() {
        let table = std::sync::Arc::new(LoadTable::new(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = std::sync::Arc::clone(&table);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        table.select_and_increment().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        // no decrements in between, so every selection saw an exact minimum
        assert_eq!(table.snapshot(), vec![200, 200, 200, 200]);
    }
}
