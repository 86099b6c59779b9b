#![allow(dead_code)]

use std::time::{Duration, Instant};

use sql_dispatcher::prelude::*;

/// Route dispatcher logs through the test harness; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for every slot counter to drain back to zero.
pub async fn wait_for_idle<E: Engine>(dispatcher: &Dispatcher<E>) -> Vec<usize> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let counts = dispatcher.outstanding();
        if counts.iter().all(|&c| c == 0) || Instant::now() >= deadline {
            return counts;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// The single integer of a one-row, one-column result.
pub fn scalar(result: QueryResult) -> i64 {
    let set = result.single().expect("expected one result set");
    let row = set.first_row().expect("expected one row");
    *row[0].as_int().expect("expected an integer")
}
