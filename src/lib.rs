//! Async query dispatch over a fixed pool of blocking embedded-database connections.
//!
//! Callers hand a query to a [`Dispatcher`], which picks the connection with the fewest
//! outstanding tasks, runs the blocking engine call on a worker thread, and resolves a
//! [`QueryTask`] future with the result. Prepared handles always run on the connection
//! that compiled them.

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod types;
pub mod worker;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use dispatcher::{
    Dispatcher, DispatcherOptions, DispatcherOptionsBuilder, PreparedHandle, QueryRequest,
    QueryTask, TaskState,
};
pub use engine::{Engine, EngineConnection};
pub use error::DispatchError;
pub use pool::{ConnectionPool, PooledConnection, SlotLease};
pub use results::{QueryResult, ResultSet, Row};
pub use types::{Params, Value};

#[cfg(feature = "sqlite")]
pub use engine::sqlite::{SqliteConnection, SqliteEngine, SqliteOptions, SqliteOptionsBuilder};

pub use tokio_util::sync::CancellationToken;
