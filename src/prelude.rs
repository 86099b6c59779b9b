//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to open a dispatcher, run queries
//! and read their results.

pub use crate::dispatcher::{
    Dispatcher, DispatcherOptions, PreparedHandle, QueryRequest, QueryTask, TaskState,
};
pub use crate::engine::{Engine, EngineConnection};
pub use crate::error::DispatchError;
pub use crate::pool::PooledConnection;
pub use crate::results::{QueryResult, ResultSet, Row};
pub use crate::types::{Params, Value};

#[cfg(feature = "sqlite")]
pub use crate::engine::sqlite::{SqliteEngine, SqliteOptions};

pub use tokio_util::sync::CancellationToken;
