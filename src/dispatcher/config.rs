use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::DispatchError;

use super::Dispatcher;

/// Options for building a [`Dispatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherOptions {
    /// Number of pooled engine connections
    pub pool_size: usize,
    /// Threads one query may use inside the engine; 0 keeps the engine default
    pub per_query_thread_limit: usize,
    /// Worker threads running blocking calls; defaults to `pool_size`
    pub worker_threads: Option<usize>,
    /// Per-query timeout broadcast at startup; 0 disables it
    pub query_timeout_ms: u64,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            pool_size: 4,
            per_query_thread_limit: 0,
            worker_threads: None,
            query_timeout_ms: 0,
        }
    }
}

impl DispatcherOptions {
    /// Parse options from JSON; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `DispatchError::ConfigError` for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, DispatchError> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn worker_capacity(&self) -> usize {
        self.worker_threads.unwrap_or(self.pool_size)
    }

    #[must_use]
    pub fn builder() -> DispatcherOptionsBuilder {
        DispatcherOptionsBuilder::default()
    }
}

/// Fluent builder for dispatcher options.
#[derive(Debug, Clone, Default)]
pub struct DispatcherOptionsBuilder {
    opts: DispatcherOptions,
}

impl DispatcherOptionsBuilder {
    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.opts.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn per_query_thread_limit(mut self, limit: usize) -> Self {
        self.opts.per_query_thread_limit = limit;
        self
    }

    #[must_use]
    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.opts.worker_threads = Some(worker_threads);
        self
    }

    #[must_use]
    pub fn query_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.opts.query_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn finish(self) -> DispatcherOptions {
        self.opts
    }

    /// Open the pool and start the workers.
    ///
    /// # Errors
    /// Returns `DispatchError` if the pool or the worker pool cannot be created.
    pub fn build<E: Engine>(self, engine: E) -> Result<Dispatcher<E>, DispatchError> {
        Dispatcher::with_options(engine, self.finish())
    }
}
