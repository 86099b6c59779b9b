use crate::engine::Engine;
use crate::error::DispatchError;

use super::connection::SqliteConnection;

/// Options for opening pooled `SQLite` connections.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// File path, or the database name when `in_memory` is set
    pub db_path: String,
    /// Open a named shared-cache in-memory database instead of a file
    pub in_memory: bool,
    pub busy_timeout_ms: u64,
    /// Switch file databases to WAL on open
    pub wal: bool,
    pub statement_cache_capacity: usize,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            in_memory: false,
            busy_timeout_ms: 5_000,
            wal: true,
            statement_cache_capacity: 64,
        }
    }

    /// A shared-cache in-memory database; every pooled connection sees the same data.
    #[must_use]
    pub fn memory(name: &str) -> Self {
        Self {
            db_path: name.to_owned(),
            in_memory: true,
            wal: false,
            ..Self::new(String::new())
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// Location string handed to `sqlite3_open_v2`.
    #[must_use]
    pub fn uri(&self) -> String {
        if self.in_memory {
            format!("file:{}?mode=memory&cache=shared", self.db_path)
        } else {
            self.db_path.clone()
        }
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.opts.in_memory = in_memory;
        if in_memory {
            self.opts.wal = false;
        }
        self
    }

    #[must_use]
    pub fn busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.opts.busy_timeout_ms = busy_timeout_ms;
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.opts.statement_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    #[must_use]
    pub fn build(self) -> SqliteEngine {
        SqliteEngine::new(self.finish())
    }
}

/// `SQLite` database from which the dispatcher opens its pooled connections.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    options: SqliteOptions,
}

impl SqliteEngine {
    #[must_use]
    pub fn new(options: SqliteOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn builder(db_path: String) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    /// Shorthand for a named shared-cache in-memory database.
    #[must_use]
    pub fn memory(name: &str) -> Self {
        Self::new(SqliteOptions::memory(name))
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }
}

impl Engine for SqliteEngine {
    type Connection = SqliteConnection;

    fn connect(&self) -> Result<SqliteConnection, DispatchError> {
        SqliteConnection::open(&self.options)
    }
}
