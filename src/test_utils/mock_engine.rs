use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, EngineConnection};
use crate::error::DispatchError;
use crate::results::ResultSet;
use crate::types::{Params, Value};

/// In-process engine with a tiny statement language:
///
/// - `RETURN 5`, `RETURN 'text'`, `RETURN $name` return one row with one column
/// - `SLEEP 200` blocks for 200ms, checking its call's cancel token and the timeout every millisecond
/// - `FAIL message` fails with a query error
///
/// Statements separated by `;` run in order, one result set each. Every connection keeps
/// counters in a [`MockStats`] the test can inspect after the dispatcher has taken
/// ownership of the engine.
#[derive(Clone, Debug, Default)]
pub struct MockEngine {
    inner: Arc<MockDatabase>,
}

#[derive(Debug, Default)]
struct MockDatabase {
    connections: Mutex<Vec<Arc<MockStats>>>,
    fail_connect_at: Option<usize>,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose `n`th connect (0-based) fails.
    #[must_use]
    pub fn failing_at(n: usize) -> Self {
        Self {
            inner: Arc::new(MockDatabase {
                connections: Mutex::new(Vec::new()),
                fail_connect_at: Some(n),
            }),
        }
    }

    /// Stats of every connection opened so far, in open order.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<MockStats>> {
        lock(&self.inner.connections).clone()
    }

    /// # Panics
    /// Panics if fewer than `index + 1` connections were opened.
    #[must_use]
    pub fn stats(&self, index: usize) -> Arc<MockStats> {
        Arc::clone(&lock(&self.inner.connections)[index])
    }
}

impl Engine for MockEngine {
    type Connection = MockConnection;

    fn connect(&self) -> Result<MockConnection, DispatchError> {
        let mut connections = lock(&self.inner.connections);
        let id = connections.len();
        if self.inner.fail_connect_at == Some(id) {
            return Err(DispatchError::ConnectionError(format!(
                "mock connection {id} refused"
            )));
        }
        let stats = Arc::new(MockStats::new(id));
        connections.push(Arc::clone(&stats));
        Ok(MockConnection {
            stats,
            closed: AtomicBool::new(false),
        })
    }
}

/// Counters for one mock connection.
#[derive(Debug)]
pub struct MockStats {
    id: usize,
    executions: AtomicUsize,
    prepared_executions: AtomicUsize,
    interrupts: AtomicUsize,
    closes: AtomicUsize,
    timeout_ms: AtomicU64,
    max_threads: AtomicUsize,
    prepared: Mutex<HashSet<String>>,
}

impl MockStats {
    fn new(id: usize) -> Self {
        Self {
            id,
            executions: AtomicUsize::new(0),
            prepared_executions: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            timeout_ms: AtomicU64::new(0),
            max_threads: AtomicUsize::new(0),
            prepared: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Raw and prepared executions started on this connection.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn prepared_executions(&self) -> usize {
        self.prepared_executions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.max_threads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_prepared(&self, query: &str) -> bool {
        lock(&self.prepared).contains(query.trim())
    }
}

/// Connection handed out by [`MockEngine`].
#[derive(Debug)]
pub struct MockConnection {
    stats: Arc<MockStats>,
    closed: AtomicBool,
}

impl MockConnection {
    #[must_use]
    pub fn stats(&self) -> &Arc<MockStats> {
        &self.stats
    }

    fn ensure_open(&self) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DispatchError::closed("mock connection"))
        } else {
            Ok(())
        }
    }

    fn run(
        &self,
        statement: &str,
        params: &Params,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, DispatchError> {
        if cancel.is_cancelled() {
            return Err(DispatchError::CancelledError);
        }
        match parse(statement)? {
            Statement::Return(expr) => {
                let value = if expr.starts_with('$') {
                    params.lookup(Some(expr), 1)?.clone()
                } else {
                    literal(expr)?
                };
                let mut set = ResultSet::with_columns(vec![expr.to_owned()]);
                set.add_row_values(vec![value]);
                Ok(set)
            }
            Statement::Sleep(ms) => {
                self.sleep(ms, cancel)?;
                let mut set = ResultSet::with_columns(vec!["slept".into()]);
                set.add_row_values(vec![Value::Int(i64::try_from(ms).unwrap_or(i64::MAX))]);
                Ok(set)
            }
            Statement::Fail(message) => Err(DispatchError::QueryError(message.to_owned())),
        }
    }

    fn sleep(&self, ms: u64, cancel: &CancellationToken) -> Result<(), DispatchError> {
        let started = Instant::now();
        let timeout = self.stats.timeout_ms();
        loop {
            if cancel.is_cancelled() {
                return Err(DispatchError::CancelledError);
            }
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            if timeout > 0 && elapsed >= timeout {
                return Err(DispatchError::TimeoutError(format!(
                    "query exceeded {timeout}ms"
                )));
            }
            if elapsed >= ms {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl EngineConnection for MockConnection {
    fn execute(
        &self,
        query: &str,
        params: &Params,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultSet>, DispatchError> {
        self.ensure_open()?;
        self.stats.executions.fetch_add(1, Ordering::SeqCst);
        let statements: Vec<&str> = split_statements(query).collect();
        if statements.is_empty() {
            return Err(DispatchError::QueryError("query is empty".into()));
        }
        statements
            .into_iter()
            .map(|statement| self.run(statement, params, cancel))
            .collect()
    }

    fn prepare(&self, query: &str) -> Result<(), DispatchError> {
        self.ensure_open()?;
        let mut statements = split_statements(query);
        let (Some(statement), None) = (statements.next(), statements.next()) else {
            return Err(DispatchError::QueryError(
                "prepare expects exactly one statement".into(),
            ));
        };
        parse(statement)?;
        lock(&self.stats.prepared).insert(statement.to_owned());
        Ok(())
    }

    fn execute_prepared(
        &self,
        query: &str,
        params: &Params,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, DispatchError> {
        self.ensure_open()?;
        if !self.stats.is_prepared(query) {
            return Err(DispatchError::QueryError(format!(
                "statement was not prepared on connection {}",
                self.stats.id
            )));
        }
        self.stats.executions.fetch_add(1, Ordering::SeqCst);
        self.stats.prepared_executions.fetch_add(1, Ordering::SeqCst);
        self.run(query.trim(), params, cancel)
    }

    fn interrupt(&self, cancel: &CancellationToken) {
        self.stats.interrupts.fetch_add(1, Ordering::SeqCst);
        cancel.cancel();
    }

    fn set_query_timeout(&self, timeout_ms: u64) -> Result<(), DispatchError> {
        self.ensure_open()?;
        self.stats.timeout_ms.store(timeout_ms, Ordering::SeqCst);
        Ok(())
    }

    fn set_max_threads(&self, limit: usize) -> Result<(), DispatchError> {
        self.ensure_open()?;
        self.stats.max_threads.store(limit, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), DispatchError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

enum Statement<'a> {
    Return(&'a str),
    Sleep(u64),
    Fail(&'a str),
}

fn split_statements(query: &str) -> impl Iterator<Item = &str> {
    query.split(';').map(str::trim).filter(|s| !s.is_empty())
}

fn parse(statement: &str) -> Result<Statement<'_>, DispatchError> {
    let (keyword, rest) = statement
        .split_once(char::is_whitespace)
        .map_or((statement, ""), |(k, r)| (k, r.trim()));
    match keyword.to_ascii_uppercase().as_str() {
        "RETURN" if !rest.is_empty() => Ok(Statement::Return(rest)),
        "SLEEP" => rest
            .parse()
            .map(Statement::Sleep)
            .map_err(|_| DispatchError::QueryError(format!("bad SLEEP duration {rest:?}"))),
        "FAIL" => Ok(Statement::Fail(rest)),
        _ => Err(DispatchError::QueryError(format!(
            "cannot parse statement {statement:?}"
        ))),
    }
}

fn literal(expr: &str) -> Result<Value, DispatchError> {
    if let Ok(i) = expr.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Some(text) = expr.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Ok(Value::Text(text.to_owned()));
    }
    Err(DispatchError::QueryError(format!("cannot evaluate {expr:?}")))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
