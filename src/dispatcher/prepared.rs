use std::sync::Arc;

/// A statement compiled on one pooled connection.
///
/// The handle stays bound to the slot that compiled it: the compiled plan lives in that
/// connection's statement cache, so every execution is routed back there.
#[derive(Debug, Clone)]
pub struct PreparedHandle {
    statement: Arc<str>,
    slot_index: usize,
    owner: u64,
}

impl PreparedHandle {
    pub(crate) fn new(statement: Arc<str>, slot_index: usize, owner: u64) -> Self {
        Self {
            statement,
            slot_index,
            owner,
        }
    }

    /// Query text, also the key into the connection's statement cache.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.statement
    }

    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }
}

/// What `execute` runs: raw query text, or a prepared handle with fixed slot affinity.
#[derive(Debug, Clone)]
pub enum QueryRequest {
    Raw(String),
    Prepared(PreparedHandle),
}

impl From<&str> for QueryRequest {
    fn from(query: &str) -> Self {
        QueryRequest::Raw(query.to_owned())
    }
}

impl From<String> for QueryRequest {
    fn from(query: String) -> Self {
        QueryRequest::Raw(query)
    }
}

impl From<&String> for QueryRequest {
    fn from(query: &String) -> Self {
        QueryRequest::Raw(query.clone())
    }
}

impl From<PreparedHandle> for QueryRequest {
    fn from(handle: PreparedHandle) -> Self {
        QueryRequest::Prepared(handle)
    }
}

impl From<&PreparedHandle> for QueryRequest {
    fn from(handle: &PreparedHandle) -> Self {
        QueryRequest::Prepared(handle.clone())
    }
}
