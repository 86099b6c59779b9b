use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Query timeout: {0}")]
    TimeoutError(String),

    #[error("Query cancelled")]
    CancelledError,

    #[error("Resource error: {0}")]
    ResourceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl DispatchError {
    /// True for engine-reported failures, timeouts included.
    #[must_use]
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::QueryError(_) | Self::TimeoutError(_))
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutError(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::CancelledError)
    }

    #[must_use]
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Self::ResourceError(_))
    }

    pub(crate) fn closed(what: &str) -> Self {
        Self::ResourceError(format!("{what} is closed"))
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::ConfigError(format!("invalid options: {err}"))
    }
}
