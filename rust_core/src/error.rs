//! Error types shared across the engine.

use std::time::Duration;
use thiserror::Error;

/// Failures reported by the chat transport collaborator.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport signalled a quota/rate limit; stop calling it for a while
    #[error("transport quota exceeded (retry after {retry_after:?})")]
    QuotaExceeded { retry_after: Option<Duration> },
    #[error("transport request failed: {0}")]
    Http(String),
    #[error("transport protocol error: {0}")]
    Protocol(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl TransportError {
    pub fn is_quota(&self) -> bool {
        matches!(self, TransportError::QuotaExceeded { .. })
    }
}

/// Errors that abort a poll invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("store error: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl EngineError {
    pub fn store(err: anyhow::Error) -> Self {
        EngineError::Store(err)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
