//! Core collector traits and types.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::prometheus::{DecodeError, ModelError, QueryResult, Vector};

/// Errors that can occur during collection.
///
/// Every variant is local to the task that produced it: it is logged and the
/// round carries on. Only [`CollectorError::Config`] is raised at startup.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Transport-level failure talking to the backend.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status without a usable API error body.
    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// The backend answered with an error envelope or a malformed result.
    #[error("bad response: {0}")]
    Model(#[from] ModelError),

    /// Response body was not valid JSON.
    #[error("decode error: {0}")]
    Decode(String),

    /// Federation payload could not be decoded.
    #[error("federation decode failed: {0}")]
    Exposition(#[from] DecodeError),

    /// The query evaluated to no data.
    #[error("query {query:?} returned value of type none")]
    NoData { query: String },

    /// A named query failed.
    #[error("query {query} returned an error from Prometheus: {source}")]
    QueryFailed {
        query: String,
        #[source]
        source: Box<CollectorError>,
    },

    /// The round was cancelled before the call finished.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
}

impl CollectorError {
    /// Whether this error only reflects a cancellation.
    ///
    /// Cancellation is expected during shutdown and is not logged as a warning.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::QueryFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Instant-query capability of the backend.
#[async_trait::async_trait]
pub trait QueryApi: Send + Sync + 'static {
    /// Evaluate `expr` at `time`.
    ///
    /// Must return [`CollectorError::Cancelled`] promptly once `cancel` fires.
    async fn query(
        &self,
        expr: &str,
        time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, CollectorError>;
}

/// Federation capability of the backend.
#[async_trait::async_trait]
pub trait FederationSource: Send + Sync + 'static {
    /// Pull every series matching `matchers`, one vector per metric family.
    async fn federate(
        &self,
        matchers: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vector>, CollectorError>;
}

/// Race `fut` against `cancel`.
///
/// Cancellation wins ties, so an already-cancelled token never starts work.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, CollectorError>
where
    F: Future<Output = Result<T, CollectorError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CollectorError::Cancelled),
        res = fut => res,
    }
}
