//! Query executor: one named query, evaluated now, normalized and published.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::collector::{CollectorError, QueryApi};
use crate::config::Query;
use crate::normalize::Normalizer;
use crate::sink::Sink;

/// Runs single queries against the backend.
///
/// Cheap to clone; every round task gets its own copy.
#[derive(Clone)]
pub struct QueryExecutor {
    api: Arc<dyn QueryApi>,
    normalizer: Normalizer,
    sink: Arc<dyn Sink>,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("normalizer", &self.normalizer)
            .finish_non_exhaustive()
    }
}

impl QueryExecutor {
    pub fn new(api: Arc<dyn QueryApi>, normalizer: Normalizer, sink: Arc<dyn Sink>) -> Self {
        Self {
            api,
            normalizer,
            sink,
        }
    }

    /// Evaluate `query` at the current wall-clock time and publish its events.
    ///
    /// Returns the number of events sent. Nothing is published once `cancel`
    /// has fired.
    ///
    /// # Errors
    /// - `CollectorError::Cancelled` if the round was cancelled
    /// - `CollectorError::QueryFailed` wrapping any backend failure
    /// - `CollectorError::NoData` if the query produced no result
    pub async fn execute(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<usize, CollectorError> {
        let result = match self.api.query(&query.query, Utc::now(), cancel).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                return Err(CollectorError::QueryFailed {
                    query: query.name.clone(),
                    source: Box::new(e),
                });
            }
        };

        let events = self.normalizer.normalize(&query.name, result)?;

        // Publishing never yields, so the batch goes out whole or not at all.
        if cancel.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }
        let sent = events.len();
        for event in events {
            self.sink.publish(event);
        }

        tracing::info!(query = %query.name, events = sent, "Sent events for query");
        Ok(sent)
    }
}
