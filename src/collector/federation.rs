//! Federation pass: pull matching series and publish one event per sample.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::collector::{CollectorError, FederationSource};
use crate::normalize::Normalizer;
use crate::sink::Sink;

/// Runs the federation half of a round.
#[derive(Clone)]
pub struct FederationPass {
    source: Arc<dyn FederationSource>,
    matchers: Arc<[String]>,
    normalizer: Normalizer,
    sink: Arc<dyn Sink>,
}

impl std::fmt::Debug for FederationPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationPass")
            .field("matchers", &self.matchers)
            .finish_non_exhaustive()
    }
}

impl FederationPass {
    pub fn new(
        source: Arc<dyn FederationSource>,
        matchers: Vec<String>,
        normalizer: Normalizer,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            source,
            matchers: matchers.into(),
            normalizer,
            sink,
        }
    }

    /// Fetch, normalize and publish.
    ///
    /// A fetch or decode failure skips the whole pass: no vector from a
    /// failed fetch is published.
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<usize, CollectorError> {
        let vectors = self.source.federate(&self.matchers, cancel).await?;

        if cancel.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }

        let mut sent = 0;
        for vector in vectors {
            for event in self.normalizer.normalize_federated(vector) {
                self.sink.publish(event);
                sent += 1;
            }
        }

        tracing::info!(events = sent, "Sent events for federation");
        Ok(sent)
    }
}
