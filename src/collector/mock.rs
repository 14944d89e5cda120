//! In-memory backend and sink doubles for collector tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

use crate::collector::{CollectorError, FederationSource, QueryApi, cancellable};
use crate::event::Event;
use crate::prometheus::{Labelset, METRIC_NAME_LABEL, QueryResult, Sample, Vector};
use crate::sink::Sink;

/// Scripted answer for one expression.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Result(QueryResult),
    Error(String),
}

/// Backend that answers from a script and records the call order.
#[derive(Default)]
pub(crate) struct MockBackend {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    federation: Option<Result<Vec<Vector>, String>>,
    federation_delay: Duration,
    federation_calls: Mutex<Vec<Vec<String>>>,
    log: Mutex<Vec<String>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(mut self, expr: &str, reply: Reply) -> Self {
        self.replies.insert(expr.to_string(), reply);
        self
    }

    pub(crate) fn delay(mut self, expr: &str, delay: Duration) -> Self {
        self.delays.insert(expr.to_string(), delay);
        self
    }

    pub(crate) fn federation(mut self, result: Result<Vec<Vector>, String>) -> Self {
        self.federation = Some(result);
        self
    }

    pub(crate) fn federation_delay(mut self, delay: Duration) -> Self {
        self.federation_delay = delay;
        self
    }

    /// `start:<expr>` / `end:<expr>` entries in call order.
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn query_calls(&self) -> usize {
        self.log().iter().filter(|e| e.starts_with("start:")).count()
    }

    pub(crate) fn federation_calls(&self) -> Vec<Vec<String>> {
        self.federation_calls.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait::async_trait]
impl QueryApi for MockBackend {
    async fn query(
        &self,
        expr: &str,
        _time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, CollectorError> {
        self.record(format!("start:{expr}"));
        let delay = self.delays.get(expr).copied().unwrap_or_default();
        let reply = self.replies.get(expr).cloned();

        let result = cancellable(cancel, async {
            tokio::time::sleep(delay).await;
            match reply {
                Some(Reply::Result(result)) => Ok(result),
                Some(Reply::Error(message)) => Err(CollectorError::Decode(message)),
                None => Ok(QueryResult::None),
            }
        })
        .await;

        self.record(format!("end:{expr}"));
        result
    }
}

#[async_trait::async_trait]
impl FederationSource for MockBackend {
    async fn federate(
        &self,
        matchers: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vector>, CollectorError> {
        self.federation_calls.lock().unwrap().push(matchers.to_vec());
        let scripted = self.federation.clone().unwrap_or_else(|| Ok(Vec::new()));
        let delay = self.federation_delay;

        cancellable(cancel, async {
            tokio::time::sleep(delay).await;
            scripted.map_err(CollectorError::Decode)
        })
        .await
    }
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<Event>>,
    closes: AtomicUsize,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Sink for RecordingSink {
    fn publish(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Layer counting WARN events seen on the current thread.
#[derive(Clone, Default)]
pub(crate) struct WarnCounter(Arc<AtomicUsize>);

impl WarnCounter {
    /// Install as the thread's default subscriber until the guard drops.
    pub(crate) fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(Registry::default().with(self.clone()))
    }

    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// One federated family: `count` samples of metric `name`.
pub(crate) fn federated_vector(name: &str, count: usize) -> Vector {
    (0..count)
        .map(|i| {
            let mut metric = Labelset::new();
            metric.insert(METRIC_NAME_LABEL.to_string(), name.to_string());
            metric.insert("instance".to_string(), format!("host-{i}"));
            Sample {
                metric,
                timestamp: None,
                value: i as f64,
            }
        })
        .collect()
}
