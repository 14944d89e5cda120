//! Collection round: concurrent fan-out of every query plus federation,
//! joined before the round returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::collector::federation::FederationPass;
use crate::collector::query::QueryExecutor;
use crate::collector::{CollectorError, FederationSource, QueryApi};
use crate::config::Query;
use crate::normalize::Normalizer;
use crate::sink::Sink;

/// Task label used for the federation pass in logs.
const FEDERATION_TASK: &str = "federation";

/// Outcome of one collection round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    /// 1-based round counter.
    pub round: u64,
    /// Wall-clock time the round started.
    pub started_at: DateTime<Utc>,
    /// Events published by all tasks.
    pub events: usize,
    /// Tasks that ended with an error.
    pub failures: usize,
    /// Tasks that ended because the round was cancelled.
    pub cancelled: usize,
    /// Time from fan-out to join.
    pub elapsed: Duration,
}

/// Fans out one round of work and waits for all of it.
pub struct Coordinator {
    queries: Arc<[Query]>,
    executor: QueryExecutor,
    federation: Option<FederationPass>,
    rounds: AtomicU64,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("queries", &self.queries.len())
            .field("federation", &self.federation.is_some())
            .field("rounds", &self.rounds.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create a coordinator.
    ///
    /// With no `matchers` the federation pass is skipped entirely.
    pub fn new(
        queries: Vec<Query>,
        matchers: Vec<String>,
        api: Arc<dyn QueryApi>,
        federation: Arc<dyn FederationSource>,
        sink: Arc<dyn Sink>,
        normalizer: Normalizer,
    ) -> Self {
        let federation = (!matchers.is_empty()).then(|| {
            FederationPass::new(federation, matchers, normalizer.clone(), Arc::clone(&sink))
        });
        Self {
            queries: queries.into(),
            executor: QueryExecutor::new(api, normalizer, sink),
            federation,
            rounds: AtomicU64::new(0),
        }
    }

    /// Number of tasks one round spawns.
    pub fn task_count(&self) -> usize {
        self.queries.len() + usize::from(self.federation.is_some())
    }

    /// Rounds started so far.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Run one round under a child of `parent`.
    ///
    /// Returns only after every spawned task has finished. Task failures are
    /// logged and counted; they never end the round early. Dropping the
    /// returned future aborts the round's tasks and cancels its token.
    pub async fn run_round(&self, parent: &CancellationToken) -> RoundSummary {
        let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        let started_at = Utc::now();
        let start = tokio::time::Instant::now();

        let token = parent.child_token();
        let _guard = token.clone().drop_guard();

        let mut tasks: JoinSet<(String, Result<usize, CollectorError>)> = JoinSet::new();

        for query in self.queries.iter().cloned() {
            let executor = self.executor.clone();
            let token = token.clone();
            tasks.spawn(async move {
                let result = executor.execute(&query, &token).await;
                (query.name, result)
            });
        }

        if let Some(federation) = &self.federation {
            let federation = federation.clone();
            let token = token.clone();
            tasks.spawn(async move {
                let result = federation.execute(&token).await;
                (FEDERATION_TASK.to_string(), result)
            });
        }

        tracing::debug!(round, tasks = tasks.len(), "Round started");

        let mut summary = RoundSummary {
            round,
            started_at,
            events: 0,
            failures: 0,
            cancelled: 0,
            elapsed: Duration::ZERO,
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(sent))) => summary.events += sent,
                Ok((task, Err(e))) if e.is_cancelled() => {
                    tracing::debug!(round, task = %task, "Task cancelled");
                    summary.cancelled += 1;
                }
                Ok((task, Err(e))) => {
                    tracing::warn!(round, task = %task, error = %e, "Collection task failed");
                    summary.failures += 1;
                }
                Err(e) => {
                    tracing::error!(round, error = %e, "Collection task panicked");
                    summary.failures += 1;
                }
            }
        }

        summary.elapsed = start.elapsed();
        tracing::debug!(
            round,
            events = summary.events,
            failures = summary.failures,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Round complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockBackend, RecordingSink, Reply, WarnCounter, federated_vector};
    use crate::event::EventValue;
    use crate::prometheus::{Labelset, QueryResult, Sample};

    fn coordinator(
        queries: Vec<Query>,
        matchers: Vec<String>,
        backend: &Arc<MockBackend>,
        sink: &Arc<RecordingSink>,
    ) -> Coordinator {
        Coordinator::new(
            queries,
            matchers,
            Arc::clone(backend) as Arc<dyn QueryApi>,
            Arc::clone(backend) as Arc<dyn FederationSource>,
            Arc::clone(sink) as Arc<dyn Sink>,
            Normalizer::new("promtap"),
        )
    }

    fn up_sample(instance: &str, at: DateTime<Utc>) -> Sample {
        let mut metric = Labelset::new();
        metric.insert("instance".to_string(), instance.to_string());
        Sample {
            metric,
            timestamp: Some(at),
            value: 1.0,
        }
    }

    #[tokio::test]
    async fn test_single_vector_query() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let backend = Arc::new(MockBackend::new().reply(
            "up",
            Reply::Result(QueryResult::Vector(vec![up_sample("a", at)])),
        ));
        let sink = Arc::new(RecordingSink::default());
        let coordinator = coordinator(vec![Query::new("up", "up")], vec![], &backend, &sink);

        let summary = coordinator.run_round(&CancellationToken::new()).await;

        assert_eq!(summary.round, 1);
        assert_eq!(summary.events, 1);
        assert_eq!(summary.failures, 0);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, Some(at));
        assert_eq!(events[0].kind, "promtap");
        assert_eq!(events[0].field, "up");
        assert_eq!(events[0].value, EventValue::Number(1.0));
        assert_eq!(
            events[0].labels.as_ref().and_then(|l| l.get("instance")).map(String::as_str),
            Some("a")
        );
        // No matchers, no federation call.
        assert!(backend.federation_calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_data_query_does_not_stop_round() {
        let backend = Arc::new(
            MockBackend::new()
                .reply("absent(up)", Reply::Result(QueryResult::None))
                .reply("vector(2)", Reply::Result(QueryResult::Vector(vec![up_sample("b", Utc::now())]))),
        );
        let sink = Arc::new(RecordingSink::default());
        let coordinator = coordinator(
            vec![Query::new("down", "absent(up)"), Query::new("two", "vector(2)")],
            vec![],
            &backend,
            &sink,
        );

        let warnings = WarnCounter::default();
        let _guard = warnings.install();
        let summary = coordinator.run_round(&CancellationToken::new()).await;

        assert_eq!(summary.failures, 1);
        assert_eq!(summary.events, 1);
        assert_eq!(warnings.count(), 1);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].field, "two");
    }

    #[tokio::test]
    async fn test_federation_blocks_are_flattened() {
        let backend = Arc::new(MockBackend::new().federation(Ok(vec![
            federated_vector("go_goroutines", 2),
            federated_vector("process_open_fds", 3),
        ])));
        let sink = Arc::new(RecordingSink::default());
        let coordinator = coordinator(
            vec![],
            vec![r#"{job="prometheus"}"#.to_string()],
            &backend,
            &sink,
        );

        let summary = coordinator.run_round(&CancellationToken::new()).await;

        assert_eq!(summary.events, 5);
        let events = sink.events();
        assert_eq!(events.len(), 5);
        for event in &events {
            let name = event
                .labels
                .as_ref()
                .and_then(|l| l.get("__name__"))
                .cloned();
            assert_eq!(name.as_deref(), Some(event.field.as_str()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_waits_for_slowest_task() {
        let backend = Arc::new(
            MockBackend::new()
                .reply("fast", Reply::Result(QueryResult::Vector(Vec::new())))
                .reply("slow", Reply::Result(QueryResult::Vector(Vec::new())))
                .delay("fast", Duration::from_millis(10))
                .delay("slow", Duration::from_secs(5)),
        );
        let sink = Arc::new(RecordingSink::default());
        let coordinator = coordinator(
            vec![Query::new("fast", "fast"), Query::new("slow", "slow")],
            vec![],
            &backend,
            &sink,
        );

        let summary = coordinator.run_round(&CancellationToken::new()).await;

        assert!(summary.elapsed >= Duration::from_secs(5));
        let log = backend.log();
        assert_eq!(log.last().map(String::as_str), Some("end:slow"));
        assert_eq!(log.iter().filter(|e| e.starts_with("end:")).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_round_publishes_nothing() {
        let backend = Arc::new(
            MockBackend::new()
                .reply("slow", Reply::Result(QueryResult::Vector(vec![up_sample("a", Utc::now())])))
                .delay("slow", Duration::from_secs(30))
                .federation(Ok(vec![federated_vector("m", 1)]))
                .federation_delay(Duration::from_secs(30)),
        );
        let sink = Arc::new(RecordingSink::default());
        let coordinator = coordinator(
            vec![Query::new("slow", "slow")],
            vec!["m".to_string()],
            &backend,
            &sink,
        );

        let parent = CancellationToken::new();
        let canceller = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let summary = coordinator.run_round(&parent).await;

        assert_eq!(summary.cancelled, 2);
        assert_eq!(summary.failures, 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_round_counter_and_task_count() {
        let backend = Arc::new(MockBackend::new());
        let sink = Arc::new(RecordingSink::default());
        let coordinator = coordinator(
            vec![Query::new("a", "a"), Query::new("b", "b")],
            vec!["x".to_string()],
            &backend,
            &sink,
        );
        assert_eq!(coordinator.task_count(), 3);

        let token = CancellationToken::new();
        coordinator.run_round(&token).await;
        let second = coordinator.run_round(&token).await;

        assert_eq!(second.round, 2);
        assert_eq!(coordinator.rounds(), 2);
        // Unscripted queries answer None.
        assert_eq!(second.failures, 2);
        assert_eq!(backend.query_calls(), 4);
    }
}
