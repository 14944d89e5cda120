//! Query result normalization.
//!
//! Turns a typed [`QueryResult`] into flat [`Event`]s. The mapping is pure
//! and order-preserving:
//!
//! | result          | events                                   | `labels` |
//! |-----------------|------------------------------------------|----------|
//! | `Scalar`        | 1                                        | no       |
//! | `String`        | 1                                        | no       |
//! | `Vector` (k)    | k                                        | yes      |
//! | `Matrix`        | one per (series, point), series first    | yes      |
//! | `None`          | 0, reported as [`CollectorError::NoData`] | -        |
//!
//! Event timestamps always come from the sample. A sample without one yields
//! an event without `@timestamp`.

use crate::collector::CollectorError;
use crate::event::{Event, EventValue};
use crate::prometheus::{QueryResult, Sample, Vector};

/// Stateless converter stamping every event with the collector identity.
#[derive(Debug, Clone)]
pub struct Normalizer {
    kind: String,
}

impl Normalizer {
    /// Create a normalizer whose events carry `type = kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }

    /// Normalize a query result, keying values by `name`.
    ///
    /// # Errors
    /// Returns [`CollectorError::NoData`] for [`QueryResult::None`].
    pub fn normalize(&self, name: &str, result: QueryResult) -> Result<Vec<Event>, CollectorError> {
        let events = match result {
            QueryResult::Scalar(pair) => vec![Event {
                timestamp: pair.timestamp,
                kind: self.kind.clone(),
                labels: None,
                field: name.to_string(),
                value: EventValue::Number(pair.value),
            }],
            QueryResult::String { timestamp, value } => vec![Event {
                timestamp,
                kind: self.kind.clone(),
                labels: None,
                field: name.to_string(),
                value: EventValue::Text(value),
            }],
            QueryResult::Vector(samples) => samples
                .into_iter()
                .map(|sample| self.sample_event(name, sample))
                .collect(),
            QueryResult::Matrix(streams) => streams
                .into_iter()
                .flat_map(|stream| {
                    let metric = stream.metric;
                    stream.values.into_iter().map(move |pair| Event {
                        timestamp: pair.timestamp,
                        kind: self.kind.clone(),
                        labels: Some(metric.clone()),
                        field: name.to_string(),
                        value: EventValue::Number(pair.value),
                    })
                })
                .collect(),
            QueryResult::None => {
                return Err(CollectorError::NoData {
                    query: name.to_string(),
                });
            }
        };
        Ok(events)
    }

    /// Normalize one federation vector, keying each sample by its own
    /// metric name.
    ///
    /// Samples without a `__name__` label have no field key and are skipped.
    pub fn normalize_federated(&self, vector: Vector) -> Vec<Event> {
        vector
            .into_iter()
            .filter_map(|sample| {
                let Some(name) = sample.metric_name().map(str::to_string) else {
                    tracing::debug!(labels = ?sample.metric, "Skipping federated sample without metric name");
                    return None;
                };
                Some(self.sample_event(&name, sample))
            })
            .collect()
    }

    fn sample_event(&self, name: &str, sample: Sample) -> Event {
        Event {
            timestamp: sample.timestamp,
            kind: self.kind.clone(),
            labels: Some(sample.metric),
            field: name.to_string(),
            value: EventValue::Number(sample.value),
        }
    }
}
