//! Flat event records handed to the sink.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::prometheus::{Labelset, format_sample_value};

/// Event field holding the sample time.
pub const TIMESTAMP_FIELD: &str = "@timestamp";
/// Event field holding the collector identity.
pub const TYPE_FIELD: &str = "type";
/// Event field holding the series labelset.
pub const LABELS_FIELD: &str = "labels";

/// The metric value carried by an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Number(f64),
    Text(String),
}

impl EventValue {
    /// JSON form. Non-finite numbers use their Prometheus spelling.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(format_sample_value(*n))),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

/// A normalized record: one metric value, its time and its identity.
///
/// Serializes to a flat object:
/// `{"@timestamp": ..., "type": ..., "labels": {...}, "<field>": value}`.
/// `@timestamp` is omitted when the source sample had none, and `labels`
/// only appears for vector and matrix results.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: String,
    pub labels: Option<Labelset>,
    pub field: String,
    pub value: EventValue,
}

impl Event {
    /// Flatten into a JSON object.
    ///
    /// The value field is inserted last, so a query named like a reserved
    /// field overrides it.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(ts) = self.timestamp {
            map.insert(
                TIMESTAMP_FIELD.to_string(),
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        map.insert(TYPE_FIELD.to_string(), Value::String(self.kind.clone()));
        if let Some(labels) = &self.labels {
            let labels = labels
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert(LABELS_FIELD.to_string(), Value::Object(labels));
        }
        map.insert(self.field.clone(), self.value.to_json());
        map
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}
