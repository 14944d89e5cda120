//! Query result model and JSON API decoding.
//!
//! Results of an instant query are exactly one of [`QueryResult`]'s variants.
//! The HTTP API encodes them as `{resultType, result}` where each sample is a
//! `[unix_seconds, "value"]` pair; decoding happens in [`ApiResponse::into_result`].

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Reserved label holding the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Label name to label value mapping identifying a series.
pub type Labelset = BTreeMap<String, String>;

/// One point of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePair {
    pub timestamp: Option<DateTime<Utc>>,
    pub value: f64,
}

/// An instant sample with its series labels.
///
/// Used both for `vector` elements and for federation samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: Labelset,
    pub timestamp: Option<DateTime<Utc>>,
    pub value: f64,
}

impl Sample {
    /// Metric name taken from the `__name__` label.
    pub fn metric_name(&self) -> Option<&str> {
        self.metric.get(METRIC_NAME_LABEL).map(String::as_str)
    }
}

/// A range of points for a single series.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStream {
    pub metric: Labelset,
    pub values: Vec<SamplePair>,
}

/// A sequence of instant samples.
pub type Vector = Vec<Sample>;

/// A sequence of series with their points.
pub type Matrix = Vec<SampleStream>;

/// Evaluated query result.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Scalar(SamplePair),
    Vector(Vector),
    Matrix(Matrix),
    String {
        timestamp: Option<DateTime<Utc>>,
        value: String,
    },
    /// No data, or a result type this client does not understand.
    None,
}

// =============================================================================
// Value helpers
// =============================================================================

/// Parse a Prometheus float, accepting the `NaN`/`+Inf`/`-Inf` spellings.
pub fn parse_sample_value(raw: &str) -> Option<f64> {
    match raw {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        other => other.parse::<f64>().ok(),
    }
}

/// Format a float the way Prometheus prints special values.
pub fn format_sample_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Convert fractional unix seconds to a UTC timestamp.
pub fn timestamp_from_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// Convert unix milliseconds to a UTC timestamp.
pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

// =============================================================================
// Wire types
// =============================================================================

/// Standard `/api/v1/*` response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<ApiData>,
    #[serde(default, rename = "errorType")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// The `data` member of a query response.
#[derive(Debug, Deserialize)]
pub struct ApiData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawPair(f64, String);

#[derive(Debug, Deserialize)]
struct RawVectorSample {
    #[serde(default)]
    metric: Labelset,
    value: RawPair,
}

#[derive(Debug, Deserialize)]
struct RawSampleStream {
    #[serde(default)]
    metric: Labelset,
    #[serde(default)]
    values: Vec<RawPair>,
}

/// Failure decoding a successful envelope into a [`QueryResult`].
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The backend reported `status: error`.
    #[error("{error_type}: {message}")]
    Api { error_type: String, message: String },

    /// The `result` payload does not match its declared type.
    #[error("malformed {result_type} result: {message}")]
    Malformed {
        result_type: String,
        message: String,
    },
}

impl RawPair {
    fn into_pair(self, result_type: &str) -> Result<SamplePair, ModelError> {
        let value = parse_sample_value(&self.1).ok_or_else(|| ModelError::Malformed {
            result_type: result_type.to_string(),
            message: format!("invalid sample value '{}'", self.1),
        })?;
        Ok(SamplePair {
            timestamp: timestamp_from_secs(self.0),
            value,
        })
    }
}

fn malformed(result_type: &str, err: serde_json::Error) -> ModelError {
    ModelError::Malformed {
        result_type: result_type.to_string(),
        message: err.to_string(),
    }
}

impl ApiResponse {
    /// Convert the envelope into a typed result.
    ///
    /// A success envelope without `data`, or with an unknown `resultType`,
    /// decodes to [`QueryResult::None`].
    pub fn into_result(self) -> Result<QueryResult, ModelError> {
        if self.status != "success" {
            return Err(ModelError::Api {
                error_type: self.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: self
                    .error
                    .unwrap_or_else(|| format!("status '{}'", self.status)),
            });
        }

        let Some(data) = self.data else {
            return Ok(QueryResult::None);
        };
        let kind = data.result_type.as_str();

        match kind {
            "scalar" => {
                let raw: RawPair =
                    serde_json::from_value(data.result).map_err(|e| malformed(kind, e))?;
                Ok(QueryResult::Scalar(raw.into_pair(kind)?))
            }
            "string" => {
                let RawPair(ts, value) =
                    serde_json::from_value(data.result).map_err(|e| malformed(kind, e))?;
                Ok(QueryResult::String {
                    timestamp: timestamp_from_secs(ts),
                    value,
                })
            }
            "vector" => {
                let raw: Vec<RawVectorSample> =
                    serde_json::from_value(data.result).map_err(|e| malformed(kind, e))?;
                let samples = raw
                    .into_iter()
                    .map(|s| {
                        let pair = s.value.into_pair(kind)?;
                        Ok(Sample {
                            metric: s.metric,
                            timestamp: pair.timestamp,
                            value: pair.value,
                        })
                    })
                    .collect::<Result<Vector, ModelError>>()?;
                Ok(QueryResult::Vector(samples))
            }
            "matrix" => {
                let raw: Vec<RawSampleStream> =
                    serde_json::from_value(data.result).map_err(|e| malformed(kind, e))?;
                let streams = raw
                    .into_iter()
                    .map(|s| {
                        let values = s
                            .values
                            .into_iter()
                            .map(|p| p.into_pair(kind))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(SampleStream {
                            metric: s.metric,
                            values,
                        })
                    })
                    .collect::<Result<Matrix, ModelError>>()?;
                Ok(QueryResult::Matrix(streams))
            }
            _ => Ok(QueryResult::None),
        }
    }
}
