//! Prometheus backend access.
//!
//! - [`PrometheusClient`]: shared HTTP handle implementing the query and
//!   federation capabilities
//! - [`QueryResult`]: the typed result of an instant query
//! - [`SampleDecoder`]: block-by-block text exposition decoder

mod api;
mod exposition;
mod federation;
mod model;

pub use api::{PrometheusClient, format_time};
pub use exposition::{DecodeError, MetricKind, SampleDecoder, decode_all};
pub use federation::federate_url;
pub use model::{
    Labelset, METRIC_NAME_LABEL, Matrix, ModelError, QueryResult, Sample, SamplePair,
    SampleStream, Vector, format_sample_value, parse_sample_value,
};
