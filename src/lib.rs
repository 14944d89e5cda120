//! promtap - Prometheus collection beat
//!
//! Periodically evaluates a configured set of PromQL instant queries and
//! pulls federated series from one Prometheus server, then normalizes every
//! sample into a flat event and hands it to a sink. It can be used as a
//! library, or run as a standalone binary with the `promtap` executable.
//!
//! # Architecture
//!
//! - **Config**: YAML file with CLI/env overrides
//! - **Prometheus**: HTTP client, typed query results, exposition decoder
//! - **Normalize**: query results to [`Event`]s
//! - **Collector**: per-tick fan-out/join rounds and the lifecycle controller
//! - **Sink**: single-writer actor emitting JSON lines
//!
//! # Example
//!
//! ```rust,ignore
//! use promtap::{Config, Controller, PrometheusClient, SinkBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("configs/promtap.yaml")?;
//!     let handles = SinkBuilder::from_config(&config.output).build()?;
//!     let client = Arc::new(PrometheusClient::from_config(&config)?);
//!     let controller = Controller::from_config(
//!         &config, client.clone(), client, Arc::new(handles.writer.clone()),
//!     )?;
//!     controller.run().await?;
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod config;
pub mod event;
pub mod normalize;
pub mod prometheus;
pub mod sink;

// Re-export commonly used types
pub use collector::{
    CollectorError, Controller, ControllerState, Coordinator, FederationSource, QueryApi,
    RoundSummary,
};
pub use config::{Config, ConfigError, OutputConfig, Query};
pub use event::{Event, EventValue};
pub use normalize::Normalizer;
pub use prometheus::{PrometheusClient, QueryResult};
pub use sink::{EventWriter, Sink, SinkBuilder, SinkError, SinkHandles};
