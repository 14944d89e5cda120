//! Collector Layer
//!
//! Periodic collection from a Prometheus backend. Each tick the
//! [`Controller`] asks the [`Coordinator`] for one round: every configured
//! query plus one federation pull run as concurrent Tokio tasks, and the
//! round returns only once all of them have finished.
//!
//! # Architecture
//!
//! - [`QueryApi`] / [`FederationSource`]: backend capabilities, mockable
//! - [`QueryExecutor`]: one query, normalized and published
//! - [`FederationPass`]: federation pull, one event per sample
//! - [`Coordinator`]: fan-out and join of a round
//! - [`Controller`]: tick loop and idempotent stop
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use promtap::collector::Controller;
//! use promtap::config::Config;
//! use promtap::prometheus::PrometheusClient;
//! use promtap::sink::SinkBuilder;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let handles = SinkBuilder::from_config(&config.output).build()?;
//! let client = Arc::new(PrometheusClient::from_config(&config)?);
//! let controller = Controller::from_config(
//!     &config,
//!     client.clone(),
//!     client,
//!     Arc::new(handles.writer.clone()),
//! )?;
//! controller.run().await?;
//! handles.join()?;
//! # Ok(())
//! # }
//! ```

mod controller;
mod federation;
#[cfg(test)]
pub(crate) mod mock;
mod query;
mod round;
mod traits;

pub use controller::{Controller, ControllerState};
pub use federation::FederationPass;
pub use query::QueryExecutor;
pub use round::{Coordinator, RoundSummary};
pub use traits::{CollectorError, FederationSource, QueryApi, cancellable};
