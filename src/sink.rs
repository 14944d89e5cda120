//! Event Sink
//!
//! Single-writer JSON-lines output fed through a bounded channel:
//! - **Publishers**: any number of round tasks, non-blocking `try_send`
//! - **Writer**: one thread owning the output, flushing in batches
//!
//! # Components
//!
//! - [`Sink`]: publish/close capability used by the collector
//! - [`EventWriter`]: channel-backed [`Sink`] implementation
//! - [`SinkBuilder`] / [`SinkHandles`]: initialization and lifecycle management

mod actor;
mod builder;
mod error;
mod writer;

pub use builder::{SinkBuilder, SinkHandles};
pub use error::SinkError;
pub use writer::{EventWriter, Sink};
