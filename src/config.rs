//! Configuration module for promtap.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Backend address and tick period
//! - Named queries and federation matchers
//! - Event sink output settings

mod app;
mod validation;

pub use app::{Config, OutputConfig, Query};
pub use validation::{
    ConfigError, expand_env_vars, parse_duration, validate_address, validate_matcher,
};

// Re-export constants
pub use app::{
    DEFAULT_ADDRESS, DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_NAME, DEFAULT_PERIOD,
};
