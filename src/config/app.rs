//! Application configuration structures.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars, validate_address, validate_matcher};

// =============================================================================
// Constants
// =============================================================================

/// Default Prometheus base address.
pub const DEFAULT_ADDRESS: &str = "http://localhost:9090";

/// Default collection period (1 second).
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Default collector name, used as the event `type` field.
pub const DEFAULT_NAME: &str = "promtap";

/// Default sink channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Default number of buffered events before the sink flushes.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default maximum time between sink flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_period() -> Duration {
    DEFAULT_PERIOD
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

// =============================================================================
// Query Configuration
// =============================================================================

/// A named PromQL expression evaluated on every tick.
///
/// The name becomes the value field key of every event the query produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Event field key for this query's values.
    pub name: String,
    /// PromQL expression.
    #[serde(alias = "expression")]
    pub query: String,
}

impl Query {
    /// Create a new query entry.
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

// =============================================================================
// Output Configuration
// =============================================================================

/// Event sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// File to append JSON lines to. `None` writes to stdout.
    #[serde(default)]
    pub path: Option<String>,

    /// Bounded channel capacity between publishers and the writer thread.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Events buffered before a flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time a buffered event waits for a flush.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Collector identity, written to every event as `type`.
    #[serde(default = "default_name")]
    pub name: String,

    /// Prometheus base URL.
    #[serde(default = "default_address")]
    pub address: String,

    /// Tick period.
    #[serde(default = "default_period", with = "humantime_serde")]
    pub period: Duration,

    /// Queries evaluated on every tick, in order.
    #[serde(default)]
    pub queries: Vec<Query>,

    /// `match[]` selectors for the federation pull.
    #[serde(default)]
    pub matchers: Vec<String>,

    /// Extra request headers sent to the backend (env vars expanded).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Event sink settings.
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            address: default_address(),
            period: DEFAULT_PERIOD,
            queries: Vec::new(),
            matchers: Vec::new(),
            headers: BTreeMap::new(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "cannot be empty"));
        }
        validate_address(&self.address)?;
        if self.period.is_zero() {
            return Err(ConfigError::invalid("period", "must be non-zero"));
        }

        let mut seen_names = HashSet::new();
        for (idx, query) in self.queries.iter().enumerate() {
            if query.name.is_empty() {
                return Err(ConfigError::invalid(
                    format!("queries[{}].name", idx),
                    "cannot be empty",
                ));
            }
            if query.query.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("queries[{}].query", idx),
                    format!("expression for '{}' cannot be empty", query.name),
                ));
            }
            // Names key event fields; duplicates are legal but usually a mistake.
            if !seen_names.insert(query.name.as_str()) {
                tracing::warn!(query = %query.name, "Duplicate query name in configuration");
            }
        }

        for (idx, matcher) in self.matchers.iter().enumerate() {
            validate_matcher(matcher).map_err(|e| match e {
                ConfigError::Invalid { reason, .. } => {
                    ConfigError::invalid(format!("matchers[{}]", idx), reason)
                }
                other => other,
            })?;
        }

        if self.output.channel_capacity == 0 {
            return Err(ConfigError::invalid("output.channel_capacity", "must be positive"));
        }
        if self.output.batch_size == 0 {
            return Err(ConfigError::invalid("output.batch_size", "must be positive"));
        }

        Ok(())
    }

    /// Header map with `${VAR}` references expanded.
    pub fn expanded_headers(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect()
    }
}
