//! Configuration validation utilities.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;
use url::Url;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML document is malformed or has wrongly typed fields.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds a value the collector cannot run with.
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Parse a human-readable duration such as `15s`, `1m30s` or `250ms`.
///
/// # Examples
///
/// ```
/// use promtap::config::parse_duration;
///
/// assert_eq!(parse_duration("15s").unwrap().as_secs(), 15);
/// assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    match s.trim() {
        "" => Err("duration string is empty".to_string()),
        trimmed => humantime::parse_duration(trimmed).map_err(|e| e.to_string()),
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references from the environment.
///
/// An unset variable without a default expands to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static REFERENCE: OnceLock<Regex> = OnceLock::new();
    let reference = REFERENCE.get_or_init(|| {
        Regex::new(r"\$\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?::-(?P<default>[^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    reference
        .replace_all(input, |caps: &Captures| {
            let name = &caps["name"];
            match (std::env::var(name), caps.name("default")) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => {
                    tracing::debug!(var = %name, "Environment variable unset, expanding to empty");
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Validate a backend base address.
///
/// Only absolute `http`/`https` URLs are accepted.
pub fn validate_address(address: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(address)
        .map_err(|e| ConfigError::invalid("address", format!("'{}': {}", address, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::invalid(
            "address",
            format!("unsupported scheme '{}' in '{}'", other, address),
        )),
    }
}

/// Sanity-check a federation series selector.
///
/// Accepts a bare metric name, `{...}`, or `name{...}`. The label matchers
/// themselves are left for the backend to judge.
pub fn validate_matcher(matcher: &str) -> Result<(), ConfigError> {
    let matcher = matcher.trim();
    if matcher.is_empty() {
        return Err(ConfigError::invalid("matcher", "selector cannot be empty"));
    }

    let (name, selector) = match matcher.find('{') {
        Some(open) => (&matcher[..open], Some(&matcher[open..])),
        None => (matcher, None),
    };

    let name_ok = name
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c == ':' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
    if !name_ok {
        return Err(ConfigError::invalid(
            "matcher",
            format!("'{}' has an invalid metric name", matcher),
        ));
    }

    if let Some(selector) = selector
        && !selector.ends_with('}')
    {
        return Err(ConfigError::invalid(
            "matcher",
            format!("'{}' has an unterminated label selector", matcher),
        ));
    }

    Ok(())
}
