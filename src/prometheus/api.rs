//! HTTP client for the Prometheus query API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::model::{ApiResponse, QueryResult};
use crate::collector::{CollectorError, QueryApi, cancellable};
use crate::config::{Config, validate_address};

/// Instant query endpoint, relative to the base address.
const QUERY_PATH: &str = "/api/v1/query";

/// Shared read-only handle to one Prometheus server.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct PrometheusClient {
    base: Url,
    client: Client,
}

impl std::fmt::Debug for PrometheusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl PrometheusClient {
    /// Create a client for `address`, sending `headers` on every request.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` if the address or a header is invalid,
    /// or the HTTP client cannot be built.
    pub fn new(address: &str, headers: &BTreeMap<String, String>) -> Result<Self, CollectorError> {
        let base = validate_address(address).map_err(|e| CollectorError::Config(e.to_string()))?;

        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| CollectorError::Config(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                CollectorError::Config(format!("invalid value for header '{}': {}", key, e))
            })?;
            header_map.insert(name, value);
        }

        let client = Client::builder()
            .user_agent(concat!("promtap/", env!("CARGO_PKG_VERSION")))
            .default_headers(header_map)
            .build()
            .map_err(|e| CollectorError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { base, client })
    }

    /// Create a client from application configuration.
    pub fn from_config(config: &Config) -> Result<Self, CollectorError> {
        Self::new(&config.address, &config.expanded_headers())
    }

    /// Base address, as configured.
    pub fn address(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    async fn instant_query(
        &self,
        expr: &str,
        time: DateTime<Utc>,
    ) -> Result<QueryResult, CollectorError> {
        let url = format!("{}{}", self.address(), QUERY_PATH);
        let time = format_time(time);
        let response = self
            .client
            .get(&url)
            .query(&[("query", expr), ("time", time.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        // Error envelopes arrive with 4xx/5xx statuses; prefer them over the bare status.
        match serde_json::from_slice::<ApiResponse>(&body) {
            Ok(envelope) => {
                for warning in &envelope.warnings {
                    tracing::debug!(warning = %warning, "Prometheus returned a warning");
                }
                Ok(envelope.into_result()?)
            }
            Err(_) if !status.is_success() => Err(CollectorError::Status {
                status: status.as_u16(),
                url,
            }),
            Err(e) => Err(CollectorError::Decode(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl QueryApi for PrometheusClient {
    async fn query(
        &self,
        expr: &str,
        time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, CollectorError> {
        cancellable(cancel, self.instant_query(expr, time)).await
    }
}

/// Format an evaluation time as fractional unix seconds.
pub fn format_time(time: DateTime<Utc>) -> String {
    let millis = time.timestamp_millis();
    format!("{}.{:03}", millis.div_euclid(1000), millis.rem_euclid(1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_time() {
        let time = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(format_time(time), "1700000000.123");

        let time = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(format_time(time), "1700000000.000");
    }

    #[test]
    fn test_client_rejects_bad_address() {
        let err = PrometheusClient::new("localhost", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CollectorError::Config(_)));
    }

    #[test]
    fn test_client_rejects_bad_header() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = PrometheusClient::new("http://localhost:9090", &headers).unwrap_err();
        assert!(err.to_string().contains("invalid header name"));
    }

    #[test]
    fn test_client_address_trims_slash() {
        let client = PrometheusClient::new("http://localhost:9090/", &BTreeMap::new()).unwrap();
        assert_eq!(client.address(), "http://localhost:9090");

        let client =
            PrometheusClient::new("http://localhost:9090/prom/", &BTreeMap::new()).unwrap();
        assert_eq!(client.address(), "http://localhost:9090/prom");
    }
}
