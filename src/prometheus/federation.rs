//! Federation pull: `GET <address>/federate?match[]=...`.

use tokio_util::sync::CancellationToken;
use url::Url;

use super::api::PrometheusClient;
use super::exposition::{decode_all, family_names};
use super::model::Vector;
use crate::collector::{CollectorError, FederationSource, cancellable};

/// Build the federation URL for `address` and `matchers`.
///
/// Each matcher becomes one form-encoded `match[]` parameter, in order.
pub fn federate_url(address: &str, matchers: &[String]) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!("{}/federate", address.trim_end_matches('/')))?;
    if !matchers.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for matcher in matchers {
            pairs.append_pair("match[]", matcher);
        }
    }
    Ok(url)
}

impl PrometheusClient {
    async fn fetch_federation(&self, matchers: &[String]) -> Result<Vec<Vector>, CollectorError> {
        let url = federate_url(self.address(), matchers)
            .map_err(|e| CollectorError::Config(format!("invalid federation URL: {}", e)))?;

        let response = self.http().get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        let vectors = decode_all(&body)?;
        tracing::debug!(
            families = vectors.len(),
            names = ?family_names(&vectors),
            "Decoded federation payload"
        );
        Ok(vectors)
    }
}

#[async_trait::async_trait]
impl FederationSource for PrometheusClient {
    async fn federate(
        &self,
        matchers: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vector>, CollectorError> {
        cancellable(cancel, self.fetch_federation(matchers)).await
    }
}
