//! HTTP relay link: JSON facts over plain request/response with long-polling.

use std::time::Duration;

use async_trait::async_trait;

use super::{Fact, PullResponse, RelayLink, TransportError};
use crate::config::RelayConfig;

/// Link to a relay reachable over HTTP.
///
/// `POST {base}/facts` publishes a fact; `GET {base}/facts` long-polls for
/// facts after a cursor.
pub struct HttpRelayLink {
    base_url: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl HttpRelayLink {
    /// Creates a link for the relay at `base_url` (e.g. `http://localhost:8765/gun`).
    ///
    /// # Errors
    /// - `TransportError::Protocol` - The base URL is not an http(s) URL or the
    ///   HTTP client could not be built
    pub fn new(base_url: &str, config: &RelayConfig) -> Result<Self, TransportError> {
        let parsed = url::Url::parse(base_url).map_err(|e| TransportError::Protocol {
            endpoint: base_url.to_string(),
            reason: format!("invalid relay URL: {e}"),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransportError::Protocol {
                endpoint: base_url.to_string(),
                reason: format!("unsupported relay scheme '{}'", parsed.scheme()),
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| TransportError::Protocol {
                endpoint: base_url.to_string(),
                reason: format!("HTTP client creation failed: {e}"),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
            client,
        })
    }

    /// Builds one link per configured relay peer, skipping unusable URLs.
    pub fn from_config(config: &RelayConfig) -> Vec<Self> {
        config
            .peers
            .iter()
            .filter_map(|peer| match Self::new(peer, config) {
                Ok(link) => Some(link),
                Err(e) => {
                    tracing::warn!("Ignoring relay peer {}: {}", peer, e);
                    None
                }
            })
            .collect()
    }

    /// URL of the facts resource on this relay.
    pub fn facts_url(&self) -> String {
        format!("{}/facts", self.base_url)
    }

    fn unreachable(&self, error: reqwest::Error) -> TransportError {
        TransportError::Unreachable {
            endpoint: self.base_url.clone(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl RelayLink for HttpRelayLink {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn push(&self, fact: &Fact) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.facts_url())
            .timeout(self.request_timeout)
            .json(fact)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !response.status().is_success() {
            return Err(TransportError::Rejected {
                endpoint: self.base_url.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn pull(
        &self,
        namespace: &str,
        after: u64,
        wait: Duration,
    ) -> Result<PullResponse, TransportError> {
        let url = format!(
            "{}?namespace={}&after={}&wait_ms={}",
            self.facts_url(),
            urlencoding::encode(namespace),
            after,
            wait.as_millis()
        );

        let response = self
            .client
            .get(url)
            .timeout(wait + self.request_timeout)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !response.status().is_success() {
            return Err(TransportError::Rejected {
                endpoint: self.base_url.clone(),
                status: response.status().as_u16(),
            });
        }

        response.json().await.map_err(|e| TransportError::Protocol {
            endpoint: self.base_url.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaMeshConfig;

    #[test]
    fn test_facts_url_strips_trailing_slash() {
        let config = MediaMeshConfig::default().relay;
        let link = HttpRelayLink::new("http://localhost:8765/gun/", &config).unwrap();
        assert_eq!(link.facts_url(), "http://localhost:8765/gun/facts");
        assert_eq!(link.endpoint(), "http://localhost:8765/gun");
    }

    #[test]
    fn test_rejects_non_http_relays() {
        let config = MediaMeshConfig::default().relay;
        assert!(HttpRelayLink::new("ws://localhost:8765/gun", &config).is_err());
        assert!(HttpRelayLink::new("not a url", &config).is_err());
    }

    #[test]
    fn test_from_config_skips_bad_peers() {
        let mut config = MediaMeshConfig::default().relay;
        config.peers = vec![
            "http://relay-a:8765/gun".to_string(),
            "bogus".to_string(),
            "https://relay-b/gun".to_string(),
        ];
        let links = HttpRelayLink::from_config(&config);
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_relay_reports_error() {
        let config = MediaMeshConfig::for_testing().relay;
        // Port 9 (discard) on localhost is expected to refuse connections.
        let link = HttpRelayLink::new("http://127.0.0.1:9/gun", &config).unwrap();
        let result = link.pull("ns", 0, Duration::ZERO).await;
        assert!(matches!(result, Err(TransportError::Unreachable { .. })));
    }
}
