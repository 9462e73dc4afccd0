//! Content-addressed gateway probe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{PlayableHandle, ProbeError, SourceKind, SourceProbe, StreamReferences};
use crate::config::GatewayConfig;

/// Lightweight existence check against one URL.
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    /// Succeeds if `url` answers with a success status within `timeout`.
    ///
    /// # Errors
    /// - `ProbeError::Timeout` - No answer within `timeout`
    /// - `ProbeError::Unavailable` - Connection failure or non-success status
    async fn check(&self, url: &str, timeout: Duration) -> Result<(), ProbeError>;
}

/// Reachability via HTTP `HEAD`.
pub struct HttpReachability {
    client: reqwest::Client,
}

impl HttpReachability {
    /// # Errors
    /// - `ProbeError::Unavailable` - The HTTP client could not be built
    pub fn new(user_agent: &str) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ProbeError::unavailable(format!("HTTP client creation failed: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReachabilityCheck for HttpReachability {
    async fn check(&self, url: &str, timeout: Duration) -> Result<(), ProbeError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout { after: timeout }
                } else {
                    ProbeError::unavailable(e.to_string())
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::unavailable(format!(
                "HTTP {}",
                response.status().as_u16()
            )))
        }
    }
}

/// Tries an ordered list of gateways and returns the first reachable URL.
pub struct GatewayProbe {
    gateways: Vec<String>,
    timeout: Duration,
    checker: Arc<dyn ReachabilityCheck>,
}

impl GatewayProbe {
    pub fn new(config: &GatewayConfig, checker: Arc<dyn ReachabilityCheck>) -> Self {
        Self {
            gateways: config.gateways.clone(),
            timeout: config.probe_timeout,
            checker,
        }
    }

    /// Gateway URLs for `content_address`, in probe order.
    pub fn candidate_urls(&self, content_address: &str) -> Vec<String> {
        self.gateways
            .iter()
            .map(|base| format!("{base}{content_address}"))
            .collect()
    }
}

#[async_trait]
impl SourceProbe for GatewayProbe {
    fn kind(&self) -> SourceKind {
        SourceKind::ContentAddressed
    }

    async fn probe(
        &self,
        references: &StreamReferences,
        cancel: CancellationToken,
    ) -> Result<PlayableHandle, ProbeError> {
        let candidates = self.candidate_urls(&references.content_address);
        if candidates.is_empty() {
            return Err(ProbeError::unavailable("no gateways configured"));
        }

        for url in &candidates {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                result = self.checker.check(url, self.timeout) => result,
            };

            match result {
                Ok(()) => {
                    tracing::info!("Gateway reachable: {}", url);
                    return Ok(PlayableHandle::from_url(url.clone()));
                }
                Err(e) => tracing::warn!("Gateway {} failed: {}", url, e),
            }
        }

        Err(ProbeError::unavailable(format!(
            "all {} gateways unreachable",
            candidates.len()
        )))
    }
}
