//! Direct-origin probe.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{PlayableHandle, ProbeError, SourceKind, SourceProbe, StreamReferences};
use crate::catalog::validation::validate_http_url;

/// Hands the publisher's fallback URL to the player as-is. Whether the
/// origin can actually deliver is only known at playback time.
#[derive(Debug, Default, Clone, Copy)]
pub struct OriginProbe;

#[async_trait]
impl SourceProbe for OriginProbe {
    fn kind(&self) -> SourceKind {
        SourceKind::Origin
    }

    async fn probe(
        &self,
        references: &StreamReferences,
        cancel: CancellationToken,
    ) -> Result<PlayableHandle, ProbeError> {
        if cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        let url = references
            .fallback_url
            .as_deref()
            .ok_or_else(|| ProbeError::unavailable("entry has no fallback URL"))?;

        validate_http_url(url, "fallbackURL").map_err(|e| ProbeError::unavailable(e.to_string()))?;
        Ok(PlayableHandle::from_url(url))
    }
}
