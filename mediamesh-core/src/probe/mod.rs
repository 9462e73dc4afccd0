//! Source probes.
//!
//! A probe tries to turn one entry's reference fields into a playable handle
//! through a single transport. Probes perform one bounded attempt, honour an
//! external cancellation token, and report failures as `ProbeError`s that the
//! resolver uses to pick the next source.

pub mod gateway;
pub mod origin;
pub mod torrent;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use gateway::{GatewayProbe, HttpReachability, ReachabilityCheck};
pub use origin::OriginProbe;
pub use torrent::{
    TorrentClient, TorrentFile, TorrentHandle, TorrentProbe, UnavailableTorrentClient,
    select_playable_file,
};

use crate::catalog::{CatalogEntry, MediaKind};

/// Transport a probe resolves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    P2p,
    ContentAddressed,
    Origin,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::P2p => "p2p",
            SourceKind::ContentAddressed => "contentAddressed",
            SourceKind::Origin => "origin",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference fields of one entry, as handed to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReferences {
    pub primary_reference: String,
    pub content_address: String,
    pub fallback_url: Option<String>,
    pub media_kind: MediaKind,
}

impl StreamReferences {
    pub fn new(
        primary_reference: impl Into<String>,
        content_address: impl Into<String>,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            primary_reference: primary_reference.into(),
            content_address: content_address.into(),
            fallback_url: None,
            media_kind,
        }
    }

    pub fn with_fallback_url(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }
}

impl From<&CatalogEntry> for StreamReferences {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            primary_reference: entry.primary_reference.clone(),
            content_address: entry.content_address.clone(),
            fallback_url: entry.fallback_url.clone(),
            media_kind: entry.media_kind,
        }
    }
}

/// Live transfer telemetry of a peer-to-peer stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    pub peer_count: u32,
    /// Bytes per second
    pub download_rate: u64,
    /// Bytes per second
    pub upload_rate: u64,
    /// Between 0.0 and 1.0
    pub fraction_complete: f64,
    /// Size of the torrent payload, 0 until metadata arrives
    pub total_bytes: u64,
}

impl TransferStats {
    /// Estimated time until the download completes at the current rate.
    ///
    /// `None` while the size is unknown or nothing is downloading.
    pub fn time_remaining(&self) -> Option<Duration> {
        if self.fraction_complete >= 1.0 {
            return Some(Duration::ZERO);
        }
        if self.total_bytes == 0 || self.download_rate == 0 {
            return None;
        }

        let remaining = (1.0 - self.fraction_complete.max(0.0)) * self.total_bytes as f64;
        Some(Duration::from_secs_f64(remaining / self.download_rate as f64))
    }
}

/// Result of a successful probe.
#[derive(Clone)]
pub struct PlayableHandle {
    /// URL a player can open
    pub url: String,
    /// Torrent backing the stream, present only for peer-to-peer handles
    pub torrent: Option<Arc<dyn TorrentHandle>>,
}

impl PlayableHandle {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            torrent: None,
        }
    }
}

impl fmt::Debug for PlayableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayableHandle")
            .field("url", &self.url)
            .field("torrent", &self.torrent.is_some())
            .finish()
    }
}

/// One attempt by one transport to produce a playable handle.
#[async_trait]
pub trait SourceProbe: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Attempts to resolve `references` through this probe's transport.
    ///
    /// # Errors
    /// - `ProbeError::Timeout` - A bounded step ran out of time
    /// - `ProbeError::Unavailable` - The transport cannot serve this reference
    /// - `ProbeError::Cancelled` - `cancel` fired before the attempt finished
    async fn probe(
        &self,
        references: &StreamReferences,
        cancel: CancellationToken,
    ) -> Result<PlayableHandle, ProbeError>;
}

/// Why a probe did not produce a handle. Drives fallback; never terminal on
/// its own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("Probe timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Probe cancelled")]
    Cancelled,
}

impl ProbeError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ProbeError::Unavailable {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_from_entry() {
        let entry = CatalogEntry::new("m1", "Title", "magnet:?xt=urn:btih:x", "cid", MediaKind::Audio)
            .with_fallback_url("https://origin/x.mp3");
        let references = StreamReferences::from(&entry);

        assert_eq!(references.content_address, "cid");
        assert_eq!(references.fallback_url.as_deref(), Some("https://origin/x.mp3"));
        assert_eq!(references.media_kind, MediaKind::Audio);
    }

    #[test]
    fn test_source_kind_names() {
        assert_eq!(SourceKind::P2p.to_string(), "p2p");
        assert_eq!(SourceKind::ContentAddressed.to_string(), "contentAddressed");
        assert_eq!(
            serde_json::to_string(&SourceKind::Origin).unwrap(),
            "\"origin\""
        );
    }

    #[test]
    fn test_default_stats_are_zero() {
        let stats = TransferStats::default();
        assert_eq!(stats.peer_count, 0);
        assert_eq!(stats.fraction_complete, 0.0);
        assert_eq!(stats.time_remaining(), None);
    }

    #[test]
    fn test_time_remaining_from_rate_and_progress() {
        let stats = TransferStats {
            download_rate: 1_000,
            fraction_complete: 0.75,
            total_bytes: 40_000,
            ..TransferStats::default()
        };
        assert_eq!(stats.time_remaining(), Some(Duration::from_secs(10)));

        let stalled = TransferStats {
            download_rate: 0,
            ..stats
        };
        assert_eq!(stalled.time_remaining(), None);

        let done = TransferStats {
            fraction_complete: 1.0,
            ..stalled
        };
        assert_eq!(done.time_remaining(), Some(Duration::ZERO));
    }
}
