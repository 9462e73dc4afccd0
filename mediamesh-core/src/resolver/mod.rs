//! Stream source resolution.
//!
//! `StreamResolver::resolve` starts a session that tries the peer-to-peer
//! swarm first, then content-addressed gateways, then the publisher's origin
//! URL, and keeps reporting live telemetry while streaming from peers.

pub mod session;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

pub use session::StreamSession;

use crate::catalog::CatalogEntry;
use crate::catalog::validation::{ValidationError, validate_http_url};
use crate::config::{MediaMeshConfig, ResolverConfig};
use crate::probe::{
    GatewayProbe, HttpReachability, OriginProbe, ProbeError, ReachabilityCheck, SourceKind,
    SourceProbe, StreamReferences, TorrentClient, TorrentProbe, TransferStats,
    UnavailableTorrentClient,
};

/// Resolution phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceState {
    Idle,
    ProbingP2p,
    ProbingGateway,
    ProbingOrigin,
    Ready(SourceKind),
    Failed,
}

impl SourceState {
    /// Ready or Failed.
    pub fn is_settled(self) -> bool {
        matches!(self, SourceState::Ready(_) | SourceState::Failed)
    }

    pub fn active_source(self) -> ActiveSource {
        match self {
            SourceState::Ready(kind) => kind.into(),
            _ => ActiveSource::None,
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Idle => f.write_str("idle"),
            SourceState::ProbingP2p => f.write_str("probing p2p"),
            SourceState::ProbingGateway => f.write_str("probing gateways"),
            SourceState::ProbingOrigin => f.write_str("probing origin"),
            SourceState::Ready(kind) => write!(f, "ready ({kind})"),
            SourceState::Failed => f.write_str("failed"),
        }
    }
}

/// Transport that produced the current handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActiveSource {
    None,
    P2p,
    ContentAddressed,
    Origin,
}

impl From<SourceKind> for ActiveSource {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::P2p => ActiveSource::P2p,
            SourceKind::ContentAddressed => ActiveSource::ContentAddressed,
            SourceKind::Origin => ActiveSource::Origin,
        }
    }
}

/// Observable state of one stream session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub source_state: SourceState,
    pub active_source: ActiveSource,
    /// Zero unless streaming from peers
    pub stats: TransferStats,
    /// Playable URL while Ready
    pub resolved_handle: Option<String>,
    /// Set once the session reaches Failed
    pub failure: Option<ResolutionFailed>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            source_state: SourceState::Idle,
            active_source: ActiveSource::None,
            stats: TransferStats::default(),
            resolved_handle: None,
            failure: None,
        }
    }
}

/// Failure reported by the consuming player after resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Playback failed: {reason}")]
pub struct PlaybackError {
    pub reason: String,
}

impl PlaybackError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Why the last attempted source gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureCause {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// Every applicable source has been exhausted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No playable source; {last_source} stage failed: {cause}")]
pub struct ResolutionFailed {
    pub last_source: SourceKind,
    pub cause: FailureCause,
}

/// Probes a resolver drives, one per stage.
#[derive(Clone)]
pub struct ProbeSet {
    pub p2p: Arc<dyn SourceProbe>,
    pub gateway: Arc<dyn SourceProbe>,
    pub origin: Arc<dyn SourceProbe>,
}

impl ProbeSet {
    /// Builds the standard torrent, gateway, and origin probes.
    pub fn new(
        torrent_client: Arc<dyn TorrentClient>,
        reachability: Arc<dyn ReachabilityCheck>,
        config: &MediaMeshConfig,
    ) -> Self {
        Self {
            p2p: Arc::new(TorrentProbe::new(
                torrent_client,
                config.torrent.trackers.clone(),
            )),
            gateway: Arc::new(GatewayProbe::new(&config.gateway, reachability)),
            origin: Arc::new(OriginProbe),
        }
    }
}

/// Starts stream sessions. Probe backends are shared by every session the
/// resolver starts.
pub struct StreamResolver {
    probes: ProbeSet,
    config: ResolverConfig,
}

impl StreamResolver {
    pub fn new(probes: ProbeSet, config: ResolverConfig) -> Self {
        Self { probes, config }
    }

    /// Creates a resolver with HTTP gateway checks and no BitTorrent backend.
    ///
    /// # Errors
    /// - `ProbeError::Unavailable` - The HTTP client could not be built
    pub fn from_config(config: &MediaMeshConfig) -> Result<Self, ProbeError> {
        let reachability = Arc::new(HttpReachability::new(config.gateway.user_agent)?);
        let probes = ProbeSet::new(Arc::new(UnavailableTorrentClient), reachability, config);
        Ok(Self::new(probes, config.resolver.clone()))
    }

    /// Validates `references` and starts resolving them.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `ValidationError::MissingField` - Empty primary reference or content address
    /// - `ValidationError::InvalidUrl` - Fallback URL is not http(s)
    pub fn resolve(&self, references: StreamReferences) -> Result<StreamSession, ValidationError> {
        validate_references(&references)?;
        tracing::debug!(
            "Resolving stream for {} / {}",
            references.primary_reference,
            references.content_address
        );
        Ok(StreamSession::start(
            references,
            self.probes.clone(),
            self.config.clone(),
        ))
    }

    /// Starts resolving a catalog entry's references.
    ///
    /// # Errors
    /// Same as `resolve`.
    pub fn resolve_entry(&self, entry: &CatalogEntry) -> Result<StreamSession, ValidationError> {
        self.resolve(StreamReferences::from(entry))
    }
}

/// Structural checks only; format checks belong to the individual probes so
/// that an unusable reference falls through to the next source.
fn validate_references(references: &StreamReferences) -> Result<(), ValidationError> {
    if references.primary_reference.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: "primaryReference",
        });
    }
    if references.content_address.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: "contentAddress",
        });
    }
    if let Some(url) = &references.fallback_url {
        validate_http_url(url, "fallbackURL")?;
    }
    Ok(())
}
