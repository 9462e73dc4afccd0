//! Peer-to-peer probe backed by a pluggable torrent client.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{PlayableHandle, ProbeError, SourceKind, SourceProbe, StreamReferences, TransferStats};
use crate::catalog::MediaKind;
use crate::reference::{InfoHash, MagnetLink};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "avi", "mov"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "flac", "m4a", "wav"];

/// One file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    pub index: usize,
    pub name: String,
    pub length: u64,
}

impl TorrentFile {
    pub fn new(index: usize, name: impl Into<String>, length: u64) -> Self {
        Self {
            index,
            name: name.into(),
            length,
        }
    }

    fn extension(&self) -> Option<String> {
        let (_, extension) = self.name.rsplit_once('.')?;
        Some(extension.to_ascii_lowercase())
    }
}

/// A torrent added to a client.
#[async_trait]
pub trait TorrentHandle: Send + Sync {
    fn info_hash(&self) -> InfoHash;

    /// Waits for torrent metadata and returns the file list.
    async fn files(&self) -> Result<Vec<TorrentFile>, ProbeError>;

    /// Returns a URL a player can stream `file` from while it downloads.
    async fn stream_url(&self, file: &TorrentFile) -> Result<String, ProbeError>;

    /// Current swarm telemetry.
    fn stats(&self) -> TransferStats;
}

/// BitTorrent client the P2P probe drives.
///
/// Clients may be shared by many sessions; a torrent already added for the
/// same info hash is reused rather than added twice.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Torrent previously added for `info_hash`, if still active.
    fn find(&self, info_hash: &InfoHash) -> Option<Arc<dyn TorrentHandle>>;

    /// Adds a magnet with extra tracker announce URLs.
    ///
    /// # Errors
    /// - `ProbeError::Unavailable` - The client cannot start the torrent
    async fn add(
        &self,
        magnet: &MagnetLink,
        trackers: &[String],
    ) -> Result<Arc<dyn TorrentHandle>, ProbeError>;
}

/// Client used when no BitTorrent stack is linked in. Every add fails, so
/// resolution falls through to the gateway stage straight away.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTorrentClient;

#[async_trait]
impl TorrentClient for UnavailableTorrentClient {
    fn find(&self, _info_hash: &InfoHash) -> Option<Arc<dyn TorrentHandle>> {
        None
    }

    async fn add(
        &self,
        _magnet: &MagnetLink,
        _trackers: &[String],
    ) -> Result<Arc<dyn TorrentHandle>, ProbeError> {
        Err(ProbeError::unavailable(
            "no BitTorrent client available in this build",
        ))
    }
}

/// Picks the largest file whose extension is playable for `media_kind`.
///
/// Video references accept video containers only; audio references accept
/// audio formats as well as video containers.
pub fn select_playable_file(files: &[TorrentFile], media_kind: MediaKind) -> Option<&TorrentFile> {
    files
        .iter()
        .filter(|file| {
            file.extension().is_some_and(|extension| {
                VIDEO_EXTENSIONS.contains(&extension.as_str())
                    || (media_kind == MediaKind::Audio
                        && AUDIO_EXTENSIONS.contains(&extension.as_str()))
            })
        })
        .max_by_key(|file| file.length)
}

/// P2P probe: magnet in, stream URL of the best playable file out.
pub struct TorrentProbe {
    client: Arc<dyn TorrentClient>,
    trackers: Vec<String>,
}

impl TorrentProbe {
    pub fn new(client: Arc<dyn TorrentClient>, trackers: Vec<String>) -> Self {
        Self { client, trackers }
    }

    async fn open(&self, magnet: &MagnetLink) -> Result<Arc<dyn TorrentHandle>, ProbeError> {
        if let Some(existing) = self.client.find(&magnet.info_hash) {
            tracing::debug!("Reusing existing torrent {}", magnet.info_hash);
            return Ok(existing);
        }

        tracing::debug!("Adding torrent {}", magnet.info_hash);
        self.client.add(magnet, &self.trackers).await
    }

    async fn resolve(
        &self,
        magnet: &MagnetLink,
        media_kind: MediaKind,
    ) -> Result<PlayableHandle, ProbeError> {
        let torrent = self.open(magnet).await?;
        let files = torrent.files().await?;

        let file = select_playable_file(&files, media_kind).ok_or_else(|| {
            ProbeError::unavailable(format!("no playable {media_kind} file in torrent"))
        })?;

        let url = torrent.stream_url(file).await?;
        tracing::info!(
            "Torrent {} ready, streaming '{}' ({} bytes)",
            magnet.info_hash,
            file.name,
            file.length
        );

        Ok(PlayableHandle {
            url,
            torrent: Some(torrent),
        })
    }
}

#[async_trait]
impl SourceProbe for TorrentProbe {
    fn kind(&self) -> SourceKind {
        SourceKind::P2p
    }

    async fn probe(
        &self,
        references: &StreamReferences,
        cancel: CancellationToken,
    ) -> Result<PlayableHandle, ProbeError> {
        let magnet = MagnetLink::parse(&references.primary_reference)
            .map_err(|e| ProbeError::unavailable(e.to_string()))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProbeError::Cancelled),
            result = self.resolve(&magnet, references.media_kind) => result,
        }
    }
}
