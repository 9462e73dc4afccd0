//! Mock implementations of the probe seams for testing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::probe::{
    ProbeError, ReachabilityCheck, TorrentClient, TorrentFile, TorrentHandle, TransferStats,
};
use crate::reference::{InfoHash, MagnetLink};

/// How a `MockTorrentClient` behaves when a torrent is added.
#[derive(Debug, Clone)]
enum MockBehavior {
    /// Metadata arrives immediately with these files
    Ready(Vec<TorrentFile>),
    /// Metadata never arrives
    Stalled,
    /// Adding fails
    Failing,
}

/// Mock torrent added to a `MockTorrentClient`.
#[derive(Debug)]
pub struct MockTorrent {
    info_hash: InfoHash,
    files: Option<Vec<TorrentFile>>,
    stats: Mutex<TransferStats>,
}

impl MockTorrent {
    /// Replaces the telemetry reported by `stats()`.
    pub fn set_stats(&self, stats: TransferStats) {
        *self.stats.lock() = stats;
    }
}

#[async_trait]
impl TorrentHandle for MockTorrent {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    async fn files(&self) -> Result<Vec<TorrentFile>, ProbeError> {
        match &self.files {
            Some(files) => Ok(files.clone()),
            None => std::future::pending().await,
        }
    }

    async fn stream_url(&self, file: &TorrentFile) -> Result<String, ProbeError> {
        Ok(format!(
            "http://127.0.0.1/stream/{}/{}",
            self.info_hash, file.index
        ))
    }

    fn stats(&self) -> TransferStats {
        *self.stats.lock()
    }
}

/// Mock torrent client with scripted metadata behavior.
#[derive(Debug)]
pub struct MockTorrentClient {
    behavior: MockBehavior,
    torrents: Mutex<HashMap<InfoHash, Arc<MockTorrent>>>,
    last_trackers: Mutex<Vec<String>>,
    add_count: AtomicUsize,
}

impl MockTorrentClient {
    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            torrents: Mutex::new(HashMap::new()),
            last_trackers: Mutex::new(Vec::new()),
            add_count: AtomicUsize::new(0),
        }
    }

    /// Creates a client whose torrents expose `files` right away.
    pub fn with_files(files: Vec<TorrentFile>) -> Self {
        Self::with_behavior(MockBehavior::Ready(files))
    }

    /// Creates a client whose torrents never receive metadata, like a swarm
    /// with no reachable peers.
    pub fn stalled() -> Self {
        Self::with_behavior(MockBehavior::Stalled)
    }

    /// Creates a client that refuses every torrent.
    pub fn failing() -> Self {
        Self::with_behavior(MockBehavior::Failing)
    }

    /// Number of torrents added (reuses excluded).
    pub fn add_count(&self) -> usize {
        self.add_count.load(Ordering::SeqCst)
    }

    /// Trackers passed to the most recent add.
    pub fn last_trackers(&self) -> Vec<String> {
        self.last_trackers.lock().clone()
    }

    /// Torrent added for `info_hash`, for adjusting its telemetry.
    pub fn torrent(&self, info_hash: &InfoHash) -> Option<Arc<MockTorrent>> {
        self.torrents.lock().get(info_hash).cloned()
    }
}

#[async_trait]
impl TorrentClient for MockTorrentClient {
    fn find(&self, info_hash: &InfoHash) -> Option<Arc<dyn TorrentHandle>> {
        self.torrents
            .lock()
            .get(info_hash)
            .map(|torrent| torrent.clone() as Arc<dyn TorrentHandle>)
    }

    async fn add(
        &self,
        magnet: &MagnetLink,
        trackers: &[String],
    ) -> Result<Arc<dyn TorrentHandle>, ProbeError> {
        let files = match &self.behavior {
            MockBehavior::Ready(files) => Some(files.clone()),
            MockBehavior::Stalled => None,
            MockBehavior::Failing => {
                return Err(ProbeError::unavailable("mock torrent client failure"));
            }
        };

        self.add_count.fetch_add(1, Ordering::SeqCst);
        *self.last_trackers.lock() = trackers.to_vec();

        let torrent = Arc::new(MockTorrent {
            info_hash: magnet.info_hash,
            files,
            stats: Mutex::new(TransferStats::default()),
        });
        self.torrents
            .lock()
            .insert(magnet.info_hash, torrent.clone());
        Ok(torrent)
    }
}

/// Mock reachability check answering from a fixed set of reachable URLs.
#[derive(Debug, Default)]
pub struct MockReachability {
    reachable: HashSet<String>,
    delay: Option<Duration>,
    checked: Mutex<Vec<String>>,
}

impl MockReachability {
    /// Creates a checker where only `urls` are reachable.
    pub fn reachable<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reachable: urls.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Creates a checker where nothing is reachable.
    pub fn none() -> Self {
        Self::default()
    }

    /// Delays every answer, to keep a probe in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// URLs checked so far, in order.
    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().clone()
    }
}

#[async_trait]
impl ReachabilityCheck for MockReachability {
    async fn check(&self, url: &str, timeout: Duration) -> Result<(), ProbeError> {
        self.checked.lock().push(url.to_string());

        if let Some(delay) = self.delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(ProbeError::Timeout { after: timeout });
            }
            tokio::time::sleep(delay).await;
        }

        if self.reachable.contains(url) {
            Ok(())
        } else {
            Err(ProbeError::unavailable(format!("mock: {url} unreachable")))
        }
    }
}
