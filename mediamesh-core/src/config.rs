//! Centralized configuration for Mediamesh.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Default relay endpoint used when no peers are configured.
pub const DEFAULT_RELAY_PEER: &str = "http://localhost:8765/gun";

/// Default catalog namespace. Changing it starts an empty catalog.
pub const DEFAULT_NAMESPACE: &str = "p2p-media-catalog-v2";

/// Central configuration for all Mediamesh components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct MediaMeshConfig {
    pub relay: RelayConfig,
    pub catalog: CatalogConfig,
    pub gateway: GatewayConfig,
    pub resolver: ResolverConfig,
    pub torrent: TorrentConfig,
}

/// Relay sync channel configuration.
///
/// Controls which relay peers the transport talks to, how long pulls wait for
/// new facts, and how aggressively failed requests are retried.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay endpoint base URLs
    pub peers: Vec<String>,
    /// Port the relay process listens on
    pub listen_port: u16,
    /// Directory the relay process keeps its fact snapshot in; memory only
    /// when unset
    pub data_dir: Option<PathBuf>,
    /// How often a relay process writes its snapshot when facts changed
    pub snapshot_interval: Duration,
    /// Long-poll wait requested from the relay per pull
    pub poll_wait: Duration,
    /// HTTP request timeout for relay communication
    pub request_timeout: Duration,
    /// First retry delay after a failed relay request
    pub retry_initial: Duration,
    /// Upper bound for the exponential retry delay
    pub retry_max: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            peers: vec![DEFAULT_RELAY_PEER.to_string()],
            listen_port: 8765,
            data_dir: None,
            snapshot_interval: Duration::from_secs(5),
            poll_wait: Duration::from_secs(25),
            request_timeout: Duration::from_secs(30),
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            user_agent: "mediamesh/0.1.0",
        }
    }
}

/// Catalog namespace and input limits.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Namespace partitioning the shared keyspace
    pub namespace: String,
    /// Free-text fields are truncated to this many characters
    pub max_text_len: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_text_len: 500,
        }
    }
}

/// Content-addressed gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Ordered gateway base URLs; resolution is `base + content_address`
    pub gateways: Vec<String>,
    /// Reachability check timeout per gateway
    pub probe_timeout: Duration,
    /// User agent for reachability checks
    pub user_agent: &'static str,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateways: vec![
                "https://ipfs.io/ipfs/".to_string(),
                "https://gateway.pinata.cloud/ipfs/".to_string(),
                "https://cloudflare-ipfs.com/ipfs/".to_string(),
                "https://dweb.link/ipfs/".to_string(),
            ],
            probe_timeout: Duration::from_secs(5),
            user_agent: "mediamesh/0.1.0",
        }
    }
}

/// Stream resolver timing.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upper bound on the P2P probe before falling back to gateways
    pub p2p_timeout: Duration,
    /// Telemetry polling interval while streaming from peers
    pub stats_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            p2p_timeout: Duration::from_secs(8),
            stats_interval: Duration::from_secs(1),
        }
    }
}

/// Torrent client settings handed to the P2P probe backend.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    /// Tracker announce URLs added to every magnet
    pub trackers: Vec<String>,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            trackers: vec![
                "wss://tracker.btorrent.xyz".to_string(),
                "wss://tracker.openwebtorrent.com".to_string(),
                "wss://tracker.webtorrent.dev".to_string(),
                "wss://tracker.fastcast.nz".to_string(),
            ],
        }
    }
}

impl MediaMeshConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(peers) = std::env::var("MEDIAMESH_RELAY_PEERS") {
            let peers = split_list(&peers);
            if !peers.is_empty() {
                config.relay.peers = peers;
            }
        }

        if let Ok(port) = std::env::var("MEDIAMESH_RELAY_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.relay.listen_port = port;
            }
        }

        if let Ok(dir) = std::env::var("MEDIAMESH_RELAY_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                config.relay.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(namespace) = std::env::var("MEDIAMESH_NAMESPACE") {
            let namespace = namespace.trim();
            if !namespace.is_empty() {
                config.catalog.namespace = namespace.to_string();
            }
        }

        if let Ok(gateways) = std::env::var("MEDIAMESH_GATEWAYS") {
            let gateways = split_list(&gateways);
            if !gateways.is_empty() {
                config.gateway.gateways = gateways;
            }
        }

        if let Ok(timeout) = std::env::var("MEDIAMESH_P2P_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.resolver.p2p_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(timeout) = std::env::var("MEDIAMESH_GATEWAY_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.gateway.probe_timeout = Duration::from_secs(seconds);
            }
        }

        config
    }

    /// Rejects settings that would otherwise only fail once in use.
    ///
    /// # Errors
    /// - `MediaMeshError::Configuration` - Empty namespace, a gateway that is
    ///   not an http(s) base URL ending in `/`, or a zero snapshot interval
    pub fn validate(&self) -> crate::Result<()> {
        if self.catalog.namespace.trim().is_empty() {
            return Err(configuration("catalog namespace is empty"));
        }

        for gateway in &self.gateway.gateways {
            let usable = url::Url::parse(gateway)
                .is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
                && gateway.ends_with('/');
            if !usable {
                return Err(configuration(format!(
                    "gateway '{gateway}' must be an http(s) URL ending in '/'"
                )));
            }
        }

        if self.relay.data_dir.is_some() && self.relay.snapshot_interval.is_zero() {
            return Err(configuration("relay snapshot interval must be positive"));
        }

        Ok(())
    }

    /// Creates a configuration with short timeouts for tests.
    pub fn for_testing() -> Self {
        Self {
            relay: RelayConfig {
                peers: Vec::new(),
                poll_wait: Duration::from_millis(50),
                request_timeout: Duration::from_secs(2),
                retry_initial: Duration::from_millis(10),
                retry_max: Duration::from_millis(100),
                ..Default::default()
            },
            catalog: CatalogConfig {
                namespace: "mediamesh-test".to_string(),
                ..Default::default()
            },
            gateway: GatewayConfig {
                gateways: vec!["https://gw.test/ipfs/".to_string()],
                probe_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            resolver: ResolverConfig {
                p2p_timeout: Duration::from_millis(200),
                stats_interval: Duration::from_millis(20),
            },
            torrent: TorrentConfig::default(),
        }
    }
}

fn configuration(reason: impl Into<String>) -> crate::MediaMeshError {
    crate::MediaMeshError::Configuration {
        reason: reason.into(),
    }
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
