//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Subcommand;
use mediamesh_core::catalog::generate_id;
use mediamesh_core::config::RelayConfig;
use mediamesh_core::relay::{HttpRelayLink, RelayClient, RelayLink, RelayTransport};
use mediamesh_core::resolver::SessionState;
use mediamesh_core::{
    CatalogEntry, CatalogStore, MediaKind, MediaMeshConfig, MediaMeshError, SourceState,
    StreamResolver,
};

/// How long one-shot commands wait for their writes to reach the relays.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a relay node
    Relay {
        /// Port to listen on (defaults to MEDIAMESH_RELAY_PORT or 8765)
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory to persist facts in (defaults to MEDIAMESH_RELAY_DATA_DIR;
        /// memory only when neither is set)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Publish a catalog entry
    Publish {
        #[arg(long)]
        title: String,
        /// Magnet URI of the torrent
        #[arg(long)]
        magnet: String,
        /// Content identifier on the gateway network
        #[arg(long)]
        cid: String,
        #[arg(long, default_value = "video")]
        kind: MediaKind,
        /// Direct URL used when peers and gateways fail
        #[arg(long)]
        fallback_url: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        thumbnail_url: Option<String>,
    },
    /// Remove a catalog entry
    Remove {
        /// Entry id
        id: String,
    },
    /// List the catalog
    List {
        /// Seconds to wait for the catalog to sync
        #[arg(long, default_value = "3")]
        wait_secs: u64,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Publish the built-in sample entries
    Seed,
    /// Resolve a playable stream for an entry
    Resolve {
        /// Entry id
        id: String,
        /// Seconds to wait for the entry to sync
        #[arg(long, default_value = "5")]
        wait_secs: u64,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let mut config = MediaMeshConfig::from_env();
    if let Commands::Relay { port, data_dir } = &command {
        if let Some(port) = port {
            config.relay.listen_port = *port;
        }
        if let Some(dir) = data_dir {
            config.relay.data_dir = Some(dir.clone());
        }
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    tracing::debug!("Relay peers: {:?}", config.relay.peers);

    match command {
        Commands::Relay { .. } => run_relay(&config.relay).await,
        Commands::Publish {
            title,
            magnet,
            cid,
            kind,
            fallback_url,
            description,
            category,
            thumbnail_url,
        } => {
            let mut entry = CatalogEntry::new(generate_id(), title, magnet, cid, kind);
            entry.fallback_url = fallback_url;
            entry.description = description;
            entry.category = category;
            entry.thumbnail_url = thumbnail_url;
            publish_entry(&config, entry).await
        }
        Commands::Remove { id } => remove_entry(&config, &id).await,
        Commands::List { wait_secs, json } => {
            list_entries(&config, Duration::from_secs(wait_secs), json).await
        }
        Commands::Seed => seed_catalog(&config).await,
        Commands::Resolve { id, wait_secs } => {
            resolve_entry(&config, &id, Duration::from_secs(wait_secs)).await
        }
    }
}

/// Run a relay node until Ctrl-C or SIGTERM
///
/// # Errors
/// - `RelayError::Bind` - The port is unavailable
/// - `RelayError::Snapshot` - The data directory is unreadable or unwritable
pub async fn run_relay(config: &RelayConfig) -> anyhow::Result<()> {
    let port = config.listen_port;
    println!("Starting relay on port {port}");
    if let Some(dir) = &config.data_dir {
        println!("Persisting facts in {}", dir.display());
    }
    mediamesh_relay::run_relay(config)
        .await
        .with_context(|| format!("relay on port {port} failed"))
}

/// Publish a single entry and wait for the relays to accept it
///
/// # Errors
/// - `CatalogError::Validation` - The entry is incomplete or malformed
pub async fn publish_entry(config: &MediaMeshConfig, entry: CatalogEntry) -> anyhow::Result<()> {
    let session = CatalogSession::connect(config)?;

    let stored = session
        .store
        .put(entry)
        .await
        .map_err(|e| anyhow::anyhow!(MediaMeshError::from(e).user_message()))?;

    println!("Published '{}' as {}", stored.title, stored.id);
    session.finish().await;
    Ok(())
}

/// Remove an entry by id
///
/// # Errors
/// - `CatalogError::Transport` - The relay client shut down
pub async fn remove_entry(config: &MediaMeshConfig, id: &str) -> anyhow::Result<()> {
    let session = CatalogSession::connect(config)?;
    session.store.remove(id).await?;

    println!("Removed {id}");
    session.finish().await;
    Ok(())
}

/// Publish the built-in sample entries
///
/// # Errors
/// Returns an error if no relay peer is configured
pub async fn seed_catalog(config: &MediaMeshConfig) -> anyhow::Result<()> {
    let session = CatalogSession::connect(config)?;
    let published = session.store.seed_samples().await;

    println!("Published {published} sample entries");
    session.finish().await;
    Ok(())
}

/// Print the synced catalog
///
/// # Errors
/// Returns an error if no relay peer is configured
pub async fn list_entries(
    config: &MediaMeshConfig,
    wait: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let session = CatalogSession::connect(config)?;
    tokio::time::sleep(wait).await;

    if !session.store.is_connected() {
        eprintln!("Warning: no relay reachable, catalog may be incomplete");
    }

    let entries = session.store.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Catalog is empty");
        return Ok(());
    }

    println!("Catalog ({} entries):", entries.len());
    for entry in &entries {
        println!("  {} [{}] {}", entry.id, entry.media_kind, entry.title);
        if let Some(category) = &entry.category {
            println!("    Category: {category}");
        }
        if let Some(description) = &entry.description {
            println!("    {description}");
        }
    }
    Ok(())
}

/// Resolve the best playable source for an entry
///
/// # Errors
/// - `MediaMeshError::Resolution` - Every source failed
/// - Entry not found within the wait period
pub async fn resolve_entry(
    config: &MediaMeshConfig,
    id: &str,
    wait: Duration,
) -> anyhow::Result<()> {
    let session = CatalogSession::connect(config)?;
    let entry = wait_for_entry(&session.store, id, wait)
        .await
        .with_context(|| format!("entry {id} not found in the catalog"))?;

    println!("Resolving '{}'", entry.title);

    let resolver = StreamResolver::from_config(config)?;
    let stream = resolver.resolve_entry(&entry)?;

    let Some(state) = stream.wait_until_settled().await else {
        bail!("resolution cancelled");
    };

    stream.dispose();
    report_settled(&state, &stream.transitions())
}

fn report_settled(state: &SessionState, transitions: &[SourceState]) -> anyhow::Result<()> {
    let path: Vec<String> = transitions.iter().map(ToString::to_string).collect();
    println!("  Path: {}", path.join(" -> "));

    if let Some(failure) = &state.failure {
        bail!(MediaMeshError::from(failure.clone()).user_message());
    }

    if let Some(url) = &state.resolved_handle {
        println!("  Source: {}", state.source_state);
        println!("  Stream URL: {url}");
    }
    Ok(())
}

async fn wait_for_entry(store: &CatalogStore, id: &str, wait: Duration) -> Option<CatalogEntry> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if let Some(entry) = store.get(id) {
            return Some(entry);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Relay client plus catalog store for one command run.
struct CatalogSession {
    client: Arc<RelayClient>,
    store: CatalogStore,
}

impl CatalogSession {
    fn connect(config: &MediaMeshConfig) -> anyhow::Result<Self> {
        let links: Vec<Arc<dyn RelayLink>> = HttpRelayLink::from_config(&config.relay)
            .into_iter()
            .map(|link| Arc::new(link) as Arc<dyn RelayLink>)
            .collect();
        if links.is_empty() {
            bail!("no usable relay peers configured (set MEDIAMESH_RELAY_PEERS)");
        }

        let client = Arc::new(RelayClient::new(links, config.relay.clone()));
        let store = CatalogStore::new(client.clone() as Arc<dyn RelayTransport>, &config.catalog)?;
        Ok(Self { client, store })
    }

    async fn finish(self) {
        if !self.client.flush(FLUSH_TIMEOUT).await {
            eprintln!("Warning: not every relay confirmed the update; it will sync when reachable");
        }
        self.client.shutdown();
    }
}
