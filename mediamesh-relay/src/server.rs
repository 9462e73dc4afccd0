//! Relay HTTP server.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::get;
use mediamesh_core::MediaMeshError;
use mediamesh_core::config::RelayConfig;
use mediamesh_core::relay::{FactSnapshot, RelayLog};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::handlers::{health, pull_facts, push_facts};

/// Path prefix clients use as their relay base URL.
pub const RELAY_BASE_PATH: &str = "/gun";

/// Shared state of a running relay.
#[derive(Clone)]
pub struct RelayState {
    pub log: Arc<RelayLog>,
    pub started_at: Instant,
}

impl RelayState {
    pub fn new(log: Arc<RelayLog>) -> Self {
        Self {
            log,
            started_at: Instant::now(),
        }
    }
}

/// Errors that stop the relay server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to bind relay listener on {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("Relay server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Relay snapshot error: {0}")]
    Snapshot(#[from] MediaMeshError),
}

/// Builds the relay router.
///
/// `GET /`, `GET /health` and `GET /gun/health` report status;
/// `POST /gun/facts` stores a fact; `GET /gun/facts` long-polls for facts
/// after a cursor.
pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route(&format!("{RELAY_BASE_PATH}/health"), get(health))
        .route(
            &format!("{RELAY_BASE_PATH}/facts"),
            get(pull_facts).post(push_facts),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves a relay on `0.0.0.0:{listen_port}` until Ctrl-C or SIGTERM.
///
/// With a data directory configured the log is restored from its snapshot on
/// start, saved periodically while facts change, and saved once more on
/// shutdown.
///
/// # Errors
/// - `RelayError::Bind` - The port could not be bound
/// - `RelayError::Snapshot` - The snapshot could not be read or the final
///   save failed
/// - `RelayError::Serve` - The server failed while running
pub async fn run_relay(config: &RelayConfig) -> Result<(), RelayError> {
    let snapshot = config.data_dir.as_deref().map(FactSnapshot::in_dir);
    let log = match &snapshot {
        Some(snapshot) => snapshot.load().await?.unwrap_or_default(),
        None => RelayLog::new(),
    };
    let log = Arc::new(log);

    let address = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.listen_port));
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|source| RelayError::Bind { address, source })?;

    tracing::info!("Mediamesh relay listening on http://{}", address);
    tracing::info!("Relay endpoint: {}", RELAY_BASE_PATH);
    tracing::info!("Health check: /health");
    match &snapshot {
        Some(snapshot) => tracing::info!("Persisting facts to {}", snapshot.path().display()),
        None => tracing::warn!("No data directory set, facts are kept in memory only"),
    }

    let snapshot_task = snapshot
        .clone()
        .map(|snapshot| spawn_snapshot_task(snapshot, log.clone(), config.snapshot_interval));

    let app = relay_router(RelayState::new(log.clone()));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(task) = snapshot_task {
        task.abort();
    }
    if let Some(snapshot) = &snapshot {
        snapshot.save(&log).await?;
    }
    served?;

    tracing::info!("Relay server closed");
    Ok(())
}

/// Saves the log every `interval` when new facts arrived since the last save.
fn spawn_snapshot_task(
    snapshot: FactSnapshot,
    log: Arc<RelayLog>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut saved_cursor = log.last_cursor();
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let cursor = log.last_cursor();
            if cursor == saved_cursor {
                continue;
            }
            match snapshot.save(&log).await {
                Ok(()) => saved_cursor = cursor,
                Err(e) => tracing::error!("Failed to save relay snapshot: {}", e),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received, closing relay");
}
