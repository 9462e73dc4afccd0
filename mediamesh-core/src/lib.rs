//! Mediamesh Core - Peer-to-peer media catalog and stream resolution
//!
//! This crate provides the building blocks for a serverless media catalog:
//! a relay sync channel, a converging catalog store on top of it, source
//! probes for torrents, content-addressed gateways and origin URLs, and the
//! resolver that arbitrates between them.

pub mod catalog;
pub mod config;
pub mod probe;
pub mod reference;
pub mod relay;
pub mod resolver;
pub mod test_mocks;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use catalog::{CatalogEntry, CatalogError, CatalogStore, MediaKind, ValidationError};
pub use config::MediaMeshConfig;
pub use probe::{ProbeError, SourceKind, StreamReferences, TransferStats};
pub use relay::{HttpRelayLink, RelayClient, RelayTransport, TransportError};
pub use resolver::{PlaybackError, ResolutionFailed, SourceState, StreamResolver, StreamSession};

/// Errors that can bubble up from any Mediamesh subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MediaMeshError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("{0}")]
    Resolution(#[from] ResolutionFailed),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaMeshError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            MediaMeshError::Catalog(CatalogError::Validation(e)) | MediaMeshError::Validation(e) => {
                format!("Invalid entry: {e}")
            }
            MediaMeshError::Catalog(CatalogError::Transport(_)) | MediaMeshError::Transport(_) => {
                "Catalog sync is unavailable".to_string()
            }
            MediaMeshError::Catalog(_) => "Catalog error occurred".to_string(),
            MediaMeshError::Probe(_) => "Stream source check failed".to_string(),
            MediaMeshError::Resolution(e) => {
                format!("Could not play this media ({} source failed)", e.last_source)
            }
            MediaMeshError::Configuration { reason } => format!("Configuration error: {reason}"),
            MediaMeshError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            MediaMeshError::Validation(_)
                | MediaMeshError::Catalog(CatalogError::Validation(_))
                | MediaMeshError::Configuration { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MediaMeshError>;
