//! Relay sync channel.
//!
//! Facts are published to and pulled from one or more relay nodes. Relays are
//! dumb store-and-forward nodes: they keep the latest fact per key and echo
//! every fact to every subscriber, origin included. Merge policy lives in the
//! catalog store, never here.

pub mod client;
pub mod http;
pub mod log;
pub mod memory;
pub mod snapshot;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use client::RelayClient;
pub use http::HttpRelayLink;
pub use log::RelayLog;
pub use memory::{MemoryRelay, MemoryRelayLink};
pub use snapshot::FactSnapshot;

/// Upper bound on facts returned by a single pull.
pub const MAX_FACTS_PER_PULL: usize = 500;

/// Identity of a fact: the publishing peer plus its local sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactId {
    pub origin: String,
    pub sequence: u64,
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.sequence)
    }
}

/// Publication metadata carried alongside a fact value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactMetadata {
    pub fact_id: FactId,
    /// Publisher wall-clock milliseconds
    pub published_at: i64,
}

/// An atomic published value for one key in one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    pub metadata: FactMetadata,
}

/// A fact tagged with the relay-assigned cursor it was stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedFact {
    pub cursor: u64,
    pub fact: Fact,
}

/// Query string of a relay pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullQuery {
    pub namespace: String,
    #[serde(default)]
    pub after: u64,
    #[serde(default)]
    pub wait_ms: u64,
}

/// Body of a relay pull response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullResponse {
    pub facts: Vec<SequencedFact>,
    /// Log instance the cursors belong to. Empty when the relay does not
    /// report one.
    #[serde(default)]
    pub epoch: String,
}

/// Receiving side of a namespace subscription.
pub type FactReceiver = mpsc::UnboundedReceiver<Fact>;

/// Publish/subscribe primitives the catalog store is built on.
///
/// One transport is shared process-wide, possibly by several stores on
/// different namespaces.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Hands a fact to the transport. Resolves once the transport has accepted
    /// it for delivery; propagation to relays and peers happens afterwards.
    ///
    /// # Errors
    /// - `TransportError::Shutdown` - The transport no longer accepts facts
    async fn publish(&self, fact: Fact) -> Result<(), TransportError>;

    /// Streams every fact published under `namespace`, including ones stored
    /// on the relays before the call.
    ///
    /// # Errors
    /// - `TransportError::Shutdown` - The transport has been shut down
    fn subscribe(&self, namespace: &str) -> Result<FactReceiver, TransportError>;

    /// Whether at least one relay answered the most recent request sent to it.
    fn is_connected(&self) -> bool;
}

/// A single relay endpoint.
///
/// The retrying client drives one link per configured relay; implementations
/// perform exactly one attempt per call.
#[async_trait]
pub trait RelayLink: Send + Sync + 'static {
    /// Human-readable endpoint name used in logs and errors.
    fn endpoint(&self) -> &str;

    /// Stores a fact on the relay.
    async fn push(&self, fact: &Fact) -> Result<(), TransportError>;

    /// Returns facts stored under `namespace` with cursor greater than
    /// `after`, waiting up to `wait` for new ones when none are pending,
    /// together with the relay's current log epoch.
    async fn pull(
        &self,
        namespace: &str,
        after: u64,
        wait: Duration,
    ) -> Result<PullResponse, TransportError>;
}

/// Errors that can occur on the relay channel.
///
/// Only `Shutdown` is ever returned to catalog callers; everything else is
/// retried inside the client and reflected in the connectivity flag.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Relay {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Relay {endpoint} rejected request with HTTP {status}")]
    Rejected { endpoint: String, status: u16 },

    #[error("Malformed relay response from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    #[error("Relay client has shut down")]
    Shutdown,
}
