//! In-process relay node, used for local catalogs and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Fact, PullResponse, RelayLink, RelayLog, TransportError};

/// A relay node living in the current process.
///
/// Cloning shares the node. The node can be taken offline to exercise the
/// client's retry path, or restarted to lose its log.
#[derive(Debug, Clone)]
pub struct MemoryRelay {
    name: Arc<str>,
    log: Arc<RwLock<Arc<RelayLog>>>,
    online: Arc<AtomicBool>,
}

impl MemoryRelay {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            log: Arc::new(RwLock::new(Arc::new(RelayLog::new()))),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Replaces the log with an empty one, as a relay process restarting
    /// without persistence would.
    pub fn restart(&self) {
        *self.log.write() = Arc::new(RelayLog::new());
        tracing::info!("Relay {} restarted with an empty log", self.name);
    }

    /// Creates a link a `RelayClient` can drive.
    pub fn link(&self) -> MemoryRelayLink {
        MemoryRelayLink {
            relay: self.clone(),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// The node's current fact log.
    pub fn log(&self) -> Arc<RelayLog> {
        self.log.read().clone()
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(TransportError::Unreachable {
                endpoint: self.name.to_string(),
                reason: "relay offline".to_string(),
            })
        }
    }
}

/// Link to a `MemoryRelay`.
#[derive(Debug, Clone)]
pub struct MemoryRelayLink {
    relay: MemoryRelay,
}

#[async_trait]
impl RelayLink for MemoryRelayLink {
    fn endpoint(&self) -> &str {
        &self.relay.name
    }

    async fn push(&self, fact: &Fact) -> Result<(), TransportError> {
        self.relay.check_online()?;
        self.relay.log().append(fact.clone());
        Ok(())
    }

    async fn pull(
        &self,
        namespace: &str,
        after: u64,
        wait: Duration,
    ) -> Result<PullResponse, TransportError> {
        self.relay.check_online()?;
        let log = self.relay.log();
        let facts = log.wait_for_facts(namespace, after, wait).await;
        // Going offline or restarting mid-wait drops the response, as a broken
        // connection would.
        self.relay.check_online()?;
        if !Arc::ptr_eq(&log, &self.relay.log()) {
            return Err(TransportError::Unreachable {
                endpoint: self.relay.name.to_string(),
                reason: "relay restarted".to_string(),
            });
        }

        Ok(PullResponse {
            facts,
            epoch: log.epoch().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{FactId, FactMetadata};

    fn fact(key: &str) -> Fact {
        Fact {
            namespace: "ns".to_string(),
            key: key.to_string(),
            value: serde_json::json!({ "id": key }),
            metadata: FactMetadata {
                fact_id: FactId {
                    origin: "peer".to_string(),
                    sequence: 1,
                },
                published_at: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_push_then_pull() {
        let relay = MemoryRelay::new("memory://relay");
        let link = relay.link();

        link.push(&fact("a")).await.unwrap();
        let pulled = link.pull("ns", 0, Duration::ZERO).await.unwrap();

        assert_eq!(pulled.facts.len(), 1);
        assert_eq!(pulled.epoch, relay.log().epoch());
        assert_eq!(link.endpoint(), "memory://relay");
    }

    #[tokio::test]
    async fn test_restart_drops_facts_and_changes_epoch() {
        let relay = MemoryRelay::new("memory://relay");
        let link = relay.link();
        link.push(&fact("a")).await.unwrap();
        let before = link.pull("ns", 0, Duration::ZERO).await.unwrap();

        relay.restart();
        let after = link.pull("ns", 0, Duration::ZERO).await.unwrap();

        assert!(after.facts.is_empty());
        assert_ne!(after.epoch, before.epoch);
        assert_eq!(relay.log().key_count("ns"), 0);
    }

    #[tokio::test]
    async fn test_offline_relay_is_unreachable() {
        let relay = MemoryRelay::new("memory://relay");
        relay.set_online(false);

        let link = relay.link();
        assert!(matches!(
            link.push(&fact("a")).await,
            Err(TransportError::Unreachable { .. })
        ));
        assert!(link.pull("ns", 0, Duration::ZERO).await.is_err());
        assert_eq!(relay.log().key_count("ns"), 0);
    }
}
