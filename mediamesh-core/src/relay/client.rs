//! Retrying relay client shared by every catalog store in a process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use super::{Fact, FactReceiver, RelayLink, RelayTransport, TransportError};
use crate::config::RelayConfig;

/// Relay transport fanning out to any number of relay links.
///
/// Each link gets a push worker draining its own outbox, so one unreachable
/// relay never delays delivery to the others. Failed requests are retried
/// with exponential backoff until they succeed or the client shuts down.
/// With no links the client is purely local: publishes are acknowledged and
/// subscriptions only ever see what the store applied itself.
///
/// When a relay reports a new log epoch the client rewinds that link's
/// subscriptions to cursor 0 and republishes the latest fact it knows for
/// every key, so a relay that lost its log is repopulated.
pub struct RelayClient {
    links: Vec<Arc<dyn RelayLink>>,
    outboxes: Vec<mpsc::UnboundedSender<Fact>>,
    link_up: Arc<Vec<AtomicBool>>,
    pending: Arc<PendingPushes>,
    known: Arc<KnownFacts>,
    config: RelayConfig,
    shutdown: CancellationToken,
}

impl RelayClient {
    /// Creates the client and spawns one push worker per link.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(links: Vec<Arc<dyn RelayLink>>, config: RelayConfig) -> Self {
        let shutdown = CancellationToken::new();
        let link_up = Arc::new(links.iter().map(|_| AtomicBool::new(false)).collect::<Vec<_>>());
        let pending = Arc::new(PendingPushes::default());

        let outboxes = links
            .iter()
            .enumerate()
            .map(|(index, link)| {
                let (sender, receiver) = mpsc::unbounded_channel();
                tokio::spawn(run_push_worker(
                    link.clone(),
                    receiver,
                    LinkStatus::new(link_up.clone(), index),
                    pending.clone(),
                    Backoff::new(&config),
                    shutdown.clone(),
                ));
                sender
            })
            .collect();

        Self {
            links,
            outboxes,
            link_up,
            pending,
            known: Arc::new(KnownFacts::default()),
            config,
            shutdown,
        }
    }

    /// Number of relay links this client drives.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Stops every worker. Later publishes and subscriptions fail with
    /// `TransportError::Shutdown`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Waits until every queued fact reached every relay, for at most
    /// `timeout`. Returns false if deliveries were still outstanding.
    pub async fn flush(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.pending.drained())
            .await
            .is_ok()
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl RelayTransport for RelayClient {
    async fn publish(&self, fact: Fact) -> Result<(), TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::Shutdown);
        }

        if !self.outboxes.is_empty() {
            self.known.record(&fact);
        }

        self.pending.add(self.outboxes.len());
        for outbox in &self.outboxes {
            outbox
                .send(fact.clone())
                .map_err(|_| TransportError::Shutdown)?;
        }

        tracing::trace!(
            "Queued fact {} for {} relay(s)",
            fact.metadata.fact_id,
            self.outboxes.len()
        );
        Ok(())
    }

    fn subscribe(&self, namespace: &str) -> Result<FactReceiver, TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::Shutdown);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        for (index, link) in self.links.iter().enumerate() {
            let worker = PullWorker {
                link: link.clone(),
                namespace: namespace.to_string(),
                sender: sender.clone(),
                outbox: self.outboxes[index].clone(),
                status: LinkStatus::new(self.link_up.clone(), index),
                pending: self.pending.clone(),
                known: self.known.clone(),
                backoff: Backoff::new(&self.config),
                poll_wait: self.config.poll_wait,
                shutdown: self.shutdown.clone(),
            };
            tokio::spawn(worker.run());
        }

        Ok(receiver)
    }

    fn is_connected(&self) -> bool {
        self.link_up.iter().any(|up| up.load(Ordering::SeqCst))
    }
}

/// Connectivity flag of one link.
struct LinkStatus {
    flags: Arc<Vec<AtomicBool>>,
    index: usize,
}

impl LinkStatus {
    fn new(flags: Arc<Vec<AtomicBool>>, index: usize) -> Self {
        Self { flags, index }
    }

    fn mark(&self, up: bool, endpoint: &str) {
        let was_up = self.flags[self.index].swap(up, Ordering::SeqCst);
        if was_up != up {
            if up {
                tracing::info!("Connected to relay {}", endpoint);
            } else {
                tracing::warn!("Lost connection to relay {}", endpoint);
            }
        }
    }
}

/// Count of queued pushes not yet accepted by their relay.
#[derive(Debug, Default)]
struct PendingPushes {
    count: AtomicUsize,
    drained: Notify,
}

impl PendingPushes {
    fn add(&self, pushes: usize) {
        self.count.fetch_add(pushes, Ordering::SeqCst);
    }

    fn complete(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Latest fact this client published or pulled, per namespace and key.
#[derive(Debug, Default)]
struct KnownFacts {
    namespaces: Mutex<HashMap<String, BTreeMap<String, Fact>>>,
}

impl KnownFacts {
    fn record(&self, fact: &Fact) {
        self.namespaces
            .lock()
            .entry(fact.namespace.clone())
            .or_default()
            .insert(fact.key.clone(), fact.clone());
    }

    fn namespace(&self, namespace: &str) -> Vec<Fact> {
        self.namespaces
            .lock()
            .get(namespace)
            .map(|facts| facts.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Exponential retry delay.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(config: &RelayConfig) -> Self {
        Self {
            initial: config.retry_initial,
            max: config.retry_max,
            current: config.retry_initial,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

async fn run_push_worker(
    link: Arc<dyn RelayLink>,
    mut outbox: mpsc::UnboundedReceiver<Fact>,
    status: LinkStatus,
    pending: Arc<PendingPushes>,
    mut backoff: Backoff,
    shutdown: CancellationToken,
) {
    loop {
        let fact = tokio::select! {
            _ = shutdown.cancelled() => return,
            fact = outbox.recv() => match fact {
                Some(fact) => fact,
                None => return,
            },
        };

        loop {
            match link.push(&fact).await {
                Ok(()) => {
                    status.mark(true, link.endpoint());
                    pending.complete();
                    backoff.reset();
                    break;
                }
                Err(e) => {
                    status.mark(false, link.endpoint());
                    let delay = backoff.next_delay();
                    tracing::debug!(
                        "Push of {} to {} failed, retrying in {:?}: {}",
                        fact.metadata.fact_id,
                        link.endpoint(),
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Tails one namespace on one link.
struct PullWorker {
    link: Arc<dyn RelayLink>,
    namespace: String,
    sender: mpsc::UnboundedSender<Fact>,
    /// Push queue of the same link, used to repopulate a restarted relay
    outbox: mpsc::UnboundedSender<Fact>,
    status: LinkStatus,
    pending: Arc<PendingPushes>,
    known: Arc<KnownFacts>,
    backoff: Backoff,
    poll_wait: Duration,
    shutdown: CancellationToken,
}

impl PullWorker {
    async fn run(mut self) {
        let mut cursor = 0u64;
        let mut epoch: Option<String> = None;

        loop {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = self.sender.closed() => return,
                result = self.link.pull(&self.namespace, cursor, self.poll_wait) => result,
            };

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    self.status.mark(false, self.link.endpoint());
                    let delay = self.backoff.next_delay();
                    tracing::debug!(
                        "Pull of '{}' from {} failed, retrying in {:?}: {}",
                        self.namespace,
                        self.link.endpoint(),
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = self.sender.closed() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            self.status.mark(true, self.link.endpoint());
            self.backoff.reset();

            if !response.epoch.is_empty() && epoch.as_deref() != Some(response.epoch.as_str()) {
                let restarted = epoch.is_some();
                epoch = Some(response.epoch);
                if restarted {
                    tracing::info!(
                        "Relay {} started a new log, resyncing '{}' from the beginning",
                        self.link.endpoint(),
                        self.namespace
                    );
                    cursor = 0;
                    if !self.republish_known() {
                        return;
                    }
                    continue;
                }
            }

            for sequenced in response.facts {
                cursor = cursor.max(sequenced.cursor);
                self.known.record(&sequenced.fact);
                if self.sender.send(sequenced.fact).is_err() {
                    return;
                }
            }
        }
    }

    /// Queues every known fact of the namespace for this link. Returns false
    /// once the push worker is gone.
    fn republish_known(&self) -> bool {
        let facts = self.known.namespace(&self.namespace);
        tracing::debug!(
            "Republishing {} fact(s) of '{}' to {}",
            facts.len(),
            self.namespace,
            self.link.endpoint()
        );

        for fact in facts {
            self.pending.add(1);
            if self.outbox.send(fact).is_err() {
                self.pending.complete();
                return false;
            }
        }
        true
    }
}
