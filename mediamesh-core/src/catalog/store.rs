//! Converged catalog view over a relay namespace.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::entry::{CatalogEntry, EntryRecord};
use super::merge::{ApplyOutcome, MergeTable, Snapshot};
use super::samples::sample_entries;
use super::validation::{ValidationError, sanitize_entry, validate_entry};
use super::CatalogError;
use crate::config::CatalogConfig;
use crate::relay::{Fact, FactId, FactMetadata, FactReceiver, RelayTransport};

type Callback = Box<dyn Fn(&[CatalogEntry]) + Send + Sync>;

/// Distributed catalog store.
///
/// Applies facts from the relay namespace (and its own writes) to a per-key
/// merge table and pushes the visible snapshot to subscribers whenever it
/// changes. Cloning shares the store.
#[derive(Clone)]
pub struct CatalogStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    namespace: String,
    origin: String,
    last_sequence: AtomicU64,
    max_text_len: usize,
    transport: Arc<dyn RelayTransport>,
    table: Mutex<MergeTable>,
    listeners: Mutex<BTreeMap<u64, Arc<Listener>>>,
    last_listener_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl CatalogStore {
    /// Creates a store on `config.namespace` and starts applying facts
    /// received from the transport.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `CatalogError::Transport` - The transport refused the subscription
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        config: &CatalogConfig,
    ) -> Result<Self, CatalogError> {
        let receiver = transport.subscribe(&config.namespace)?;

        let inner = Arc::new(StoreInner {
            namespace: config.namespace.clone(),
            origin: uuid::Uuid::new_v4().to_string(),
            last_sequence: AtomicU64::new(0),
            max_text_len: config.max_text_len,
            transport,
            table: Mutex::new(MergeTable::new()),
            listeners: Mutex::new(BTreeMap::new()),
            last_listener_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_ingest_loop(
            Arc::downgrade(&inner),
            receiver,
            inner.shutdown.clone(),
        ));

        tracing::debug!(
            "Catalog store {} subscribed to namespace '{}'",
            inner.origin,
            inner.namespace
        );
        Ok(Self { inner })
    }

    /// Validates and publishes an entry, returning it as stored.
    ///
    /// Stamps `created_at` and `added_by` when absent, applies the entry
    /// locally, and resolves once the transport accepted the broadcast.
    /// Delivery to other peers is asynchronous and best-effort.
    ///
    /// # Errors
    /// - `CatalogError::Validation` - Missing or malformed fields; nothing is published
    /// - `CatalogError::Transport` - The transport has shut down
    pub async fn put(&self, entry: CatalogEntry) -> Result<CatalogEntry, CatalogError> {
        let mut entry = sanitize_entry(entry, self.inner.max_text_len);
        validate_entry(&entry)?;

        if entry.created_at.is_none() {
            entry.created_at = Some(now_millis());
        }
        if entry.added_by.is_none() {
            entry.added_by = Some("anonymous".to_string());
        }

        self.publish(entry.clone().into_record()).await?;
        tracing::info!("Published catalog entry '{}' ({})", entry.title, entry.id);
        Ok(entry)
    }

    /// Soft-deletes an entry by writing a tombstone fact under its key.
    ///
    /// # Errors
    /// - `CatalogError::Validation` - Empty id
    /// - `CatalogError::Transport` - The transport has shut down
    pub async fn remove(&self, id: &str) -> Result<(), CatalogError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ValidationError::MissingField { field: "id" }.into());
        }

        self.publish(EntryRecord::tombstone(id, now_millis())).await?;
        tracing::info!("Tombstoned catalog entry {}", id);
        Ok(())
    }

    /// Registers a snapshot listener.
    ///
    /// The callback receives the current snapshot right away and then every
    /// changed snapshot, newest entry first. Callbacks for one listener never
    /// overlap and never go backwards in time; a panicking callback is logged
    /// and does not affect other listeners or fact application. Dropping the
    /// returned handle unsubscribes.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[CatalogEntry]) + Send + Sync + 'static,
    {
        let id = self.inner.last_listener_id.fetch_add(1, Ordering::SeqCst) + 1;
        let listener = Arc::new(Listener::new(id, Box::new(callback)));

        self.inner.listeners.lock().insert(id, listener.clone());
        let snapshot = self.inner.table.lock().snapshot();
        listener.offer(snapshot);

        Subscription {
            store: Arc::downgrade(&self.inner),
            listener,
        }
    }

    /// Current visible entry for `id`.
    pub fn get(&self, id: &str) -> Option<CatalogEntry> {
        self.inner.table.lock().get(id)
    }

    /// Current visible snapshot, newest first.
    pub fn snapshot(&self) -> Vec<CatalogEntry> {
        self.inner.table.lock().snapshot().entries.to_vec()
    }

    /// Raw record stored for `id`, tombstones and partial records included.
    pub fn record(&self, id: &str) -> Option<EntryRecord> {
        self.inner.table.lock().record(id).cloned()
    }

    /// Number of keys held, tombstones and partial records included.
    pub fn key_count(&self) -> usize {
        self.inner.table.lock().key_count()
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Whether the underlying transport currently reaches a relay.
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Publishes the built-in sample catalog. Failures are logged and skipped;
    /// returns how many samples were published.
    pub async fn seed_samples(&self) -> usize {
        let mut published = 0;
        for sample in sample_entries() {
            let title = sample.title.clone();
            match self.put(sample).await {
                Ok(_) => published += 1,
                Err(e) => tracing::error!("Failed to add sample '{}': {}", title, e),
            }
        }
        published
    }

    /// Applies one received fact and notifies listeners if the visible
    /// snapshot changed.
    ///
    /// Facts for other namespaces, undecodable values, and values whose id
    /// disagrees with the fact key are dropped.
    pub fn apply_fact(&self, fact: Fact) -> ApplyOutcome {
        if fact.namespace != self.inner.namespace {
            tracing::trace!(
                "Ignoring fact for namespace '{}' in store for '{}'",
                fact.namespace,
                self.inner.namespace
            );
            return ApplyOutcome::Rejected;
        }

        let record: EntryRecord = match serde_json::from_value(fact.value) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("Dropping undecodable fact {}: {}", fact.metadata.fact_id, e);
                return ApplyOutcome::Rejected;
            }
        };

        if record.id.is_empty() || record.id != fact.key {
            tracing::debug!(
                "Dropping fact {} whose body id '{}' does not match key '{}'",
                fact.metadata.fact_id,
                record.id,
                fact.key
            );
            return ApplyOutcome::Rejected;
        }

        self.inner.apply_record(fact.metadata.fact_id, record)
    }

    async fn publish(&self, record: EntryRecord) -> Result<(), CatalogError> {
        let sequence = self.inner.last_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let fact = Fact {
            namespace: self.inner.namespace.clone(),
            key: record.id.clone(),
            value: serde_json::to_value(&record)?,
            metadata: FactMetadata {
                fact_id: FactId {
                    origin: self.inner.origin.clone(),
                    sequence,
                },
                published_at: now_millis(),
            },
        };

        self.inner.apply_record(fact.metadata.fact_id.clone(), record);
        self.inner.transport.publish(fact).await?;
        Ok(())
    }
}

impl StoreInner {
    fn apply_record(&self, fact_id: FactId, record: EntryRecord) -> ApplyOutcome {
        let key = record.id.clone();
        let (outcome, snapshot) = {
            let mut table = self.table.lock();
            let outcome = table.apply(fact_id.clone(), record);
            let snapshot = outcome.visible_changed().then(|| table.snapshot());
            (outcome, snapshot)
        };

        tracing::debug!("Applied fact {} for '{}': {:?}", fact_id, key, outcome);

        if let Some(snapshot) = snapshot {
            self.notify(snapshot);
        }
        outcome
    }

    fn notify(&self, snapshot: Snapshot) {
        let listeners: Vec<Arc<Listener>> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener.offer(snapshot.clone());
        }
    }
}

async fn run_ingest_loop(
    store: Weak<StoreInner>,
    mut receiver: FactReceiver,
    shutdown: CancellationToken,
) {
    loop {
        let fact = tokio::select! {
            _ = shutdown.cancelled() => break,
            fact = receiver.recv() => match fact {
                Some(fact) => fact,
                None => break,
            },
        };

        let Some(inner) = store.upgrade() else {
            break;
        };
        CatalogStore { inner }.apply_fact(fact);
    }

    tracing::debug!("Catalog ingest loop stopped");
}

/// Handle returned by `CatalogStore::subscribe`.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<StoreInner>,
    listener: Arc<Listener>,
}

impl Subscription {
    /// Stops deliveries to this listener. Safe to call from inside the
    /// listener's own callback.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.listener.active.store(false, Ordering::SeqCst);
        if let Some(store) = self.store.upgrade() {
            store.listeners.lock().remove(&self.listener.id);
        }
    }
}

struct Listener {
    id: u64,
    active: AtomicBool,
    callback: Callback,
    mailbox: Mutex<Mailbox>,
}

#[derive(Default)]
struct Mailbox {
    pending: Option<Snapshot>,
    delivered_version: u64,
    delivering: bool,
}

impl Listener {
    fn new(id: u64, callback: Callback) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            callback,
            mailbox: Mutex::new(Mailbox::default()),
        }
    }

    /// Queues a snapshot and delivers it unless another thread (or an outer
    /// frame of this one) is already delivering, in which case that delivery
    /// loop picks it up. Older snapshots are discarded.
    fn offer(&self, snapshot: Snapshot) {
        {
            let mut mailbox = self.mailbox.lock();
            let newest_known = mailbox
                .pending
                .as_ref()
                .map_or(mailbox.delivered_version, |pending| pending.version);
            if snapshot.version <= newest_known {
                return;
            }
            mailbox.pending = Some(snapshot);
            if mailbox.delivering {
                return;
            }
            mailbox.delivering = true;
        }

        loop {
            let next = {
                let mut mailbox = self.mailbox.lock();
                match mailbox.pending.take() {
                    Some(snapshot) => {
                        mailbox.delivered_version = snapshot.version;
                        snapshot
                    }
                    None => {
                        mailbox.delivering = false;
                        return;
                    }
                }
            };

            if !self.active.load(Ordering::SeqCst) {
                continue;
            }

            let result = catch_unwind(AssertUnwindSafe(|| (self.callback)(&next.entries)));
            if result.is_err() {
                tracing::error!(
                    "Catalog listener {} panicked on snapshot v{}",
                    self.id,
                    next.version
                );
            }
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::catalog::MediaKind;
    use crate::config::MediaMeshConfig;
    use crate::relay::RelayClient;

    fn local_store() -> CatalogStore {
        let config = MediaMeshConfig::for_testing();
        let transport = Arc::new(RelayClient::new(Vec::new(), config.relay.clone()));
        CatalogStore::new(transport, &config.catalog).unwrap()
    }

    fn entry(id: &str, title: &str) -> CatalogEntry {
        CatalogEntry::new(
            id,
            title,
            "magnet:?xt=urn:btih:08ada5a7a6183aae1e09d831df6748d566095a10",
            "QmQc6vqZAnpUfTy7FW9zqXd9RCqLdCU7GqQN1GE5LqAqBb",
            MediaKind::Video,
        )
    }

    fn raw_fact(store: &CatalogStore, key: &str, value: serde_json::Value) -> Fact {
        Fact {
            namespace: store.namespace().to_string(),
            key: key.to_string(),
            value,
            metadata: FactMetadata {
                fact_id: FactId {
                    origin: "remote".to_string(),
                    sequence: 1,
                },
                published_at: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_put_stamps_and_exposes_entry() {
        let store = local_store();
        let stored = store.put(entry("m1", "  Sintel  ")).await.unwrap();

        assert_eq!(stored.title, "Sintel");
        assert!(stored.created_at.is_some());
        assert_eq!(stored.added_by.as_deref(), Some("anonymous"));
        assert_eq!(store.get("m1"), Some(stored));
    }

    #[tokio::test]
    async fn test_put_rejects_invalid_entry_without_storing() {
        let store = local_store();
        let mut invalid = entry("m1", "Sintel");
        invalid.content_address = "cid123".to_string();

        let result = store.put(invalid).await;
        assert!(matches!(result, Err(CatalogError::Validation(_))));
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_keeps_tombstone_resident() {
        let store = local_store();
        store.put(entry("m1", "Sintel")).await.unwrap();
        store.remove("m1").await.unwrap();

        assert!(store.get("m1").is_none());
        assert!(store.snapshot().is_empty());
        let record = store.record("m1").unwrap();
        assert!(record.tombstone);
        assert!(record.tombstone_at.is_some());

        assert!(matches!(
            store.remove("  ").await,
            Err(CatalogError::Validation(ValidationError::MissingField { field: "id" }))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_and_changes() {
        let store = local_store();
        store.put(entry("m1", "First")).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::<usize>::new()));
        let sink = seen.clone();
        let _subscription = store.subscribe(move |entries| sink.lock().push(entries.len()));

        store.put(entry("m2", "Second")).await.unwrap();
        store.remove("m1").await.unwrap();

        assert_eq!(*seen.lock(), vec![1, 2, 1]);
    }

    #[tokio::test]
    async fn test_dropping_subscription_stops_delivery() {
        let store = local_store();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let subscription = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();

        store.put(entry("m1", "First")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_from_inside_callback() {
        let store = local_store();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let (slot_in_callback, calls_in_callback) = (slot.clone(), calls.clone());
        let subscription = store.subscribe(move |entries| {
            calls_in_callback.fetch_add(1, Ordering::SeqCst);
            if !entries.is_empty() {
                if let Some(own) = slot_in_callback.lock().take() {
                    own.unsubscribe();
                }
            }
        });
        *slot.lock() = Some(subscription);

        store.put(entry("m1", "First")).await.unwrap();
        store.put(entry("m2", "Second")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_block_others() {
        let store = local_store();
        let _bad = store.subscribe(|entries| {
            if !entries.is_empty() {
                panic!("listener failure");
            }
        });
        let seen = Arc::new(AtomicU64::new(0));
        let sink = seen.clone();
        let _good = store.subscribe(move |entries| {
            sink.store(entries.len() as u64, Ordering::SeqCst);
        });

        store.put(entry("m1", "First")).await.unwrap();
        store.put(entry("m2", "Second")).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_and_mismatched_facts_are_dropped() {
        let store = local_store();

        store.apply_fact(raw_fact(&store, "m1", serde_json::json!("not an object")));
        store.apply_fact(raw_fact(
            &store,
            "m1",
            serde_json::json!({ "id": "other", "title": "Mismatch" }),
        ));
        let mut foreign = raw_fact(&store, "m1", serde_json::json!({ "id": "m1" }));
        foreign.namespace = "elsewhere".to_string();
        store.apply_fact(foreign);

        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_media_kind_never_visible() {
        let store = local_store();
        let value = serde_json::json!({
            "id": "m1",
            "title": "Picture",
            "primaryReference": "magnet:?xt=urn:btih:08ada5a7a6183aae1e09d831df6748d566095a10",
            "contentAddress": "QmQc6vqZAnpUfTy7FW9zqXd9RCqLdCU7GqQN1GE5LqAqBb",
            "mediaKind": "image",
        });

        store.apply_fact(raw_fact(&store, "m1", value));
        assert_eq!(store.key_count(), 1);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_seed_samples_publishes_all() {
        let store = local_store();
        assert_eq!(store.seed_samples().await, 3);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].id, "sample_sintel");
    }

    #[tokio::test]
    async fn test_store_without_relays_reports_disconnected() {
        let store = local_store();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!store.is_connected());
    }
}
