//! Store-and-forward fact log kept by a relay node.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Fact, MAX_FACTS_PER_PULL, SequencedFact};

/// Latest fact per (namespace, key), ordered by a relay-wide cursor.
///
/// A newer fact for a key replaces the older one and moves to the end of the
/// cursor order, so a subscriber starting from cursor 0 receives the compacted
/// current state and one tailing the log receives every change.
///
/// Cursors are only meaningful within one epoch. Every log instance draws a
/// fresh epoch, so a relay that restarts (even from a saved snapshot) tells
/// its subscribers that their cursors no longer apply.
#[derive(Debug)]
pub struct RelayLog {
    epoch: String,
    state: Mutex<LogState>,
    appended: Notify,
}

#[derive(Debug, Default)]
struct LogState {
    last_cursor: u64,
    namespaces: HashMap<String, NamespaceLog>,
}

#[derive(Debug, Default)]
struct NamespaceLog {
    by_cursor: BTreeMap<u64, Fact>,
    by_key: HashMap<String, u64>,
}

impl Default for RelayLog {
    fn default() -> Self {
        Self {
            epoch: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(LogState::default()),
            appended: Notify::new(),
        }
    }
}

impl RelayLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a log from facts in their original cursor order.
    ///
    /// The rebuilt log starts a new epoch and renumbers cursors from 1.
    pub fn from_facts(facts: impl IntoIterator<Item = Fact>) -> Self {
        let log = Self::new();
        for fact in facts {
            log.append(fact);
        }
        log
    }

    /// Identifier of this log instance, reported with every pull.
    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    /// Stores a fact and wakes waiting pulls.
    ///
    /// Re-publishing the fact currently stored for a key is a no-op and
    /// returns its existing cursor.
    pub fn append(&self, fact: Fact) -> u64 {
        let cursor = {
            let mut state = self.state.lock();
            let next_cursor = state.last_cursor + 1;
            let namespace = state.namespaces.entry(fact.namespace.clone()).or_default();

            if let Some(&existing) = namespace.by_key.get(&fact.key) {
                let unchanged = namespace
                    .by_cursor
                    .get(&existing)
                    .is_some_and(|stored| stored.metadata.fact_id == fact.metadata.fact_id);
                if unchanged {
                    return existing;
                }
                namespace.by_cursor.remove(&existing);
            }

            namespace.by_key.insert(fact.key.clone(), next_cursor);
            namespace.by_cursor.insert(next_cursor, fact);
            state.last_cursor = next_cursor;
            next_cursor
        };

        self.appended.notify_waiters();
        cursor
    }

    /// Returns up to `MAX_FACTS_PER_PULL` facts with cursor greater than `after`.
    pub fn facts_after(&self, namespace: &str, after: u64) -> Vec<SequencedFact> {
        let state = self.state.lock();
        let Some(log) = state.namespaces.get(namespace) else {
            return Vec::new();
        };

        log.by_cursor
            .range(after.saturating_add(1)..)
            .take(MAX_FACTS_PER_PULL)
            .map(|(&cursor, fact)| SequencedFact {
                cursor,
                fact: fact.clone(),
            })
            .collect()
    }

    /// Long-poll variant of `facts_after`: waits up to `wait` for new facts
    /// when none are pending. Returns an empty list on timeout.
    pub async fn wait_for_facts(
        &self,
        namespace: &str,
        after: u64,
        wait: Duration,
    ) -> Vec<SequencedFact> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            // Register before checking so an append in between is not missed.
            notified.as_mut().enable();

            let facts = self.facts_after(namespace, after);
            if !facts.is_empty() {
                return facts;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Vec::new();
            }
        }
    }

    /// Number of keys stored under `namespace`.
    pub fn key_count(&self, namespace: &str) -> usize {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .map_or(0, |log| log.by_key.len())
    }

    /// Highest cursor assigned so far.
    pub fn last_cursor(&self) -> u64 {
        self.state.lock().last_cursor
    }

    /// Every stored fact across all namespaces, in cursor order.
    pub fn export(&self) -> Vec<Fact> {
        let state = self.state.lock();
        let mut facts: Vec<(u64, Fact)> = state
            .namespaces
            .values()
            .flat_map(|log| log.by_cursor.iter().map(|(&cursor, fact)| (cursor, fact.clone())))
            .collect();
        facts.sort_by_key(|(cursor, _)| *cursor);
        facts.into_iter().map(|(_, fact)| fact).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{FactId, FactMetadata};

    fn fact(namespace: &str, key: &str, origin: &str, sequence: u64) -> Fact {
        Fact {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: serde_json::json!({ "id": key, "sequence": sequence }),
            metadata: FactMetadata {
                fact_id: FactId {
                    origin: origin.to_string(),
                    sequence,
                },
                published_at: 0,
            },
        }
    }

    #[test]
    fn test_latest_fact_per_key_replaces_older() {
        let log = RelayLog::new();
        log.append(fact("ns", "a", "p1", 1));
        log.append(fact("ns", "b", "p1", 2));
        log.append(fact("ns", "a", "p2", 1));

        let facts = log.facts_after("ns", 0);
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].fact.key, "b");
        assert_eq!(facts[1].fact.key, "a");
        assert_eq!(facts[1].fact.metadata.fact_id.origin, "p2");
        assert_eq!(log.key_count("ns"), 2);
    }

    #[test]
    fn test_duplicate_append_keeps_cursor() {
        let log = RelayLog::new();
        let first = log.append(fact("ns", "a", "p1", 1));
        let second = log.append(fact("ns", "a", "p1", 1));
        assert_eq!(first, second);
        assert_eq!(log.last_cursor(), 1);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let log = RelayLog::new();
        log.append(fact("one", "a", "p1", 1));
        log.append(fact("two", "a", "p1", 2));

        assert_eq!(log.facts_after("one", 0).len(), 1);
        assert_eq!(log.facts_after("two", 0).len(), 1);
        assert!(log.facts_after("three", 0).is_empty());
    }

    #[test]
    fn test_facts_after_cursor() {
        let log = RelayLog::new();
        let first = log.append(fact("ns", "a", "p1", 1));
        log.append(fact("ns", "b", "p1", 2));

        let facts = log.facts_after("ns", first);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact.key, "b");
    }

    #[test]
    fn test_export_keeps_cursor_order_across_namespaces() {
        let log = RelayLog::new();
        log.append(fact("one", "a", "p1", 1));
        log.append(fact("two", "b", "p1", 2));
        log.append(fact("one", "c", "p1", 3));
        log.append(fact("one", "a", "p2", 1));

        let keys: Vec<_> = log.export().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_rebuilt_log_starts_new_epoch() {
        let log = RelayLog::new();
        log.append(fact("ns", "a", "p1", 1));
        log.append(fact("ns", "b", "p1", 2));

        let rebuilt = RelayLog::from_facts(log.export());
        assert_ne!(rebuilt.epoch(), log.epoch());
        assert_eq!(rebuilt.key_count("ns"), 2);
        assert_eq!(rebuilt.last_cursor(), 2);
        assert_eq!(rebuilt.facts_after("ns", 0), log.facts_after("ns", 0));
    }

    #[tokio::test]
    async fn test_wait_for_facts_wakes_on_append() {
        let log = std::sync::Arc::new(RelayLog::new());
        let waiter = {
            let log = log.clone();
            tokio::spawn(async move { log.wait_for_facts("ns", 0, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        log.append(fact("ns", "a", "p1", 1));

        let facts = waiter.await.unwrap();
        assert_eq!(facts.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_facts_times_out_empty() {
        let log = RelayLog::new();
        let facts = log
            .wait_for_facts("ns", 0, Duration::from_millis(20))
            .await;
        assert!(facts.is_empty());
    }
}
