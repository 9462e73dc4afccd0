//! Per-key merge table behind `CatalogStore`.
//!
//! Holds, per entry id, only the most recently received fact. Receipt order
//! decides; publisher timestamps are never trusted for ordering. The visible
//! snapshot is kept as an ordered index updated one key at a time.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::entry::{CatalogEntry, EntryRecord};
use crate::relay::FactId;

/// Result of applying one fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The fact was dropped before reaching the table.
    Rejected,
    /// The fact is already the current value for its key.
    Duplicate,
    /// The fact replaced the key's value.
    Stored {
        /// Whether the visible snapshot changed as a result
        visible_changed: bool,
    },
}

impl ApplyOutcome {
    pub fn visible_changed(self) -> bool {
        matches!(
            self,
            ApplyOutcome::Stored {
                visible_changed: true
            }
        )
    }
}

/// Immutable visible catalog at one point in time, newest first.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Increases every time the visible set changes
    pub version: u64,
    pub entries: Arc<[CatalogEntry]>,
}

/// Display order: newest `created_at` first, ties broken by id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    created_at: Reverse<i64>,
    id: String,
}

impl SortKey {
    fn of(entry: &CatalogEntry) -> Self {
        Self {
            created_at: Reverse(entry.created_at.unwrap_or(0)),
            id: entry.id.clone(),
        }
    }
}

#[derive(Debug)]
struct StoredFact {
    /// Local receipt sequence number
    receipt: u64,
    fact_id: FactId,
    record: EntryRecord,
    visible_key: Option<SortKey>,
}

#[derive(Debug)]
pub struct MergeTable {
    last_receipt: u64,
    version: u64,
    records: HashMap<String, StoredFact>,
    visible: BTreeMap<SortKey, CatalogEntry>,
}

impl Default for MergeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeTable {
    pub fn new() -> Self {
        Self {
            last_receipt: 0,
            version: 1,
            records: HashMap::new(),
            visible: BTreeMap::new(),
        }
    }

    /// Applies a fact under last-received-wins.
    ///
    /// A fact equal to the key's current fact is a no-op. Anything else,
    /// tombstones included, replaces the stored record wholesale.
    pub fn apply(&mut self, fact_id: FactId, record: EntryRecord) -> ApplyOutcome {
        if let Some(current) = self.records.get(&record.id) {
            if current.fact_id == fact_id {
                return ApplyOutcome::Duplicate;
            }
        }

        self.last_receipt += 1;
        let receipt = self.last_receipt;
        let key = record.id.clone();

        let new_visible = record.to_visible();
        let old = self.records.remove(&key);
        let old_visible = old
            .as_ref()
            .and_then(|stored| stored.visible_key.as_ref())
            .and_then(|sort_key| self.visible.remove(sort_key));

        let visible_changed = old_visible != new_visible;

        let visible_key = new_visible.map(|entry| {
            let sort_key = SortKey::of(&entry);
            self.visible.insert(sort_key.clone(), entry);
            sort_key
        });

        if visible_key.is_none() && !record.tombstone {
            tracing::trace!("Holding incomplete record '{}' out of the snapshot", key);
        }

        self.records.insert(
            key,
            StoredFact {
                receipt,
                fact_id,
                record,
                visible_key,
            },
        );

        if visible_changed {
            self.version += 1;
        }

        ApplyOutcome::Stored { visible_changed }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: self.version,
            entries: self.visible.values().cloned().collect(),
        }
    }

    /// Visible entry for `id`, if any.
    pub fn get(&self, id: &str) -> Option<CatalogEntry> {
        let stored = self.records.get(id)?;
        self.visible.get(stored.visible_key.as_ref()?).cloned()
    }

    /// Raw stored record for `id`, including tombstones and partial records.
    pub fn record(&self, id: &str) -> Option<&EntryRecord> {
        self.records.get(id).map(|stored| &stored.record)
    }

    /// Local receipt sequence of the fact currently stored for `id`.
    pub fn receipt_of(&self, id: &str) -> Option<u64> {
        self.records.get(id).map(|stored| stored.receipt)
    }

    /// Number of keys held, tombstones and partial records included.
    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}
