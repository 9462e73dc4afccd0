//! Distributed media catalog.
//!
//! Entries are published as facts on a relay namespace and merged per key
//! under last-received-wins. Deletions are tombstone facts so they propagate
//! to peers that have not seen the entry yet.

pub mod entry;
pub mod merge;
pub mod samples;
pub mod store;
pub mod validation;

pub use entry::{CatalogEntry, EntryRecord, MediaKind};
pub use merge::{ApplyOutcome, MergeTable, Snapshot};
pub use samples::sample_entries;
pub use store::{CatalogStore, Subscription};
pub use validation::{ValidationError, generate_id};

use crate::relay::TransportError;

/// Errors returned by catalog store operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Catalog transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to encode catalog entry: {0}")]
    Encoding(#[from] serde_json::Error),
}
