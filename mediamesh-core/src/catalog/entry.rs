//! Catalog entry types: the display-ready entry and its wire record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of media an entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            _ => Err(format!("Invalid media kind: '{s}'. Valid options are: video, audio")),
        }
    }
}

/// A visible catalog entry.
///
/// Every value of this type satisfies the display invariant: non-empty id,
/// title, primary reference and content address, and a known media kind.
/// Entries handed to `CatalogStore::put` are checked again before publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Magnet URI for the P2P swarm
    pub primary_reference: String,
    /// Content-addressed identifier resolvable through gateways
    pub content_address: String,
    pub fallback_url: Option<String>,
    pub media_kind: MediaKind,
    pub thumbnail_url: Option<String>,
    /// Publisher wall-clock milliseconds; ordering hint only
    pub created_at: Option<i64>,
    pub added_by: Option<String>,
}

impl CatalogEntry {
    /// Creates an entry with the required fields; optional fields start empty.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        primary_reference: impl Into<String>,
        content_address: impl Into<String>,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            category: None,
            primary_reference: primary_reference.into(),
            content_address: content_address.into(),
            fallback_url: None,
            media_kind,
            thumbnail_url: None,
            created_at: None,
            added_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_fallback_url(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }

    pub fn with_thumbnail_url(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_added_by(mut self, added_by: impl Into<String>) -> Self {
        self.added_by = Some(added_by.into());
        self
    }

    /// Converts the entry into the record form published on the wire.
    pub fn into_record(self) -> EntryRecord {
        EntryRecord {
            id: self.id,
            title: Some(self.title),
            description: self.description,
            category: self.category,
            primary_reference: Some(self.primary_reference),
            content_address: Some(self.content_address),
            fallback_url: self.fallback_url,
            media_kind: Some(self.media_kind.as_str().to_string()),
            thumbnail_url: self.thumbnail_url,
            created_at: self.created_at,
            added_by: self.added_by,
            tombstone: false,
            tombstone_at: None,
        }
    }
}

/// Stored and transmitted form of an entry.
///
/// Only `id` is mandatory: peers may hold partially-synced records or
/// tombstones, and `media_kind` stays raw text so an unknown kind is filtered
/// out of snapshots rather than failing to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
    #[serde(default)]
    pub tombstone: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone_at: Option<i64>,
}

impl EntryRecord {
    /// Creates the tombstone record written by `CatalogStore::remove`.
    pub fn tombstone(id: impl Into<String>, tombstone_at: i64) -> Self {
        Self {
            id: id.into(),
            tombstone: true,
            tombstone_at: Some(tombstone_at),
            ..Default::default()
        }
    }

    /// Returns the visible entry, or `None` if the record is tombstoned or
    /// incomplete.
    pub fn to_visible(&self) -> Option<CatalogEntry> {
        if self.tombstone || self.id.is_empty() {
            return None;
        }

        let title = non_empty(&self.title)?;
        let primary_reference = non_empty(&self.primary_reference)?;
        let content_address = non_empty(&self.content_address)?;
        let media_kind = self.media_kind.as_deref()?.parse().ok()?;

        Some(CatalogEntry {
            id: self.id.clone(),
            title,
            description: self.description.clone(),
            category: self.category.clone(),
            primary_reference,
            content_address,
            fallback_url: self.fallback_url.clone(),
            media_kind,
            thumbnail_url: self.thumbnail_url.clone(),
            created_at: self.created_at,
            added_by: self.added_by.clone(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}
