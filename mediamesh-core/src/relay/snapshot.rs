//! On-disk snapshot of a relay's fact log.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use super::{Fact, RelayLog};

/// File name of the snapshot inside a relay's data directory.
pub const SNAPSHOT_FILE_NAME: &str = "relay-facts.json";

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    facts: Vec<Fact>,
}

/// Snapshot file of one relay.
///
/// Written whole to a temporary sibling and renamed into place, so a crash
/// mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FactSnapshot {
    path: PathBuf,
}

impl FactSnapshot {
    /// Snapshot stored as `SNAPSHOT_FILE_NAME` under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(SNAPSHOT_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuilds the log saved by a previous run. Returns `None` when no
    /// snapshot exists yet.
    ///
    /// # Errors
    /// - `MediaMeshError::Io` - The file could not be read or does not hold a
    ///   snapshot
    /// - `MediaMeshError::Configuration` - The snapshot was written by an
    ///   incompatible version
    pub async fn load(&self) -> crate::Result<Option<RelayLog>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: SnapshotFile = serde_json::from_slice(&bytes).map_err(io::Error::from)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(crate::MediaMeshError::Configuration {
                reason: format!(
                    "{} has snapshot version {} (expected {})",
                    self.path.display(),
                    snapshot.version,
                    SNAPSHOT_VERSION
                ),
            });
        }

        tracing::info!(
            "Loaded {} fact(s) from {}",
            snapshot.facts.len(),
            self.path.display()
        );
        Ok(Some(RelayLog::from_facts(snapshot.facts)))
    }

    /// Writes every fact currently held by `log`.
    ///
    /// # Errors
    /// - `MediaMeshError::Io` - The directory or file could not be written
    pub async fn save(&self, log: &RelayLog) -> crate::Result<()> {
        let snapshot = SnapshotFile {
            version: SNAPSHOT_VERSION,
            facts: log.export(),
        };
        let bytes = serde_json::to_vec(&snapshot).map_err(io::Error::from)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, bytes).await?;
        fs::rename(&temp_path, &self.path).await?;

        tracing::debug!(
            "Saved {} fact(s) to {}",
            snapshot.facts.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MediaMeshError;
    use crate::relay::{FactId, FactMetadata};

    fn fact(namespace: &str, key: &str, sequence: u64) -> Fact {
        Fact {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: serde_json::json!({ "id": key }),
            metadata: FactMetadata {
                fact_id: FactId {
                    origin: "peer".to_string(),
                    sequence,
                },
                published_at: 1_700_000_000_000,
            },
        }
    }

    #[tokio::test]
    async fn test_missing_snapshot_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = FactSnapshot::in_dir(dir.path());
        assert!(snapshot.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_saved_log_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = FactSnapshot::in_dir(&dir.path().join("relay"));

        let log = RelayLog::new();
        log.append(fact("catalog", "m1", 1));
        log.append(fact("catalog", "m2", 2));
        log.append(fact("other", "x", 3));
        log.append(fact("catalog", "m1", 4));
        snapshot.save(&log).await.unwrap();

        let restored = snapshot.load().await.unwrap().expect("snapshot written");
        assert_eq!(restored.key_count("catalog"), 2);
        assert_eq!(restored.key_count("other"), 1);
        assert_eq!(restored.export(), log.export());
        assert_ne!(restored.epoch(), log.epoch());
        assert!(!snapshot.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = FactSnapshot::in_dir(dir.path());
        std::fs::write(snapshot.path(), b"{ not json").unwrap();

        assert!(matches!(snapshot.load().await, Err(MediaMeshError::Io(_))));
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = FactSnapshot::in_dir(dir.path());
        std::fs::write(snapshot.path(), br#"{"version":99,"facts":[]}"#).unwrap();

        let result = snapshot.load().await;
        assert!(matches!(result, Err(MediaMeshError::Configuration { .. })));
    }
}
