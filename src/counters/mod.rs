//! Durable download-counter store.
//!
//! One JSON file maps resource ids to counter entries. Every mutation on a
//! store instance passes through a single writer lane: the lane is held
//! across the whole read-modify-write-persist cycle, so concurrent
//! increments against the same store can never interleave and drop updates.
//! Reads take the in-memory snapshot without entering the lane and may trail
//! an in-flight mutation by one commit; the snapshot is only replaced after
//! the file write has completed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Per-resource counter record as persisted on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterEntry {
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_path: Option<String>,
}

/// Optional references recorded alongside an increment.
#[derive(Debug, Clone, Default)]
pub struct RecordMetadata {
    pub file_id: Option<String>,
    pub path: Option<String>,
}

pub struct CounterStore {
    path: PathBuf,
    snapshot: RwLock<HashMap<String, CounterEntry>>,
    write_lane: Mutex<()>,
}

impl CounterStore {
    /// Open the store, persisting an empty mapping when no backing file
    /// exists yet.
    ///
    /// # Errors
    /// Returns an error if the backing file cannot be read, parsed, or
    /// created.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("Invalid counter file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let empty = HashMap::new();
                persist(&path, &empty).await?;
                empty
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read counter file {}", path.display()));
            }
        };

        Ok(Self {
            path,
            snapshot: RwLock::new(entries),
            write_lane: Mutex::new(()),
        })
    }

    /// Current count for one resource id. Reads do not enter the writer lane.
    pub async fn count(&self, id: &str) -> u64 {
        self.snapshot
            .read()
            .await
            .get(id)
            .map_or(0, |entry| entry.count)
    }

    /// Counts for a set of resource ids; missing ids report zero.
    pub async fn counts(&self, ids: &[String]) -> HashMap<String, u64> {
        let snapshot = self.snapshot.read().await;
        ids.iter()
            .map(|id| {
                let count = snapshot.get(id).map_or(0, |entry| entry.count);
                (id.clone(), count)
            })
            .collect()
    }

    /// Increment one key and rewrite the full mapping as one unit.
    ///
    /// The writer lane is held from the snapshot read until the file write
    /// completes, so a second caller starts from this mutation's result.
    ///
    /// # Errors
    /// Returns an error if the rewritten mapping cannot be persisted.
    pub async fn record(&self, id: &str, metadata: RecordMetadata) -> Result<CounterEntry> {
        let _lane = self.write_lane.lock().await;

        let mut entries = self.snapshot.read().await.clone();
        let previous = entries.get(id).cloned().unwrap_or_default();
        let entry = CounterEntry {
            count: previous.count.saturating_add(1),
            updated_at: Some(Utc::now()),
            last_file_id: metadata.file_id.or(previous.last_file_id),
            last_path: metadata.path.or(previous.last_path),
        };
        entries.insert(id.to_string(), entry.clone());

        persist(&self.path, &entries).await?;
        *self.snapshot.write().await = entries;

        debug!(resource = id, count = entry.count, "download recorded");
        Ok(entry)
    }
}

async fn persist(path: &Path, entries: &HashMap<String, CounterEntry>) -> Result<()> {
    let raw = serde_json::to_vec_pretty(entries).context("Failed to encode counter file")?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("Failed to write counter file {}", path.display()))
}
