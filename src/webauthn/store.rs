//! File-backed credential store with the replay/clone counter guard.

use super::models::StoredCredential;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential not found")]
    NotFound,
    #[error("authenticator counter did not increase")]
    CounterReplayed,
    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

pub struct CredentialStore {
    /// Backing file; in-memory only when absent (tests).
    path: Option<PathBuf>,
    entries: RwLock<Vec<StoredCredential>>,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Load registered credentials from a JSON file. A missing file means no
    /// credentials are registered yet.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("Invalid credential file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read credential file {}", path.display()));
            }
        };
        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn in_memory(entries: Vec<StoredCredential>) -> Self {
        Self {
            path: None,
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn list_for_subject(&self, subject: &str) -> Vec<StoredCredential> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.subject == subject)
            .cloned()
            .collect()
    }

    /// Record a successful verification: the reported counter must strictly
    /// exceed the stored one, or the verification is rejected regardless of
    /// how the assertion checked out cryptographically.
    ///
    /// # Errors
    /// `NotFound` for an unknown credential, `CounterReplayed` when the
    /// counter does not strictly increase, `Persist` on write failure.
    pub async fn record_verification(
        &self,
        subject: &str,
        credential_id: &str,
        reported_count: u32,
        updated_key: Option<serde_json::Value>,
    ) -> Result<(), CredentialError> {
        let _guard = self.write_lock.lock().await;
        {
            let mut entries = self.entries.write().await;
            let entry = entries
                .iter_mut()
                .find(|entry| entry.subject == subject && entry.credential_id == credential_id)
                .ok_or(CredentialError::NotFound)?;
            if reported_count <= entry.sign_count {
                return Err(CredentialError::CounterReplayed);
            }
            entry.sign_count = reported_count;
            entry.last_used_at = Some(Utc::now());
            if let Some(key) = updated_key {
                entry.key = key;
            }
        }
        self.persist().await.map_err(CredentialError::Persist)
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entries = self.entries.read().await;
        write_entries(path, &entries).await
    }
}

async fn write_entries(path: &Path, entries: &[StoredCredential]) -> Result<()> {
    let raw = serde_json::to_vec_pretty(entries).context("Failed to encode credential file")?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("Failed to write credential file {}", path.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn credential(subject: &str, id: &str, count: u32) -> StoredCredential {
        StoredCredential {
            credential_id: id.to_string(),
            subject: subject.to_string(),
            label: None,
            key: serde_json::json!({}),
            sign_count: count,
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn counter_must_strictly_increase() {
        let store = CredentialStore::in_memory(vec![credential("sub-1", "cred-1", 5)]);

        let err = store
            .record_verification("sub-1", "cred-1", 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::CounterReplayed));

        let err = store
            .record_verification("sub-1", "cred-1", 4, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::CounterReplayed));

        store
            .record_verification("sub-1", "cred-1", 6, None)
            .await
            .unwrap();
        let entries = store.list_for_subject("sub-1").await;
        assert_eq!(entries[0].sign_count, 6);
        assert!(entries[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn unknown_credentials_are_not_found() {
        let store = CredentialStore::in_memory(vec![credential("sub-1", "cred-1", 0)]);
        let err = store
            .record_verification("sub-1", "cred-2", 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::NotFound));

        // A credential id is only valid for its owning subject.
        let err = store
            .record_verification("sub-2", "cred-1", 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::NotFound));
    }

    #[tokio::test]
    async fn counter_updates_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        write_entries(&path, &[credential("sub-1", "cred-1", 1)])
            .await
            .unwrap();

        let store = CredentialStore::load(&path).await.unwrap();
        store
            .record_verification("sub-1", "cred-1", 9, None)
            .await
            .unwrap();

        let reloaded = CredentialStore::load(&path).await.unwrap();
        assert_eq!(reloaded.list_for_subject("sub-1").await[0].sign_count, 9);
    }

    #[tokio::test]
    async fn missing_file_means_no_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("none.json"))
            .await
            .unwrap();
        assert!(store.list_for_subject("sub-1").await.is_empty());
    }
}
