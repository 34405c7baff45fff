//! In-process table of staged-but-uncommitted uploads.
//!
//! Each entry is a small saga: `Staged` until exactly one of commit, cancel,
//! or TTL expiry consumes it. Transition checks are exhaustive; a commit that
//! does not match the staged kind and promised path never consumes the entry.

use super::{UploadError, UploadKind};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Staged,
    Committed,
    Expired,
}

#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub id: Uuid,
    pub kind: UploadKind,
    /// Private location the payload was staged to.
    pub temp_path: PathBuf,
    /// Filesystem destination inside the public tree.
    pub final_path: PathBuf,
    /// Public path promised to the caller at stage time.
    pub public_path: String,
    pub original_name: String,
    pub staged_at: Instant,
    pub state: PendingState,
}

pub struct PendingUploadRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, PendingUpload>>,
}

impl PendingUploadRegistry {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, upload: PendingUpload) {
        let mut entries = self.entries.lock().await;
        entries.insert(upload.id, upload);
    }

    /// Check a commit candidate without consuming it.
    ///
    /// # Errors
    /// Returns the mismatch that would abort the commit.
    pub async fn verify(
        &self,
        id: Uuid,
        kind: UploadKind,
        public_path: &str,
    ) -> Result<(), UploadError> {
        let entries = self.entries.lock().await;
        let entry = entries.get(&id).ok_or(UploadError::UnknownUpload)?;
        check_match(entry, kind, public_path)
    }

    /// Consume an entry for commit once it matches the staged kind and path.
    ///
    /// # Errors
    /// Returns the mismatch; the entry stays `Staged` on any error.
    pub async fn take_for_commit(
        &self,
        id: Uuid,
        kind: UploadKind,
        public_path: &str,
    ) -> Result<PendingUpload, UploadError> {
        let mut entries = self.entries.lock().await;
        {
            let entry = entries.get(&id).ok_or(UploadError::UnknownUpload)?;
            check_match(entry, kind, public_path)?;
        }
        let mut entry = entries.remove(&id).ok_or(UploadError::UnknownUpload)?;
        entry.state = PendingState::Committed;
        Ok(entry)
    }

    /// Put a consumed entry back after a failed rename so the sweep still
    /// owns its temp file.
    pub async fn restore(&self, mut upload: PendingUpload) {
        upload.state = PendingState::Staged;
        let mut entries = self.entries.lock().await;
        entries.insert(upload.id, upload);
    }

    /// Remove one entry ahead of its TTL.
    pub async fn cancel(&self, id: Uuid) -> Option<PendingUpload> {
        let mut entries = self.entries.lock().await;
        entries.remove(&id)
    }

    /// Remove entries older than the TTL and hand them back for cleanup.
    pub async fn take_expired(&self) -> Vec<PendingUpload> {
        let mut entries = self.entries.lock().await;
        let expired_ids: Vec<Uuid> = entries
            .values()
            .filter(|entry| entry.staged_at.elapsed() >= self.ttl)
            .map(|entry| entry.id)
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|id| {
                entries.remove(&id).map(|mut entry| {
                    entry.state = PendingState::Expired;
                    entry
                })
            })
            .collect()
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.entries.lock().await.contains_key(&id)
    }
}

fn check_match(entry: &PendingUpload, kind: UploadKind, public_path: &str) -> Result<(), UploadError> {
    if entry.state != PendingState::Staged {
        return Err(UploadError::UnknownUpload);
    }
    if entry.kind != kind {
        return Err(UploadError::KindMismatch);
    }
    if entry.public_path != public_path {
        return Err(UploadError::PathMismatch);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn staged(kind: UploadKind, public_path: &str) -> PendingUpload {
        PendingUpload {
            id: Uuid::new_v4(),
            kind,
            temp_path: PathBuf::from("/tmp/upload"),
            final_path: PathBuf::from("/site/upload"),
            public_path: public_path.to_string(),
            original_name: "upload".to_string(),
            staged_at: Instant::now(),
            state: PendingState::Staged,
        }
    }

    #[tokio::test]
    async fn commit_requires_exact_kind_and_path() {
        let registry = PendingUploadRegistry::new(Duration::from_secs(60));
        let upload = staged(UploadKind::Image, "assets/img/cover-1.png");
        let id = upload.id;
        registry.insert(upload).await;

        let err = registry
            .take_for_commit(id, UploadKind::Download, "assets/img/cover-1.png")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::KindMismatch));

        let err = registry
            .take_for_commit(id, UploadKind::Image, "assets/img/other.png")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PathMismatch));

        // Mismatches must not consume the entry.
        assert!(registry.contains(id).await);

        let taken = registry
            .take_for_commit(id, UploadKind::Image, "assets/img/cover-1.png")
            .await
            .unwrap();
        assert_eq!(taken.state, PendingState::Committed);
        assert!(!registry.contains(id).await);
    }

    #[tokio::test]
    async fn entries_commit_at_most_once() {
        let registry = PendingUploadRegistry::new(Duration::from_secs(60));
        let upload = staged(UploadKind::Download, "downloads/pack-1.zip");
        let id = upload.id;
        registry.insert(upload).await;

        registry
            .take_for_commit(id, UploadKind::Download, "downloads/pack-1.zip")
            .await
            .unwrap();
        let err = registry
            .take_for_commit(id, UploadKind::Download, "downloads/pack-1.zip")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnknownUpload));
    }

    #[tokio::test]
    async fn expired_entries_are_unreachable_after_sweep() {
        let registry = PendingUploadRegistry::new(Duration::ZERO);
        let upload = staged(UploadKind::Image, "assets/img/late.png");
        let id = upload.id;
        registry.insert(upload).await;

        let expired = registry.take_expired().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].state, PendingState::Expired);

        let err = registry
            .take_for_commit(id, UploadKind::Image, "assets/img/late.png")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnknownUpload));
    }

    #[tokio::test]
    async fn fresh_entries_survive_a_sweep() {
        let registry = PendingUploadRegistry::new(Duration::from_secs(3600));
        let upload = staged(UploadKind::Image, "assets/img/fresh.png");
        let id = upload.id;
        registry.insert(upload).await;

        assert!(registry.take_expired().await.is_empty());
        assert!(registry.contains(id).await);
    }
}
