//! Upload staging and atomic commit into the public tree.

use super::registry::{PendingState, PendingUpload, PendingUploadRegistry};
use super::{
    MAX_UPLOAD_BYTES, UploadError, UploadKind, file_extension, sanitize_filename,
};
use anyhow::{Context, Result};
use rand::Rng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// What stage promises back to the caller; commit must echo it exactly.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StagedUpload {
    pub upload_id: Uuid,
    pub suggested_path: String,
    pub original_name: String,
}

pub struct UploadStager {
    temp_dir: PathBuf,
    site_dir: PathBuf,
    registry: PendingUploadRegistry,
}

impl UploadStager {
    /// # Errors
    /// Returns an error if the private temp directory cannot be created.
    pub async fn new(
        temp_dir: impl Into<PathBuf>,
        site_dir: impl Into<PathBuf>,
        ttl: Duration,
    ) -> Result<Self> {
        let temp_dir = temp_dir.into();
        tokio::fs::create_dir_all(&temp_dir)
            .await
            .with_context(|| format!("Failed to create {}", temp_dir.display()))?;
        Ok(Self {
            temp_dir,
            site_dir: site_dir.into(),
            registry: PendingUploadRegistry::new(ttl),
        })
    }

    /// Validate and stage a payload; nothing is publicly visible afterwards.
    ///
    /// # Errors
    /// Returns a validation error, or an I/O error if the temp write fails.
    pub async fn stage(
        &self,
        kind: UploadKind,
        original_name: &str,
        content_type: Option<&str>,
        payload: &[u8],
    ) -> Result<StagedUpload, UploadError> {
        if payload.is_empty() {
            return Err(UploadError::EmptyPayload);
        }
        if payload.len() > MAX_UPLOAD_BYTES {
            return Err(UploadError::PayloadTooLarge);
        }

        let extension = file_extension(original_name).ok_or(UploadError::DisallowedType)?;
        if !kind.allows_extension(&extension) {
            return Err(UploadError::DisallowedType);
        }
        if let Some(content_type) = content_type {
            let content_type = content_type
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if !content_type.is_empty() && !kind.allows_content_type(&content_type) {
                return Err(UploadError::DisallowedType);
            }
        }

        let safe_name = sanitize_filename(original_name);
        let final_name = final_filename(&safe_name, &extension);
        let public_path = format!("{}{final_name}", kind.public_prefix());
        let final_path = self.site_dir.join(&public_path);

        let id = Uuid::new_v4();
        let temp_path = self.temp_dir.join(id.to_string());
        tokio::fs::write(&temp_path, payload).await?;

        self.registry
            .insert(PendingUpload {
                id,
                kind,
                temp_path,
                final_path,
                public_path: public_path.clone(),
                original_name: safe_name.clone(),
                staged_at: Instant::now(),
                state: PendingState::Staged,
            })
            .await;

        debug!(upload = %id, kind = kind.as_str(), path = %public_path, "upload staged");
        Ok(StagedUpload {
            upload_id: id,
            suggested_path: public_path,
            original_name: safe_name,
        })
    }

    /// Check a commit candidate without consuming it.
    ///
    /// # Errors
    /// Returns the mismatch that would abort the commit.
    pub async fn verify_pending(
        &self,
        id: Uuid,
        kind: UploadKind,
        suggested_path: &str,
    ) -> Result<(), UploadError> {
        self.registry.verify(id, kind, suggested_path).await
    }

    /// Move a staged payload into the public tree and consume the entry.
    ///
    /// Returns the public path the asset is now reachable under.
    ///
    /// # Errors
    /// Returns a mismatch error, or an I/O error if the rename fails; the
    /// entry stays pending (and sweepable) when the rename fails.
    pub async fn commit(
        &self,
        id: Uuid,
        kind: UploadKind,
        suggested_path: &str,
    ) -> Result<String, UploadError> {
        let entry = self.registry.take_for_commit(id, kind, suggested_path).await?;
        if let Some(parent) = entry.final_path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                self.registry.restore(entry).await;
                return Err(UploadError::Io(err));
            }
        }
        if let Err(err) = tokio::fs::rename(&entry.temp_path, &entry.final_path).await {
            self.registry.restore(entry).await;
            return Err(UploadError::Io(err));
        }
        debug!(upload = %id, path = %entry.public_path, "upload committed");
        Ok(entry.public_path)
    }

    /// Drop one staged upload ahead of its TTL and delete its temp file.
    ///
    /// # Errors
    /// Returns `UnknownUpload` when the id is not pending.
    pub async fn cancel(&self, id: Uuid) -> Result<(), UploadError> {
        let entry = self.registry.cancel(id).await.ok_or(UploadError::UnknownUpload)?;
        remove_temp(&entry).await;
        debug!(upload = %id, "upload cancelled");
        Ok(())
    }

    /// Expire overdue entries and delete their temp files. Returns how many
    /// entries were removed.
    pub async fn sweep_expired(&self) -> usize {
        let expired = self.registry.take_expired().await;
        let removed = expired.len();
        for entry in expired {
            remove_temp(&entry).await;
            debug!(upload = %entry.id, "pending upload expired");
        }
        removed
    }

    pub async fn is_pending(&self, id: Uuid) -> bool {
        self.registry.contains(id).await
    }
}

/// Periodic sweep on its own timer, independent of request traffic.
pub fn spawn_sweeper(stager: Arc<UploadStager>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = stager.sweep_expired().await;
            if removed > 0 {
                debug!(removed, "swept expired pending uploads");
            }
        }
    });
}

async fn remove_temp(entry: &PendingUpload) {
    if let Err(err) = tokio::fs::remove_file(&entry.temp_path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(upload = %entry.id, error = %err, "failed to remove staged temp file");
        }
    }
}

fn final_filename(safe_name: &str, extension: &str) -> String {
    let stem = safe_name
        .strip_suffix(&format!(".{extension}"))
        .map(str::to_string)
        .unwrap_or_else(|| {
            // Extension casing may differ from the sanitized name.
            safe_name
                .rsplit_once('.')
                .map_or(safe_name, |(stem, _)| stem)
                .to_string()
        });
    let suffix: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(8)
        .map(|byte| (byte as char).to_ascii_lowercase())
        .collect();
    format!("{stem}-{suffix}.{extension}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn stager(dir: &tempfile::TempDir, ttl: Duration) -> UploadStager {
        UploadStager::new(dir.path().join("tmp-uploads"), dir.path().join("site"), ttl)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn stage_rejects_disallowed_and_oversize_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let stager = stager(&dir, Duration::from_secs(60)).await;

        let err = stager
            .stage(UploadKind::Image, "cover.zip", None, b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::DisallowedType));

        let err = stager
            .stage(UploadKind::Image, "cover.png", Some("application/zip"), b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::DisallowedType));

        let err = stager
            .stage(UploadKind::Image, "cover.png", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::EmptyPayload));

        let oversize = vec![0u8; MAX_UPLOAD_BYTES + 1];
        let err = stager
            .stage(UploadKind::Download, "pack.zip", None, &oversize)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PayloadTooLarge));
    }

    #[tokio::test]
    async fn stage_then_commit_publishes_under_the_kind_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let stager = stager(&dir, Duration::from_secs(60)).await;

        let staged = stager
            .stage(UploadKind::Image, "cover.PNG", Some("image/png"), b"png-bytes")
            .await
            .unwrap();
        assert!(staged.suggested_path.starts_with("assets/img/"));
        assert!(staged.suggested_path.ends_with(".png"));
        // Private until committed.
        assert!(!dir.path().join("site").join(&staged.suggested_path).exists());

        let public_path = stager
            .commit(staged.upload_id, UploadKind::Image, &staged.suggested_path)
            .await
            .unwrap();
        assert_eq!(public_path, staged.suggested_path);

        let committed = dir.path().join("site").join(&public_path);
        assert_eq!(tokio::fs::read(&committed).await.unwrap(), b"png-bytes");
        assert!(!stager.is_pending(staged.upload_id).await);
    }

    #[tokio::test]
    async fn commit_with_any_other_path_always_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stager = stager(&dir, Duration::from_secs(60)).await;

        for (kind, name) in [
            (UploadKind::Image, "cover.png"),
            (UploadKind::Download, "pack.zip"),
        ] {
            let staged = stager.stage(kind, name, None, b"payload").await.unwrap();
            let err = stager
                .commit(staged.upload_id, kind, "downloads/decoy.zip")
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                UploadError::PathMismatch | UploadError::KindMismatch
            ));
            assert!(stager.is_pending(staged.upload_id).await);
        }
    }

    #[tokio::test]
    async fn sweep_removes_entry_and_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let stager = stager(&dir, Duration::ZERO).await;

        let staged = stager
            .stage(UploadKind::Download, "pack.zip", None, b"zip-bytes")
            .await
            .unwrap();
        let temp_path = dir
            .path()
            .join("tmp-uploads")
            .join(staged.upload_id.to_string());
        assert!(temp_path.exists());

        assert_eq!(stager.sweep_expired().await, 1);
        assert!(!temp_path.exists());

        let err = stager
            .commit(staged.upload_id, UploadKind::Download, &staged.suggested_path)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnknownUpload));
    }

    #[tokio::test]
    async fn cancel_is_explicit_early_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let stager = stager(&dir, Duration::from_secs(3600)).await;

        let staged = stager
            .stage(UploadKind::Image, "cover.png", None, b"bytes")
            .await
            .unwrap();
        stager.cancel(staged.upload_id).await.unwrap();

        let err = stager.cancel(staged.upload_id).await.unwrap_err();
        assert!(matches!(err, UploadError::UnknownUpload));
    }
}
