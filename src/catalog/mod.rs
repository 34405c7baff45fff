//! Project catalog persisted as one ordered JSON file.
//!
//! The catalog is a plain record store; the interesting coordination lives in
//! the upload stager and counter store. Writes hold a single lock across the
//! read-modify-write cycle so two editor saves cannot clobber each other.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub mc_version: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Public path of the committed download archive, when any.
    #[serde(default)]
    pub download_file: String,
    /// Public path of the committed cover image, when any.
    #[serde(default)]
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for a create or update. Absent fields keep the
/// existing value on update and fall back to defaults on create.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInput {
    pub id: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub short_description: Option<String>,
    pub mc_version: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub download_file: Option<String>,
    pub image: Option<String>,
}

pub struct ProjectStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProjectStore {
    /// Open the store. The backing file is created on first write.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// All records in file order.
    ///
    /// # Errors
    /// Returns an error if the backing file exists but cannot be parsed.
    pub async fn list(&self) -> Result<Vec<Project>> {
        read_all(&self.path).await
    }

    /// # Errors
    /// Returns an error if the backing file cannot be read.
    pub async fn get(&self, id: &str) -> Result<Option<Project>> {
        let projects = read_all(&self.path).await?;
        Ok(projects.into_iter().find(|project| project.id == id))
    }

    /// Insert a new record, deriving a unique slug id when none is supplied.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be read or rewritten.
    pub async fn create(&self, input: ProjectInput) -> Result<Project> {
        let _guard = self.write_lock.lock().await;
        let mut projects = read_all(&self.path).await?;

        let id = match input.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let base = slugify(input.title.as_deref().unwrap_or("project"));
                let mut candidate = base.clone();
                let mut n = 1;
                while projects.iter().any(|project| project.id == candidate) {
                    candidate = format!("{base}-{n}");
                    n += 1;
                }
                candidate
            }
        };

        let now = Utc::now();
        let project = Project {
            id,
            title: input.title.unwrap_or_else(|| "Untitled project".to_string()),
            kind: input.kind.unwrap_or_else(|| "datapack".to_string()),
            short_description: input.short_description.unwrap_or_default(),
            mc_version: input.mc_version.unwrap_or_default(),
            status: input.status.unwrap_or_else(|| "planned".to_string()),
            category: input.category.unwrap_or_default(),
            tags: input.tags.unwrap_or_default(),
            download_file: input.download_file.unwrap_or_default(),
            image: input.image.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        projects.push(project.clone());
        write_all(&self.path, &projects).await?;
        Ok(project)
    }

    /// Merge supplied fields onto an existing record; `None` when unknown.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be read or rewritten.
    pub async fn update(&self, id: &str, input: ProjectInput) -> Result<Option<Project>> {
        let _guard = self.write_lock.lock().await;
        let mut projects = read_all(&self.path).await?;
        let Some(existing) = projects.iter_mut().find(|project| project.id == id) else {
            return Ok(None);
        };

        if let Some(title) = input.title {
            existing.title = title;
        }
        if let Some(kind) = input.kind {
            existing.kind = kind;
        }
        if let Some(short_description) = input.short_description {
            existing.short_description = short_description;
        }
        if let Some(mc_version) = input.mc_version {
            existing.mc_version = mc_version;
        }
        if let Some(status) = input.status {
            existing.status = status;
        }
        if let Some(category) = input.category {
            existing.category = category;
        }
        if let Some(tags) = input.tags {
            existing.tags = tags;
        }
        if let Some(download_file) = input.download_file {
            existing.download_file = download_file;
        }
        if let Some(image) = input.image {
            existing.image = image;
        }
        existing.updated_at = Utc::now();

        let updated = existing.clone();
        write_all(&self.path, &projects).await?;
        Ok(Some(updated))
    }

    /// Remove a record; `false` when the id is unknown.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be read or rewritten.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut projects = read_all(&self.path).await?;
        let before = projects.len();
        projects.retain(|project| project.id != id);
        if projects.len() == before {
            return Ok(false);
        }
        write_all(&self.path, &projects).await?;
        Ok(true)
    }
}

async fn read_all(path: &Path) -> Result<Vec<Project>> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice(&raw)
            .with_context(|| format!("Invalid catalog file {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to read catalog file {}", path.display()))
        }
    }
}

async fn write_all(path: &Path, projects: &[Project]) -> Result<()> {
    let raw = serde_json::to_vec_pretty(projects).context("Failed to encode catalog file")?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("Failed to write catalog file {}", path.display()))
}

/// Lowercase, collapse everything outside `[a-z0-9]` to single dashes.
fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = true;
    for ch in value.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn store(dir: &tempfile::TempDir) -> ProjectStore {
        ProjectStore::open(dir.path().join("projects.json"))
            .await
            .unwrap()
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("Jetpack Datapack!"), "jetpack-datapack");
        assert_eq!(slugify("  --  "), "project");
        assert_eq!(slugify("Already-Fine"), "already-fine");
    }

    #[tokio::test]
    async fn create_derives_unique_slug_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let first = store
            .create(ProjectInput {
                title: Some("Jetpack Datapack".to_string()),
                ..ProjectInput::default()
            })
            .await
            .unwrap();
        let second = store
            .create(ProjectInput {
                title: Some("Jetpack Datapack".to_string()),
                ..ProjectInput::default()
            })
            .await
            .unwrap();

        assert_eq!(first.id, "jetpack-datapack");
        assert_eq!(second.id, "jetpack-datapack-1");
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_merges_only_supplied_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let created = store
            .create(ProjectInput {
                title: Some("Original".to_string()),
                status: Some("released".to_string()),
                ..ProjectInput::default()
            })
            .await
            .unwrap();

        let updated = store
            .update(
                &created.id,
                ProjectInput {
                    title: Some("Renamed".to_string()),
                    ..ProjectInput::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.status, "released");
        assert_eq!(updated.created_at, created.created_at);

        let missing = store.update("nope", ProjectInput::default()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn delete_reports_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let created = store.create(ProjectInput::default()).await.unwrap();

        assert!(store.delete(&created.id).await.unwrap());
        assert!(!store.delete(&created.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }
}
