//! Two-phase admission of operator-uploaded binary assets.
//!
//! Stage writes a validated payload to a private temp location and records a
//! pending entry; commit atomically renames the temp file into the public
//! tree while persisting the catalog record that references it. Nothing is
//! visible publicly between the two phases, and entries that are never
//! committed are swept after a TTL.

pub mod registry;
pub mod stager;

pub use registry::{PendingState, PendingUpload, PendingUploadRegistry};
pub use stager::{StagedUpload, UploadStager};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Upload size ceiling, matching the raw-body limit on the staging route.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];
const IMAGE_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];
const DOWNLOAD_EXTENSIONS: &[&str] = &["zip", "mcfunction", "stl"];
const DOWNLOAD_MIME_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip-compressed",
    "text/plain",
    "model/stl",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Image,
    Download,
}

impl UploadKind {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "image" => Some(Self::Image),
            "download" => Some(Self::Download),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Download => "download",
        }
    }

    /// Public path prefix committed assets of this kind land under.
    #[must_use]
    pub const fn public_prefix(self) -> &'static str {
        match self {
            Self::Image => "assets/img/",
            Self::Download => "downloads/",
        }
    }

    fn allows_extension(self, extension: &str) -> bool {
        let allowed = match self {
            Self::Image => IMAGE_EXTENSIONS,
            Self::Download => DOWNLOAD_EXTENSIONS,
        };
        allowed.contains(&extension)
    }

    fn allows_content_type(self, content_type: &str) -> bool {
        let allowed = match self {
            Self::Image => IMAGE_MIME_TYPES,
            Self::Download => DOWNLOAD_MIME_TYPES,
        };
        allowed.contains(&content_type)
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("missing or empty payload")]
    EmptyPayload,
    #[error("payload exceeds {MAX_UPLOAD_BYTES} bytes")]
    PayloadTooLarge,
    #[error("extension or content type not allowed for this kind")]
    DisallowedType,
    #[error("unknown or already consumed upload id")]
    UnknownUpload,
    #[error("upload kind does not match the staged kind")]
    KindMismatch,
    #[error("path does not match the path promised at stage time")]
    PathMismatch,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Strip path components and collapse anything outside `[a-zA-Z0-9._-]`.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let sanitized = sanitize_segment(base);
    if sanitized.is_empty() {
        "file".to_string()
    } else {
        sanitized
    }
}

fn sanitize_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
            last_dash = ch == '-';
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Lowercased extension of a filename, without the dot.
#[must_use]
pub fn file_extension(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}
