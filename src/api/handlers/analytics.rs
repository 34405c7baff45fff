//! Download analytics endpoints.
//!
//! Reads are open and tolerant: malformed ids are silently filtered. The
//! recorder sits behind admission control and validates everything against
//! the catalog before the counter store is touched.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use utoipa::{IntoParams, ToSchema};

use super::{error_response, extract_client_ip, valid_file_id, valid_project_id};
use crate::catalog::{Project, ProjectStore};
use crate::counters::{CounterStore, RecordMetadata};
use crate::rate_limit::{RateLimitAction, RateLimitDecision, RateLimiter};

pub struct AnalyticsState {
    counters: Arc<CounterStore>,
    projects: Arc<ProjectStore>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AnalyticsState {
    #[must_use]
    pub fn new(
        counters: Arc<CounterStore>,
        projects: Arc<ProjectStore>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            counters,
            projects,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CountsQuery {
    /// Comma-separated resource ids.
    pub ids: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CountsResponse {
    pub counts: HashMap<String, u64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RecordDownloadRequest {
    pub project_id: String,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecordDownloadResponse {
    pub count: u64,
}

#[utoipa::path(
    get,
    path = "/analytics/downloads",
    params(CountsQuery),
    responses(
        (status = 200, description = "Counts per requested id; malformed ids are filtered", body = CountsResponse)
    ),
    tag = "analytics"
)]
pub async fn get_downloads(
    Query(query): Query<CountsQuery>,
    state: Extension<Arc<AnalyticsState>>,
) -> Response {
    let ids: Vec<String> = query
        .ids
        .unwrap_or_default()
        .split(',')
        .map(|id| id.trim().to_lowercase())
        .filter(|id| valid_project_id(id))
        .collect();
    if ids.is_empty() {
        return (
            StatusCode::OK,
            Json(CountsResponse {
                counts: HashMap::new(),
            }),
        )
            .into_response();
    }

    let counts = state.counters.counts(&ids).await;
    (StatusCode::OK, Json(CountsResponse { counts })).into_response()
}

#[utoipa::path(
    post,
    path = "/analytics/downloads",
    request_body = RecordDownloadRequest,
    responses(
        (status = 202, description = "Download recorded", body = RecordDownloadResponse),
        (status = 400, description = "Invalid or unregistered id/file/path", body = super::ErrorBody),
        (status = 404, description = "Project not in the catalog", body = super::ErrorBody),
        (status = 429, description = "Rate limited", body = super::ErrorBody)
    ),
    tag = "analytics"
)]
pub async fn record_download(
    headers: HeaderMap,
    state: Extension<Arc<AnalyticsState>>,
    payload: Option<Json<RecordDownloadRequest>>,
) -> Response {
    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter
        .check_ip(client_ip.as_deref(), RateLimitAction::RecordDownload)
        == RateLimitDecision::Limited
    {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "too_many_requests");
    }

    let Some(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_project");
    };

    let project_id = request.project_id.trim().to_lowercase();
    if !valid_project_id(&project_id) {
        return error_response(StatusCode::BAD_REQUEST, "invalid_project");
    }

    let project = match state.projects.get(&project_id).await {
        Ok(Some(project)) => project,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "project_not_found"),
        Err(err) => {
            error!("Failed to read catalog: {err:#}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
        }
    };

    let mut file_id = None;
    if let Some(raw) = request.file_id.as_deref().map(str::trim) {
        if !raw.is_empty() {
            if !valid_file_id(raw) {
                return error_response(StatusCode::BAD_REQUEST, "invalid_file");
            }
            if !file_registered(&project, raw) {
                return error_response(StatusCode::BAD_REQUEST, "file_not_registered");
            }
            file_id = Some(raw.to_string());
        }
    }

    let mut download_path = None;
    if let Some(raw) = request.path.as_deref().map(str::trim) {
        if !raw.is_empty() {
            if raw.len() > 256 {
                return error_response(StatusCode::BAD_REQUEST, "invalid_path");
            }
            if project.download_file != raw {
                return error_response(StatusCode::BAD_REQUEST, "path_not_registered");
            }
            download_path = Some(raw.to_string());
        }
    }

    match state
        .counters
        .record(
            &project_id,
            RecordMetadata {
                file_id,
                path: download_path,
            },
        )
        .await
    {
        Ok(entry) => (
            StatusCode::ACCEPTED,
            Json(RecordDownloadResponse { count: entry.count }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to record download event: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "download_record_failed")
        }
    }
}

/// A file id is registered when it names the project's download archive.
fn file_registered(project: &Project, file_id: &str) -> bool {
    project
        .download_file
        .rsplit('/')
        .next()
        .is_some_and(|name| name == file_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn project(download_file: &str) -> Project {
        Project {
            id: "jetpack".to_string(),
            title: "Jetpack".to_string(),
            kind: "datapack".to_string(),
            short_description: String::new(),
            mc_version: String::new(),
            status: "released".to_string(),
            category: String::new(),
            tags: Vec::new(),
            download_file: download_file.to_string(),
            image: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn file_registered_matches_the_archive_basename() {
        let with_file = project("downloads/jetpack-1.21.8.zip");
        assert!(file_registered(&with_file, "jetpack-1.21.8.zip"));
        assert!(!file_registered(&with_file, "other.zip"));

        let without_file = project("");
        assert!(!file_registered(&without_file, "jetpack-1.21.8.zip"));
    }
}
