//! Catalog editing endpoints.
//!
//! Creates and updates may reference previously staged uploads; the
//! referenced uploads are verified against the exact kind and path promised
//! at stage time, committed into the public tree, and only then does the
//! catalog record change. Any mismatch aborts the whole write.

pub mod uploads;

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::AuthState;
use super::auth::session::{require_authenticated, require_csrf};
use super::{error_response, ok_status};
use crate::catalog::{Project, ProjectInput, ProjectStore};
use crate::identity::Identity;
use crate::session::Session;
use crate::uploads::{UploadError, UploadKind, UploadStager};

pub struct EditorState {
    projects: Arc<ProjectStore>,
    stager: Arc<UploadStager>,
}

impl EditorState {
    #[must_use]
    pub fn new(projects: Arc<ProjectStore>, stager: Arc<UploadStager>) -> Self {
        Self { projects, stager }
    }

    #[must_use]
    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    #[must_use]
    pub fn stager(&self) -> &Arc<UploadStager> {
        &self.stager
    }
}

/// Reference to a staged upload, echoing what stage returned.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingUploadRef {
    pub upload_id: Uuid,
    pub suggested_path: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingUploads {
    #[serde(default)]
    pub download: Option<PendingUploadRef>,
    #[serde(default)]
    pub image: Option<PendingUploadRef>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectWriteRequest {
    #[serde(flatten)]
    pub project: ProjectInput,
    #[serde(default)]
    pub pending_uploads: Option<PendingUploads>,
}

#[utoipa::path(
    get,
    path = "/editor/projects",
    responses(
        (status = 200, description = "All catalog records in file order", body = [Project])
    ),
    tag = "editor"
)]
pub async fn list_projects(state: Extension<Arc<EditorState>>) -> Response {
    match state.projects.list().await {
        Ok(projects) => (StatusCode::OK, Json(projects)).into_response(),
        Err(err) => {
            error!("Failed to read catalog: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

#[utoipa::path(
    get,
    path = "/editor/projects/{id}",
    params(("id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "One catalog record", body = Project),
        (status = 401, description = "Authentication required", body = super::ErrorBody),
        (status = 404, description = "Unknown project", body = super::ErrorBody)
    ),
    tag = "editor"
)]
pub async fn get_project(
    headers: HeaderMap,
    Path(id): Path<String>,
    auth: Extension<Arc<AuthState>>,
    state: Extension<Arc<EditorState>>,
) -> Response {
    if let Err(response) = require_authenticated(&headers, &auth).await {
        return response;
    }
    match state.projects.get(&id).await {
        Ok(Some(project)) => (StatusCode::OK, Json(project)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "not_found"),
        Err(err) => {
            error!("Failed to read catalog: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

#[utoipa::path(
    post,
    path = "/editor/projects",
    request_body = ProjectWriteRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Referenced upload did not match", body = super::ErrorBody),
        (status = 401, description = "Authentication required", body = super::ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched", body = super::ErrorBody)
    ),
    tag = "editor"
)]
pub async fn create_project(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    state: Extension<Arc<EditorState>>,
    payload: Option<Json<ProjectWriteRequest>>,
) -> Response {
    let identity = match admit(&headers, &auth).await {
        Ok((_, identity)) => identity,
        Err(response) => return response,
    };
    let Some(Json(mut request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_payload");
    };

    let pending = request.pending_uploads.take().unwrap_or_default();
    if let Err(response) = apply_pending_uploads(&state, pending, &mut request.project).await {
        return response;
    }

    match state.projects.create(request.project).await {
        Ok(project) => {
            info!(project = %project.id, editor = %identity.subject, "project created");
            (StatusCode::CREATED, Json(project)).into_response()
        }
        Err(err) => {
            error!("Failed to write catalog: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

#[utoipa::path(
    put,
    path = "/editor/projects/{id}",
    params(("id" = String, Path, description = "Project id")),
    request_body = ProjectWriteRequest,
    responses(
        (status = 200, description = "Project updated", body = Project),
        (status = 400, description = "Referenced upload did not match", body = super::ErrorBody),
        (status = 401, description = "Authentication required", body = super::ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched", body = super::ErrorBody),
        (status = 404, description = "Unknown project", body = super::ErrorBody)
    ),
    tag = "editor"
)]
pub async fn update_project(
    headers: HeaderMap,
    Path(id): Path<String>,
    auth: Extension<Arc<AuthState>>,
    state: Extension<Arc<EditorState>>,
    payload: Option<Json<ProjectWriteRequest>>,
) -> Response {
    let identity = match admit(&headers, &auth).await {
        Ok((_, identity)) => identity,
        Err(response) => return response,
    };
    let Some(Json(mut request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_payload");
    };

    // The whole write aborts before any commit when the record is missing.
    match state.projects.get(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "not_found"),
        Err(err) => {
            error!("Failed to read catalog: {err:#}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
        }
    }

    let pending = request.pending_uploads.take().unwrap_or_default();
    if let Err(response) = apply_pending_uploads(&state, pending, &mut request.project).await {
        return response;
    }

    match state.projects.update(&id, request.project).await {
        Ok(Some(project)) => {
            info!(project = %project.id, editor = %identity.subject, "project updated");
            (StatusCode::OK, Json(project)).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "not_found"),
        Err(err) => {
            error!("Failed to write catalog: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

#[utoipa::path(
    delete,
    path = "/editor/projects/{id}",
    params(("id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project removed"),
        (status = 401, description = "Authentication required", body = super::ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched", body = super::ErrorBody),
        (status = 404, description = "Unknown project", body = super::ErrorBody)
    ),
    tag = "editor"
)]
pub async fn delete_project(
    headers: HeaderMap,
    Path(id): Path<String>,
    auth: Extension<Arc<AuthState>>,
    state: Extension<Arc<EditorState>>,
) -> Response {
    let identity = match admit(&headers, &auth).await {
        Ok((_, identity)) => identity,
        Err(response) => return response,
    };
    match state.projects.delete(&id).await {
        Ok(true) => {
            info!(project = %id, editor = %identity.subject, "project deleted");
            ok_status()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "not_found"),
        Err(err) => {
            error!("Failed to write catalog: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

pub(crate) async fn admit(
    headers: &HeaderMap,
    auth: &AuthState,
) -> Result<(Session, Identity), Response> {
    let (session, identity) = require_authenticated(headers, auth).await?;
    require_csrf(headers, &session)?;
    Ok((session, identity))
}

/// Verify every referenced upload first, then commit them all, then let the
/// catalog write proceed with the committed public paths.
async fn apply_pending_uploads(
    state: &EditorState,
    pending: PendingUploads,
    project: &mut ProjectInput,
) -> Result<(), Response> {
    let refs: Vec<(UploadKind, &PendingUploadRef)> = [
        (UploadKind::Download, pending.download.as_ref()),
        (UploadKind::Image, pending.image.as_ref()),
    ]
    .into_iter()
    .filter_map(|(kind, reference)| reference.map(|reference| (kind, reference)))
    .collect();

    for (kind, reference) in &refs {
        state
            .stager
            .verify_pending(reference.upload_id, *kind, &reference.suggested_path)
            .await
            .map_err(upload_mismatch_response)?;
    }

    for (kind, reference) in &refs {
        let public_path = state
            .stager
            .commit(reference.upload_id, *kind, &reference.suggested_path)
            .await
            .map_err(upload_mismatch_response)?;
        match kind {
            UploadKind::Download => project.download_file = Some(public_path),
            UploadKind::Image => project.image = Some(public_path),
        }
    }
    Ok(())
}

fn upload_mismatch_response(err: UploadError) -> Response {
    match err {
        UploadError::UnknownUpload => error_response(StatusCode::BAD_REQUEST, "upload_not_found"),
        UploadError::KindMismatch => {
            error_response(StatusCode::BAD_REQUEST, "upload_kind_mismatch")
        }
        UploadError::PathMismatch => {
            error_response(StatusCode::BAD_REQUEST, "upload_path_mismatch")
        }
        err => {
            error!("Upload commit failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}
