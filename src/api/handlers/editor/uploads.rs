//! Upload staging endpoints.

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::IntoParams;
use uuid::Uuid;

use super::super::auth::AuthState;
use super::super::error_response;
use super::{EditorState, admit};
use crate::uploads::{StagedUpload, UploadError, UploadKind};

/// Header the client declares the original filename in.
pub const UPLOAD_FILENAME_HEADER: &str = "x-upload-filename";

#[derive(Debug, Deserialize, IntoParams)]
pub struct StageQuery {
    pub kind: Option<String>,
}

#[utoipa::path(
    post,
    path = "/editor/uploads",
    params(StageQuery),
    responses(
        (status = 201, description = "Payload staged; nothing public yet", body = StagedUpload),
        (status = 400, description = "Invalid kind, filename, or file type", body = crate::api::handlers::ErrorBody),
        (status = 401, description = "Authentication required", body = crate::api::handlers::ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched", body = crate::api::handlers::ErrorBody),
        (status = 413, description = "Payload exceeds the size ceiling", body = crate::api::handlers::ErrorBody)
    ),
    tag = "editor"
)]
pub async fn stage_upload(
    headers: HeaderMap,
    Query(query): Query<StageQuery>,
    auth: Extension<Arc<AuthState>>,
    state: Extension<Arc<EditorState>>,
    body: Bytes,
) -> Response {
    if let Err(response) = admit(&headers, &auth).await {
        return response;
    }

    let Some(kind) = query.kind.as_deref().and_then(UploadKind::parse) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_upload");
    };
    let Some(filename) = headers
        .get(UPLOAD_FILENAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_upload");
    };
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    match state.stager().stage(kind, filename, content_type, &body).await {
        Ok(staged) => (StatusCode::CREATED, Json(staged)).into_response(),
        Err(UploadError::EmptyPayload) => error_response(StatusCode::BAD_REQUEST, "invalid_upload"),
        Err(UploadError::PayloadTooLarge) => {
            error_response(StatusCode::PAYLOAD_TOO_LARGE, "file_too_large")
        }
        Err(UploadError::DisallowedType) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_file_type")
        }
        Err(err) => {
            error!("Failed to stage upload: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

#[utoipa::path(
    delete,
    path = "/editor/uploads/{id}",
    params(("id" = String, Path, description = "Pending upload id")),
    responses(
        (status = 204, description = "Pending upload cancelled, temp file removed"),
        (status = 401, description = "Authentication required", body = crate::api::handlers::ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched", body = crate::api::handlers::ErrorBody),
        (status = 404, description = "Unknown or already consumed upload", body = crate::api::handlers::ErrorBody)
    ),
    tag = "editor"
)]
pub async fn cancel_upload(
    headers: HeaderMap,
    Path(id): Path<String>,
    auth: Extension<Arc<AuthState>>,
    state: Extension<Arc<EditorState>>,
) -> Response {
    if let Err(response) = admit(&headers, &auth).await {
        return response;
    }

    // Ids that never came from stage look the same as consumed ones.
    let Ok(id) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::NOT_FOUND, "upload_not_found");
    };
    match state.stager().cancel(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(UploadError::UnknownUpload) => {
            error_response(StatusCode::NOT_FOUND, "upload_not_found")
        }
        Err(err) => {
            error!("Failed to cancel upload: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}
