//! Route handlers and shared helpers.
//!
//! Handlers answer errors as `{"error": "<stable_code>"}` so callers can
//! branch on codes without parsing prose; the codes are part of the API.

pub mod analytics;
pub mod auth;
pub mod editor;
pub mod health;

use axum::{
    Json,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StatusBody {
    pub status: String,
}

/// Uniform error answer with a stable machine-readable code.
pub(crate) fn error_response(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: code.to_string(),
        }),
    )
        .into_response()
}

pub(crate) fn ok_status() -> Response {
    (
        StatusCode::OK,
        Json(StatusBody {
            status: "ok".to_string(),
        }),
    )
        .into_response()
}

/// Resource ids accepted by the analytics endpoints.
pub(crate) fn valid_project_id(id: &str) -> bool {
    Regex::new(r"^[a-z0-9][a-z0-9-_]{0,63}$").is_ok_and(|re| re.is_match(id))
}

pub(crate) fn valid_file_id(id: &str) -> bool {
    Regex::new(r"^[a-zA-Z0-9._-]{1,128}$").is_ok_and(|re| re.is_match(id))
}

/// Extract a client IP for admission control from common proxy headers.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
