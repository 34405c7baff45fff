//! Session cookie handling, request guards, and the CSRF/logout endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::state::{AuthConfig, AuthState};
use crate::api::handlers::error_response;
use crate::csrf::{self, CSRF_HEADER};
use crate::identity::Identity;
use crate::session::{SESSION_COOKIE_NAME, Session};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

#[utoipa::path(
    get,
    path = "/auth/csrf-token",
    responses(
        (status = 200, description = "Anti-forgery token bound to this session", body = CsrfTokenResponse)
    ),
    tag = "auth"
)]
pub async fn csrf_token(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
) -> Response {
    let presented = extract_session_token(&headers);
    let (session, created) = match auth.sessions().get_or_create(presented.as_deref()).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Failed to create session: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
        }
    };

    let token = if let Some(token) = session.csrf_token.clone() {
        token
    } else {
        let token = match csrf::generate_token() {
            Ok(token) => token,
            Err(err) => {
                error!("Failed to generate csrf token: {err}");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
            }
        };
        let stored = token.clone();
        auth.sessions()
            .update(&session.token, move |session| {
                session.csrf_token = Some(stored);
            })
            .await;
        token
    };

    let mut response_headers = HeaderMap::new();
    if created {
        match session_cookie(auth.config(), &session.token) {
            Ok(cookie) => {
                response_headers.insert(SET_COOKIE, cookie);
            }
            Err(err) => {
                error!("Failed to build session cookie: {err}");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
            }
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(CsrfTokenResponse { csrf_token: token }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Session destroyed, cookie cleared"),
        (status = 403, description = "CSRF token missing or mismatched", body = crate::api::handlers::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> Response {
    if let Some(token) = extract_session_token(&headers) {
        if let Some(session) = auth.sessions().get(&token).await {
            if let Err(response) = require_csrf(&headers, &session) {
                return response;
            }
            auth.sessions().destroy(&token).await;
            auth.mfa().clear_challenge(&token).await;
        }
    }

    // Always clear the cookie, even when no session record existed.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// Resolve the session cookie into a live session, if any.
pub(crate) async fn current_session(headers: &HeaderMap, auth: &AuthState) -> Option<Session> {
    let token = extract_session_token(headers)?;
    auth.sessions().get(&token).await
}

/// Session must exist and hold a candidate identity awaiting its factor.
pub(crate) async fn require_pending_mfa(
    headers: &HeaderMap,
    auth: &AuthState,
) -> Result<(Session, Identity), Response> {
    let Some(session) = current_session(headers, auth).await else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "login_required"));
    };
    let Some(identity) = session.pending_identity().cloned() else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "login_required"));
    };
    Ok((session, identity))
}

/// Session must have completed both login and a factor check.
pub(crate) async fn require_authenticated(
    headers: &HeaderMap,
    auth: &AuthState,
) -> Result<(Session, Identity), Response> {
    let Some(session) = current_session(headers, auth).await else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "login_required"));
    };
    let Some(identity) = session.authenticated_identity().cloned() else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "login_required"));
    };
    Ok((session, identity))
}

/// The request must present the session-bound anti-forgery token.
pub(crate) fn require_csrf(headers: &HeaderMap, session: &Session) -> Result<(), Response> {
    let presented = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let expected = session.csrf_token.as_deref();
    match (expected, presented) {
        (Some(expected), Some(presented)) if csrf::tokens_match(expected, presented) => Ok(()),
        _ => Err(error_response(StatusCode::FORBIDDEN, "csrf_invalid")),
    }
}

/// Build the httpOnly strict-same-site session cookie with its fixed expiry.
pub(crate) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_session_token_parses_cookie_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; vestibule_session=tok-123; theme=dark"),
        );
        assert_eq!(extract_session_token(&headers), Some("tok-123".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("other=1"));
        assert_eq!(extract_session_token(&headers), None);
    }

    #[test]
    fn session_cookie_attributes() {
        let config = AuthConfig::new("https://editor.example.com".to_string())
            .with_session_ttl_seconds(900);
        let cookie = session_cookie(&config, "tok").unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Max-Age=900"));
        assert!(cookie.contains("Secure"));

        let insecure = AuthConfig::new("http://localhost:3000".to_string());
        let cookie = clear_session_cookie(&insecure).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
        assert!(!cookie.contains("Secure"));
    }
}
