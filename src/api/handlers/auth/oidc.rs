//! Begin-login and provider-callback endpoints.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::IntoParams;

use super::session::{current_session, extract_session_token, session_cookie};
use super::state::AuthState;
use crate::api::handlers::{error_response, extract_client_ip};
use crate::identity::EDITOR_ROLE;
use crate::rate_limit::{RateLimitAction, RateLimitDecision};
use crate::session::{OidcTransaction, SessionState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[utoipa::path(
    get,
    path = "/auth/login",
    responses(
        (status = 307, description = "Redirect to the identity provider"),
        (status = 400, description = "Session is already past login", body = crate::api::handlers::ErrorBody),
        (status = 429, description = "Rate limited", body = crate::api::handlers::ErrorBody),
        (status = 502, description = "Identity provider unreachable", body = crate::api::handlers::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> Response {
    let client_ip = extract_client_ip(&headers);
    if auth
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "too_many_requests");
    }

    let presented = extract_session_token(&headers);
    let (session, created) = match auth.sessions().get_or_create(presented.as_deref()).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Failed to create session: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
        }
    };
    if !matches!(session.state, SessionState::Anonymous) {
        return error_response(StatusCode::BAD_REQUEST, "already_authenticated");
    }

    // Provider unreachability is surfaced here, on the request that needs it.
    let request = match auth.oidc().authorization_request().await {
        Ok(request) => request,
        Err(err) => {
            error!("Identity provider unreachable: {err:#}");
            return error_response(StatusCode::BAD_GATEWAY, "provider_unreachable");
        }
    };

    let txn = OidcTransaction {
        state: request.state,
        nonce: request.nonce,
        pkce_verifier: request.pkce_verifier,
    };
    auth.sessions()
        .update(&session.token, move |session| {
            session.oidc = Some(txn);
        })
        .await;

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

    (response_headers, Redirect::temporary(&request.url)).into_response()
}

#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackQuery),
    responses(
        (status = 307, description = "Redirect to the MFA step"),
        (status = 400, description = "Missing transaction or state mismatch", body = crate::api::handlers::ErrorBody),
        (status = 403, description = "Identity lacks the editor role", body = crate::api::handlers::ErrorBody),
        (status = 502, description = "Code exchange failed", body = crate::api::handlers::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn callback(
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
    auth: Extension<Arc<AuthState>>,
) -> Response {
    let client_ip = extract_client_ip(&headers);
    if auth
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "too_many_requests");
    }

    let Some(session) = current_session(&headers, &auth).await else {
        return error_response(StatusCode::BAD_REQUEST, "missing_oidc_session");
    };
    let Some(txn) = session.oidc.clone() else {
        return error_response(StatusCode::BAD_REQUEST, "missing_oidc_session");
    };
    if query.state.as_deref() != Some(txn.state.as_str()) {
        return error_response(StatusCode::BAD_REQUEST, "invalid_state");
    }
    let Some(code) = query.code.as_deref().map(str::trim).filter(|code| !code.is_empty())
    else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_state");
    };

    let identity = match auth.oidc().exchange_code(code, &txn).await {
        Ok(identity) => identity,
        Err(err) => {
            error!("Code exchange failed: {err:#}");
            return error_response(StatusCode::BAD_GATEWAY, "exchange_failed");
        }
    };

    if !identity.has_role(EDITOR_ROLE) {
        warn!(subject = %identity.subject, "callback identity lacks editor role");
        return error_response(StatusCode::FORBIDDEN, "insufficient_scope");
    }

    auth.identities().upsert(identity.clone()).await;
    let subject = identity.subject.clone();
    if !auth.sessions().begin_mfa(&session.token, identity).await {
        // The session expired between lookup and update.
        return error_response(StatusCode::BAD_REQUEST, "missing_oidc_session");
    }

    info!(subject = %subject, "login pending second factor");
    Redirect::temporary(&auth.config().mfa_redirect_url()).into_response()
}
