//! Second-factor endpoints.
//!
//! All MFA-sensitive failures answer a uniform `verification_failed` so a
//! caller cannot learn which check rejected them; only the two not-found
//! cases the client needs for UI routing keep distinct codes.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use webauthn_rs::prelude::PublicKeyCredential;

use super::session::{require_csrf, require_pending_mfa, session_cookie};
use super::state::AuthState;
use crate::api::handlers::{error_response, extract_client_ip, ok_status};
use crate::identity::Identity;
use crate::mfa::{MfaError, MfaInput, MfaMethod};
use crate::rate_limit::{RateLimitAction, RateLimitDecision};
use crate::session::Session;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpVerifyRequest {
    pub token: String,
}

#[utoipa::path(
    post,
    path = "/auth/webauthn/challenge",
    responses(
        (status = 200, description = "Security-key challenge options"),
        (status = 401, description = "No pending login", body = crate::api::handlers::ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched", body = crate::api::handlers::ErrorBody),
        (status = 404, description = "No credentials registered", body = crate::api::handlers::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn webauthn_challenge(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
) -> Response {
    let (session, identity) = match admit(&headers, &auth).await {
        Ok(outcome) => outcome,
        Err(response) => return response,
    };

    match auth.mfa().challenge(&session.token, &identity.subject).await {
        Ok(options) => (StatusCode::OK, Json(options)).into_response(),
        Err(MfaError::NoCredentials) => {
            error_response(StatusCode::NOT_FOUND, "no_credentials_registered")
        }
        Err(err) => {
            error!("Failed to issue security-key challenge: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/webauthn/verify",
    responses(
        (status = 200, description = "Session authenticated"),
        (status = 401, description = "Verification failed", body = crate::api::handlers::ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched", body = crate::api::handlers::ErrorBody),
        (status = 404, description = "Credential not found", body = crate::api::handlers::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn webauthn_verify(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    payload: Option<Json<PublicKeyCredential>>,
) -> Response {
    let (session, identity) = match admit(&headers, &auth).await {
        Ok(outcome) => outcome,
        Err(response) => return response,
    };
    let Some(Json(assertion)) = payload else {
        return error_response(StatusCode::UNAUTHORIZED, "verification_failed");
    };

    let outcome = auth
        .mfa()
        .verify(
            &session.token,
            &identity.subject,
            MfaInput::SecurityKey(Box::new(assertion)),
        )
        .await;
    match outcome {
        Ok(method) => finish_authentication(&auth, &session, &identity, method).await,
        Err(MfaError::NoCredentials) => {
            error_response(StatusCode::NOT_FOUND, "no_credentials_registered")
        }
        Err(MfaError::CredentialNotFound) => {
            error_response(StatusCode::NOT_FOUND, "credential_not_found")
        }
        Err(MfaError::Internal(err)) => {
            error!("Security-key verification errored: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
        Err(_) => {
            warn!(subject = %identity.subject, "security-key verification failed");
            error_response(StatusCode::UNAUTHORIZED, "verification_failed")
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/totp/verify",
    request_body = TotpVerifyRequest,
    responses(
        (status = 200, description = "Session authenticated"),
        (status = 400, description = "Missing or malformed code", body = crate::api::handlers::ErrorBody),
        (status = 401, description = "Verification failed", body = crate::api::handlers::ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched", body = crate::api::handlers::ErrorBody),
        (status = 404, description = "TOTP not provisioned", body = crate::api::handlers::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn totp_verify(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    payload: Option<Json<TotpVerifyRequest>>,
) -> Response {
    let (session, identity) = match admit(&headers, &auth).await {
        Ok(outcome) => outcome,
        Err(response) => return response,
    };

    let code = payload
        .map(|Json(request)| request.token.trim().to_string())
        .unwrap_or_default();
    if code.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_token");
    }

    let outcome = auth
        .mfa()
        .verify(&session.token, &identity.subject, MfaInput::Totp { code })
        .await;
    match outcome {
        Ok(method) => finish_authentication(&auth, &session, &identity, method).await,
        Err(MfaError::TotpNotAvailable) => {
            error_response(StatusCode::NOT_FOUND, "totp_not_available")
        }
        Err(MfaError::Internal(err)) => {
            error!("TOTP verification errored: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
        Err(_) => {
            warn!(subject = %identity.subject, "totp verification failed");
            error_response(StatusCode::UNAUTHORIZED, "verification_failed")
        }
    }
}

/// Rate limit first, then the PendingMfa and CSRF guards, in that order, so
/// abuse is bounded before any state is touched.
async fn admit(
    headers: &HeaderMap,
    auth: &AuthState,
) -> Result<(Session, Identity), Response> {
    let client_ip = extract_client_ip(headers);
    if auth
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::MfaVerify)
        == RateLimitDecision::Limited
    {
        return Err(error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "too_many_requests",
        ));
    }
    let (session, identity) = require_pending_mfa(headers, auth).await?;
    require_csrf(headers, &session)?;
    Ok((session, identity))
}

/// Complete authentication for either factor: the session id is regenerated
/// before the authenticated identity is recorded, so the pre-auth cookie is
/// dead past the trust boundary.
async fn finish_authentication(
    auth: &AuthState,
    session: &Session,
    identity: &Identity,
    method: MfaMethod,
) -> Response {
    let replacement = match auth.sessions().authenticate(&session.token, method).await {
        Ok(Some(replacement)) => replacement,
        Ok(None) => {
            // The session moved or expired mid-verification.
            return error_response(StatusCode::UNAUTHORIZED, "login_required");
        }
        Err(err) => {
            error!("Failed to regenerate session: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
        }
    };
    auth.mfa().clear_challenge(&session.token).await;

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth.config(), &replacement.token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
        }
    }

    info!(subject = %identity.subject, method = method.as_str(), "authentication complete");
    (response_headers, ok_status()).into_response()
}
