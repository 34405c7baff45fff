//! Cookie-bound sessions and the login state machine.
//!
//! A session moves forward only: `Anonymous` → `PendingMfa` (successful
//! provider callback) → `Authenticated` (successful factor check). The only
//! way back is logout or expiry. Completing authentication always issues a
//! fresh session id and invalidates the old one, so a token captured before
//! the trust boundary is worthless after it.

use crate::identity::Identity;
use crate::mfa::MfaMethod;
use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const SESSION_COOKIE_NAME: &str = "vestibule_session";

/// Provider transaction fields held between begin-login and callback.
#[derive(Debug, Clone)]
pub struct OidcTransaction {
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: String,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Anonymous,
    PendingMfa {
        identity: Identity,
    },
    Authenticated {
        identity: Identity,
        method: MfaMethod,
        authenticated_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub state: SessionState,
    pub oidc: Option<OidcTransaction>,
    pub csrf_token: Option<String>,
    expires_at: Instant,
}

impl Session {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated { .. })
    }

    /// Candidate identity while the second factor is outstanding.
    #[must_use]
    pub fn pending_identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::PendingMfa { identity } => Some(identity),
            _ => None,
        }
    }

    #[must_use]
    pub fn authenticated_identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Authenticated { identity, .. } => Some(identity),
            _ => None,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a fresh anonymous session with a fixed, non-sliding expiry.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub async fn create(&self) -> Result<Session> {
        let session = Session {
            token: generate_token()?,
            state: SessionState::Anonymous,
            oidc: None,
            csrf_token: None,
            expires_at: Instant::now() + self.ttl,
        };
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| !entry.expired());
        sessions.insert(session.token.clone(), session.clone());
        Ok(session)
    }

    /// Look up a session by cookie token; expired entries are dropped.
    pub async fn get(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(token) {
            Some(session) if session.expired() => {
                sessions.remove(token);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }

    /// Resolve the presented token or create a session on first use.
    ///
    /// Returns the session and whether it was newly created (and thus needs
    /// a Set-Cookie on the response).
    ///
    /// # Errors
    /// Returns an error if a fresh session cannot be created.
    pub async fn get_or_create(&self, token: Option<&str>) -> Result<(Session, bool)> {
        if let Some(token) = token {
            if let Some(session) = self.get(token).await {
                return Ok((session, false));
            }
        }
        Ok((self.create().await?, true))
    }

    /// Apply a mutation to a live session; `false` when the token is unknown
    /// or expired.
    pub async fn update<F>(&self, token: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(token) {
            Some(session) if !session.expired() => {
                mutate(session);
                true
            }
            _ => false,
        }
    }

    /// Record the provider callback outcome: candidate identity stored,
    /// transaction fields cleared, state advanced to `PendingMfa`.
    pub async fn begin_mfa(&self, token: &str, identity: Identity) -> bool {
        self.update(token, |session| {
            session.state = SessionState::PendingMfa { identity };
            session.oidc = None;
        })
        .await
    }

    /// Complete authentication after a successful factor check.
    ///
    /// The old session is removed and a new id issued before the
    /// authenticated identity is recorded; only a `PendingMfa` session can
    /// complete. Returns the replacement session.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub async fn authenticate(&self, token: &str, method: MfaMethod) -> Result<Option<Session>> {
        let mut sessions = self.sessions.lock().await;
        let identity = match sessions.get(token) {
            Some(session) if !session.expired() => match &session.state {
                SessionState::PendingMfa { identity } => identity.clone(),
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        sessions.remove(token);

        let replacement = Session {
            token: generate_token()?,
            state: SessionState::Authenticated {
                identity,
                method,
                authenticated_at: Utc::now(),
            },
            oidc: None,
            csrf_token: None,
            expires_at: Instant::now() + self.ttl,
        };
        sessions.insert(replacement.token.clone(), replacement.clone());
        Ok(Some(replacement))
    }

    /// Destroy a session; `true` when one existed.
    pub async fn destroy(&self, token: &str) -> bool {
        self.sessions.lock().await.remove(token).is_some()
    }
}

/// Opaque session token for the cookie. The store keys sessions by the raw
/// value; it never leaves the process except in the Set-Cookie header.
fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            subject: "sub-1".to_string(),
            name: "Operator".to_string(),
            email: Some("op@example.com".to_string()),
            roles: vec!["editor".to_string()],
        }
    }

    #[tokio::test]
    async fn anonymous_sessions_cannot_authenticate() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.create().await.unwrap();

        let result = store
            .authenticate(&session.token, MfaMethod::Totp)
            .await
            .unwrap();
        assert!(result.is_none());
        // The failed attempt must not consume the session.
        assert!(store.get(&session.token).await.is_some());
    }

    #[tokio::test]
    async fn authentication_regenerates_the_session_id() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.create().await.unwrap();
        assert!(store.begin_mfa(&session.token, identity()).await);

        let replacement = store
            .authenticate(&session.token, MfaMethod::Webauthn)
            .await
            .unwrap()
            .unwrap();

        assert_ne!(replacement.token, session.token);
        assert!(store.get(&session.token).await.is_none());
        let live = store.get(&replacement.token).await.unwrap();
        assert!(live.is_authenticated());
        assert_eq!(
            live.authenticated_identity().map(|id| id.subject.as_str()),
            Some("sub-1")
        );
    }

    #[tokio::test]
    async fn expired_sessions_are_unreachable() {
        let store = SessionStore::new(Duration::ZERO);
        let session = store.create().await.unwrap();
        assert!(store.get(&session.token).await.is_none());
        assert!(!store.begin_mfa(&session.token, identity()).await);
    }

    #[tokio::test]
    async fn get_or_create_reuses_live_sessions() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (first, created) = store.get_or_create(None).await.unwrap();
        assert!(created);

        let (second, created) = store.get_or_create(Some(&first.token)).await.unwrap();
        assert!(!created);
        assert_eq!(second.token, first.token);

        let (third, created) = store.get_or_create(Some("stale-token")).await.unwrap();
        assert!(created);
        assert_ne!(third.token, first.token);
    }

    #[tokio::test]
    async fn begin_mfa_clears_the_provider_transaction() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.create().await.unwrap();
        store
            .update(&session.token, |session| {
                session.oidc = Some(OidcTransaction {
                    state: "state".to_string(),
                    nonce: "nonce".to_string(),
                    pkce_verifier: "verifier".to_string(),
                });
            })
            .await;

        store.begin_mfa(&session.token, identity()).await;
        let live = store.get(&session.token).await.unwrap();
        assert!(live.oidc.is_none());
        assert_eq!(
            live.pending_identity().map(|id| id.subject.as_str()),
            Some("sub-1")
        );
    }
}
