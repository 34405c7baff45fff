//! Security-key ceremony coordination.

use super::store::{CredentialError, CredentialStore};
use crate::mfa::MfaError;
use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;
use webauthn_rs::prelude::*;

/// Outstanding challenges are dropped after this long.
const CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

struct PendingAssertion {
    state: SecurityKeyAuthentication,
    created_at: Instant,
}

pub struct SecurityKeyService {
    webauthn: Webauthn,
    credentials: Arc<CredentialStore>,
    /// In-memory ceremony state, keyed by the session that asked for it. The
    /// challenge never round-trips through the client.
    pending: Mutex<HashMap<String, PendingAssertion>>,
}

impl SecurityKeyService {
    /// # Errors
    /// Returns an error if the relying-party origin is not a valid URL or
    /// the verifier cannot be built.
    pub fn new(
        rp_id: &str,
        rp_origin: &str,
        credentials: Arc<CredentialStore>,
    ) -> anyhow::Result<Self> {
        let origin = Url::parse(rp_origin)?;
        let webauthn = WebauthnBuilder::new(rp_id, &origin)?
            .rp_name("Vestibule Editor")
            .build()?;
        Ok(Self {
            webauthn,
            credentials,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Start an authentication ceremony for the subject's registered keys.
    ///
    /// # Errors
    /// `NoCredentials` when nothing is registered for the subject.
    pub async fn challenge_begin(
        &self,
        session_token: &str,
        subject: &str,
    ) -> Result<RequestChallengeResponse, MfaError> {
        let stored = self.credentials.list_for_subject(subject).await;
        if stored.is_empty() {
            return Err(MfaError::NoCredentials);
        }

        let keys: Vec<SecurityKey> = stored
            .iter()
            .filter_map(|entry| serde_json::from_value(entry.key.clone()).ok())
            .collect();
        if keys.is_empty() {
            return Err(MfaError::Internal(anyhow!(
                "registered credentials could not be decoded"
            )));
        }

        let (challenge, state) = self
            .webauthn
            .start_securitykey_authentication(&keys)
            .map_err(|err| MfaError::Internal(anyhow!("challenge generation failed: {err}")))?;

        let mut pending = self.pending.lock().await;
        pending.retain(|_, entry| entry.created_at.elapsed() < CHALLENGE_TTL);
        pending.insert(
            session_token.to_string(),
            PendingAssertion {
                state,
                created_at: Instant::now(),
            },
        );

        Ok(challenge)
    }

    /// Verify an assertion against the stored public key and the challenge
    /// issued to this session, then persist the advanced counter.
    ///
    /// # Errors
    /// `CredentialNotFound` when the asserted id is not registered for the
    /// subject; `Failed` for a missing challenge, a cryptographic mismatch,
    /// or a counter that did not strictly increase.
    pub async fn verify_finish(
        &self,
        session_token: &str,
        subject: &str,
        assertion: &PublicKeyCredential,
    ) -> Result<(), MfaError> {
        let stored = self.credentials.list_for_subject(subject).await;
        if stored.is_empty() {
            return Err(MfaError::NoCredentials);
        }
        let Some(entry) = stored
            .iter()
            .find(|entry| entry.credential_id == assertion.id)
        else {
            return Err(MfaError::CredentialNotFound);
        };

        let Some(pending) = self.take_challenge(session_token).await else {
            return Err(MfaError::Failed);
        };

        let result = self
            .webauthn
            .finish_securitykey_authentication(assertion, &pending.state)
            .map_err(|err| {
                warn!(error = %err, "security key assertion rejected");
                MfaError::Failed
            })?;

        // Sync the library's view of the counter before persisting ours.
        let updated_key = serde_json::from_value::<SecurityKey>(entry.key.clone())
            .ok()
            .and_then(|mut key| {
                key.update_credential(&result);
                serde_json::to_value(&key).ok()
            });

        self.credentials
            .record_verification(subject, &entry.credential_id, result.counter(), updated_key)
            .await
            .map_err(|err| match err {
                CredentialError::NotFound => MfaError::CredentialNotFound,
                CredentialError::CounterReplayed => {
                    warn!(subject, "authenticator counter replayed");
                    MfaError::Failed
                }
                CredentialError::Persist(err) => MfaError::Internal(err),
            })
    }

    /// Drop any outstanding challenge for a session.
    pub async fn clear_challenge(&self, session_token: &str) {
        self.pending.lock().await.remove(session_token);
    }

    async fn take_challenge(&self, session_token: &str) -> Option<PendingAssertion> {
        let mut pending = self.pending.lock().await;
        let entry = pending.remove(session_token)?;
        if entry.created_at.elapsed() < CHALLENGE_TTL {
            Some(entry)
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::webauthn::models::StoredCredential;

    fn service(entries: Vec<StoredCredential>) -> SecurityKeyService {
        SecurityKeyService::new(
            "editor.example.com",
            "https://editor.example.com",
            Arc::new(CredentialStore::in_memory(entries)),
        )
        .unwrap()
    }

    fn opaque_credential(subject: &str, id: &str) -> StoredCredential {
        StoredCredential {
            credential_id: id.to_string(),
            subject: subject.to_string(),
            label: Some("backup key".to_string()),
            key: serde_json::json!({}),
            sign_count: 3,
            last_used_at: None,
        }
    }

    fn assertion(id: &str) -> PublicKeyCredential {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "rawId": "dGVzdA",
            "response": {
                "authenticatorData": "dGVzdA",
                "clientDataJSON": "dGVzdA",
                "signature": "dGVzdA",
                "userHandle": null
            },
            "extensions": {},
            "type": "public-key"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn challenge_requires_credentials() {
        let service = service(Vec::new());
        let err = service.challenge_begin("session", "sub-1").await.unwrap_err();
        assert!(matches!(err, MfaError::NoCredentials));
    }

    #[tokio::test]
    async fn unregistered_assertion_id_is_not_found() {
        let service = service(vec![opaque_credential("sub-1", "cred-1")]);
        let err = service
            .verify_finish("session", "sub-1", &assertion("cred-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, MfaError::CredentialNotFound));
    }

    #[tokio::test]
    async fn verify_without_an_issued_challenge_fails() {
        let service = service(vec![opaque_credential("sub-1", "cred-1")]);
        let err = service
            .verify_finish("session", "sub-1", &assertion("cred-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MfaError::Failed));
    }

    #[tokio::test]
    async fn cleared_challenges_cannot_verify() {
        let service = service(vec![opaque_credential("sub-1", "cred-1")]);
        service.clear_challenge("session").await;
        let err = service
            .verify_finish("session", "sub-1", &assertion("cred-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MfaError::Failed));
    }
}
