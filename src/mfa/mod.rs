//! Second-factor dispatch.
//!
//! Both factors sit behind one tagged-variant contract: callers hand a
//! `MfaInput` to `MfaVerifier::verify` and get back which method succeeded,
//! or an error the handlers map onto the uniform `verification_failed`
//! answer. Handlers never talk to a factor implementation directly.

use crate::totp::TotpVerifier;
use crate::webauthn::SecurityKeyService;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use webauthn_rs::prelude::{PublicKeyCredential, RequestChallengeResponse};

/// Factor a session was authenticated with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    Webauthn,
    Totp,
}

impl MfaMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webauthn => "webauthn",
            Self::Totp => "totp",
        }
    }
}

/// One submitted factor proof.
#[derive(Debug)]
pub enum MfaInput {
    SecurityKey(Box<PublicKeyCredential>),
    Totp { code: String },
}

#[derive(Debug, Error)]
pub enum MfaError {
    #[error("no credentials registered")]
    NoCredentials,
    #[error("credential not found")]
    CredentialNotFound,
    #[error("totp not provisioned for this identity")]
    TotpNotAvailable,
    #[error("verification failed")]
    Failed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct MfaVerifier {
    security_keys: SecurityKeyService,
    totp: TotpVerifier,
}

impl MfaVerifier {
    #[must_use]
    pub fn new(security_keys: SecurityKeyService, totp: TotpVerifier) -> Self {
        Self {
            security_keys,
            totp,
        }
    }

    /// Issue a security-key challenge bound server-side to the session.
    ///
    /// # Errors
    /// `NoCredentials` when the subject has nothing registered.
    pub async fn challenge(
        &self,
        session_token: &str,
        subject: &str,
    ) -> Result<RequestChallengeResponse, MfaError> {
        self.security_keys.challenge_begin(session_token, subject).await
    }

    /// Verify one factor proof with the uniform contract.
    ///
    /// # Errors
    /// Factor-specific not-found errors pass through; every cryptographic or
    /// replay failure collapses into `Failed`.
    pub async fn verify(
        &self,
        session_token: &str,
        subject: &str,
        input: MfaInput,
    ) -> Result<MfaMethod, MfaError> {
        match input {
            MfaInput::SecurityKey(assertion) => {
                self.security_keys
                    .verify_finish(session_token, subject, &assertion)
                    .await?;
                Ok(MfaMethod::Webauthn)
            }
            MfaInput::Totp { code } => {
                if !self.totp.available_for(subject) {
                    return Err(MfaError::TotpNotAvailable);
                }
                match self.totp.verify(subject, &code) {
                    Ok(true) => Ok(MfaMethod::Totp),
                    Ok(false) => Err(MfaError::Failed),
                    Err(err) => {
                        warn!(error = %err, "totp verification errored");
                        Err(MfaError::Failed)
                    }
                }
            }
        }
    }

    /// Drop any outstanding challenge for a session (logout, expiry).
    pub async fn clear_challenge(&self, session_token: &str) {
        self.security_keys.clear_challenge(session_token).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::webauthn::CredentialStore;
    use secrecy::SecretString;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn verifier(totp_secrets: HashMap<String, SecretString>) -> MfaVerifier {
        let credentials = Arc::new(CredentialStore::in_memory(Vec::new()));
        let security_keys = SecurityKeyService::new(
            "editor.example.com",
            "https://editor.example.com",
            credentials,
        )
        .unwrap();
        MfaVerifier::new(security_keys, TotpVerifier::new(totp_secrets))
    }

    #[tokio::test]
    async fn totp_without_secret_is_not_available() {
        let verifier = verifier(HashMap::new());
        let err = verifier
            .verify(
                "session",
                "sub-1",
                MfaInput::Totp {
                    code: "123456".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfaError::TotpNotAvailable));
    }

    #[tokio::test]
    async fn wrong_totp_code_fails_uniformly() {
        let mut secrets = HashMap::new();
        secrets.insert(
            "sub-1".to_string(),
            SecretString::from("JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".to_string()),
        );
        let verifier = verifier(secrets);
        let err = verifier
            .verify(
                "session",
                "sub-1",
                MfaInput::Totp {
                    code: "000000".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MfaError::Failed));
    }

    #[tokio::test]
    async fn security_key_challenge_requires_registered_credentials() {
        let verifier = verifier(HashMap::new());
        let err = verifier.challenge("session", "sub-1").await.unwrap_err();
        assert!(matches!(err, MfaError::NoCredentials));
    }
}
