//! Time-based one-time-password verification.
//!
//! Shared secrets are provisioned out of band (enrollment is not part of
//! this service) and loaded at startup, one base32 secret per subject. A
//! code is checked against the current 30-second step with a skew of ±1.

use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use totp_rs::{Algorithm, Secret, TOTP};

pub struct TotpVerifier {
    secrets: HashMap<String, SecretString>,
}

impl TotpVerifier {
    #[must_use]
    pub fn new(secrets: HashMap<String, SecretString>) -> Self {
        Self { secrets }
    }

    /// Parse a `{subject: base32Secret}` JSON document; blank secrets are
    /// skipped.
    ///
    /// # Errors
    /// Returns an error if the document is not a string-to-string map.
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, String> =
            serde_json::from_str(raw).context("Failed to parse TOTP secrets")?;
        let secrets = parsed
            .into_iter()
            .filter_map(|(subject, secret)| {
                let secret = secret.trim();
                if secret.is_empty() {
                    None
                } else {
                    Some((subject, SecretString::from(secret.to_string())))
                }
            })
            .collect();
        Ok(Self { secrets })
    }

    #[must_use]
    pub fn available_for(&self, subject: &str) -> bool {
        self.secrets.contains_key(subject)
    }

    /// Check a submitted code for one subject.
    ///
    /// `Ok(false)` is a wrong code; `Err` means no secret is provisioned or
    /// the stored secret is malformed.
    ///
    /// # Errors
    /// Returns an error when no secret exists for the subject or it cannot
    /// be decoded.
    pub fn verify(&self, subject: &str, code: &str) -> Result<bool> {
        let secret = self
            .secrets
            .get(subject)
            .ok_or_else(|| anyhow!("no TOTP secret for subject"))?;
        let secret_bytes = Secret::Encoded(secret.expose_secret().to_string())
            .to_bytes()
            .map_err(|err| anyhow!("Invalid TOTP secret: {err:?}"))?;

        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, secret_bytes)
            .map_err(|err| anyhow!("TOTP init error: {err}"))?;
        Ok(totp.check_current(code).unwrap_or(false))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    fn verifier() -> TotpVerifier {
        TotpVerifier::from_json(&format!(r#"{{"sub-1": "{SECRET}"}}"#)).unwrap()
    }

    fn current_code() -> String {
        let secret_bytes = Secret::Encoded(SECRET.to_string()).to_bytes().unwrap();
        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, secret_bytes).unwrap();
        totp.generate_current().unwrap()
    }

    #[test]
    fn accepts_the_current_step() {
        assert!(verifier().verify("sub-1", &current_code()).unwrap());
    }

    #[test]
    fn rejects_wrong_codes() {
        let verifier = verifier();
        let mut wrong = current_code();
        // Flip one digit so the code is valid-shaped but incorrect.
        let last = wrong.pop().unwrap();
        wrong.push(if last == '0' { '1' } else { '0' });
        assert!(!verifier.verify("sub-1", &wrong).unwrap());
    }

    #[test]
    fn unknown_subject_is_an_error_not_a_miss() {
        assert!(verifier().verify("sub-2", "000000").is_err());
    }

    #[test]
    fn from_json_skips_blank_secrets() {
        let verifier =
            TotpVerifier::from_json(r#"{"a": "  ", "b": "JBSWY3DPEHPK3PXP"}"#).unwrap();
        assert!(!verifier.available_for("a"));
        assert!(verifier.available_for("b"));
    }
}
