//! Identity federation client: authorization code + PKCE against an
//! external OpenID Connect provider.
//!
//! Discovery is lazy and cached so a provider outage surfaces on the login
//! request that needs it instead of failing the whole process at boot. The
//! authorization code is bound to this client through the PKCE verifier, and
//! the ID token is verified against the provider JWKS (issuer, audience,
//! expiry, nonce) before any claims are trusted.

pub mod jwks;

use crate::identity::Identity;
use crate::session::OidcTransaction;
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, Validation};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

const SCOPES: &str = "openid profile email";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
}

/// Subset of the provider discovery document this client needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

/// Everything begin-login stores on the session plus the redirect target.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    roles: Option<Vec<String>>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
}

pub struct OidcClient {
    config: OidcConfig,
    http: reqwest::Client,
    metadata: RwLock<Option<ProviderMetadata>>,
    jwks: jwks::JwksCache,
}

impl OidcClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: OidcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build OIDC HTTP client")?;
        Ok(Self {
            config,
            http,
            metadata: RwLock::new(None),
            jwks: jwks::JwksCache::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Begin an authorization-code flow: fresh PKCE pair, state, and nonce.
    ///
    /// # Errors
    /// Surfaces provider discovery failures to the caller.
    pub async fn authorization_request(&self) -> Result<AuthorizationRequest> {
        let metadata = self.metadata().await?;

        let pkce_verifier = random_urlsafe(32)?;
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce_verifier.as_bytes()));
        let state = random_urlsafe(16)?;
        let nonce = random_urlsafe(16)?;

        let url = build_authorization_url(
            &metadata.authorization_endpoint,
            &self.config,
            &state,
            &nonce,
            &challenge,
        )?;

        Ok(AuthorizationRequest {
            url,
            state,
            nonce,
            pkce_verifier,
        })
    }

    /// Exchange an authorization code for verified identity claims.
    ///
    /// # Errors
    /// Returns an error if the token endpoint is unreachable, the ID token
    /// fails signature or claim validation, or the nonce does not match.
    pub async fn exchange_code(&self, code: &str, txn: &OidcTransaction) -> Result<Identity> {
        let metadata = self.metadata().await?;

        let response = self
            .http
            .post(&metadata.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
                ("code_verifier", txn.pkce_verifier.as_str()),
            ])
            .send()
            .await
            .context("Token endpoint unreachable")?
            .error_for_status()
            .context("Token endpoint rejected the code exchange")?;
        let tokens: TokenResponse = response
            .json()
            .await
            .context("Invalid token endpoint response")?;

        let claims = self.verify_id_token(&metadata, &tokens.id_token).await?;
        if claims.nonce.as_deref() != Some(txn.nonce.as_str()) {
            return Err(anyhow!("ID token nonce does not match this login"));
        }
        identity_from_claims(claims)
    }

    async fn verify_id_token(
        &self,
        metadata: &ProviderMetadata,
        id_token: &str,
    ) -> Result<IdTokenClaims> {
        let header = jsonwebtoken::decode_header(id_token).context("Invalid ID token header")?;
        let kid = header.kid.ok_or_else(|| anyhow!("ID token missing kid"))?;
        let key = self
            .jwks
            .decoding_key(&self.http, &metadata.jwks_uri, &kid)
            .await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[metadata.issuer.as_str()]);
        validation.set_audience(&[self.config.client_id.as_str()]);

        let data = jsonwebtoken::decode::<IdTokenClaims>(id_token, &key, &validation)
            .context("ID token validation failed")?;
        Ok(data.claims)
    }

    async fn metadata(&self) -> Result<ProviderMetadata> {
        if let Some(metadata) = self.metadata.read().await.clone() {
            return Ok(metadata);
        }
        let url = discovery_url(&self.config.issuer_url);
        let metadata: ProviderMetadata = self
            .http
            .get(&url)
            .send()
            .await
            .context("Identity provider unreachable")?
            .error_for_status()
            .context("Identity provider discovery answered an error")?
            .json()
            .await
            .context("Invalid provider discovery document")?;
        *self.metadata.write().await = Some(metadata.clone());
        Ok(metadata)
    }
}

fn discovery_url(issuer_url: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer_url.trim_end_matches('/')
    )
}

fn build_authorization_url(
    endpoint: &str,
    config: &OidcConfig,
    state: &str,
    nonce: &str,
    challenge: &str,
) -> Result<String> {
    let mut url = Url::parse(endpoint).context("Invalid authorization endpoint")?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("scope", SCOPES)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state)
        .append_pair("nonce", nonce)
        .append_pair("response_mode", "query")
        .append_pair("prompt", "login");
    Ok(url.into())
}

fn identity_from_claims(claims: IdTokenClaims) -> Result<Identity> {
    if claims.sub.trim().is_empty() {
        return Err(anyhow!("ID token missing subject"));
    }
    let roles = match (claims.roles, claims.role) {
        (Some(roles), _) => roles,
        (None, Some(role)) => vec![role],
        (None, None) => Vec::new(),
    };
    Ok(Identity {
        subject: claims.sub,
        name: claims.name.unwrap_or_else(|| "Unknown".to_string()),
        email: claims.email,
        roles,
    })
}

fn random_urlsafe(bytes: usize) -> Result<String> {
    let mut buf = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buf)
        .context("failed to generate random value")?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> OidcConfig {
        OidcConfig {
            issuer_url: "https://idp.example.com/".to_string(),
            client_id: "editor-client".to_string(),
            client_secret: SecretString::from("secret".to_string()),
            redirect_uri: "https://editor.example.com/auth/callback".to_string(),
        }
    }

    #[test]
    fn discovery_url_trims_trailing_slash() {
        assert_eq!(
            discovery_url("https://idp.example.com/"),
            "https://idp.example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn authorization_url_carries_the_pkce_binding() {
        let url = build_authorization_url(
            "https://idp.example.com/authorize",
            &config(),
            "state-1",
            "nonce-1",
            "challenge-1",
        )
        .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        for (key, value) in [
            ("response_type", "code"),
            ("client_id", "editor-client"),
            ("code_challenge", "challenge-1"),
            ("code_challenge_method", "S256"),
            ("state", "state-1"),
            ("nonce", "nonce-1"),
            ("prompt", "login"),
        ] {
            assert!(
                pairs.iter().any(|(k, v)| k == key && v == value),
                "missing {key}={value} in {url}"
            );
        }
    }

    #[test]
    fn pkce_challenge_is_the_digest_of_the_verifier() {
        let verifier = random_urlsafe(32).unwrap();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        // RFC 7636: verifier must be 43-128 characters.
        assert!(verifier.len() >= 43 && verifier.len() <= 128);
        assert_eq!(challenge.len(), 43);
    }

    #[test]
    fn roles_fall_back_to_the_single_role_claim() {
        let claims = IdTokenClaims {
            sub: "sub-1".to_string(),
            name: None,
            email: None,
            roles: None,
            role: Some("editor".to_string()),
            nonce: None,
        };
        let identity = identity_from_claims(claims).unwrap();
        assert_eq!(identity.roles, vec!["editor".to_string()]);
        assert_eq!(identity.name, "Unknown");
    }

    #[test]
    fn blank_subjects_are_rejected() {
        let claims = IdTokenClaims {
            sub: "  ".to_string(),
            name: None,
            email: None,
            roles: None,
            role: None,
            nonce: None,
        };
        assert!(identity_from_claims(claims).is_err());
    }
}
