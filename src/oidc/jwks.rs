//! Provider JWKS fetching and caching for ID-token verification.
//!
//! Keys are cached by kid and refreshed when the cache goes stale or a token
//! arrives with an unknown kid. A failed refresh keeps the last known keys
//! so verification does not flap with the provider.

use anyhow::{Context, Result, anyhow};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const CACHE_TTL: Duration = Duration::from_secs(3600);

/// A single key from the provider's JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus, base64url.
    pub n: Option<String>,
    /// RSA exponent, base64url.
    pub e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

#[derive(Default)]
pub struct JwksCache {
    keys: RwLock<HashMap<String, Jwk>>,
    fetched_at: RwLock<Option<Instant>>,
}

impl JwksCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a decoding key for `kid`, refreshing the cache when it is
    /// stale or the kid is unknown.
    ///
    /// # Errors
    /// Returns an error if the JWKS cannot be fetched or the key is not an
    /// RSA signature key.
    pub async fn decoding_key(
        &self,
        client: &reqwest::Client,
        jwks_uri: &str,
        kid: &str,
    ) -> Result<DecodingKey> {
        if self.is_fresh().await {
            if let Some(jwk) = self.keys.read().await.get(kid) {
                return decoding_key_from_jwk(jwk);
            }
        }

        if let Err(err) = self.refresh(client, jwks_uri).await {
            warn!(error = %err, url = jwks_uri, "jwks refresh failed; keeping cached keys");
        }

        let keys = self.keys.read().await;
        let jwk = keys
            .get(kid)
            .ok_or_else(|| anyhow!("no provider key for kid {kid}"))?;
        decoding_key_from_jwk(jwk)
    }

    async fn is_fresh(&self) -> bool {
        self.fetched_at
            .read()
            .await
            .is_some_and(|at| at.elapsed() < CACHE_TTL)
    }

    async fn refresh(&self, client: &reqwest::Client, jwks_uri: &str) -> Result<()> {
        let document: JwksDocument = client
            .get(jwks_uri)
            .send()
            .await
            .context("Failed to fetch provider JWKS")?
            .error_for_status()
            .context("Provider JWKS endpoint answered an error")?
            .json()
            .await
            .context("Invalid provider JWKS document")?;

        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in document.keys {
            if let Some(kid) = jwk.kid.clone() {
                keys.insert(kid, jwk);
            }
        }
        *self.fetched_at.write().await = Some(Instant::now());
        debug!(keys = keys.len(), "provider jwks cache refreshed");
        Ok(())
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey> {
    if jwk.kty != "RSA" {
        return Err(anyhow!("unsupported provider key type {}", jwk.kty));
    }
    if let Some(key_use) = &jwk.key_use {
        if key_use != "sig" {
            return Err(anyhow!("provider key is not a signature key"));
        }
    }
    let n = jwk.n.as_deref().ok_or_else(|| anyhow!("jwk missing modulus"))?;
    let e = jwk.e.as_deref().ok_or_else(|| anyhow!("jwk missing exponent"))?;
    DecodingKey::from_rsa_components(n, e).context("Invalid RSA components in provider JWKS")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_jwk(kid: &str) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: Some(kid.to_string()),
            key_use: Some("sig".to_string()),
            // 2048-bit modulus of a throwaway key; any valid base64url works
            // for constructing a decoding key.
            n: Some("u1SU1LfVLPHCozMxH2Mo4lgOEePzNm0tRgeLezV6ffAt0gunVTLw7onLRnrq0_IzW7yWR7QkrmBL7jTKEn5u-qKhbwKfBstIs-bMY2Zkp18gnTxKLxoS2tFczGkPLPgizskuemMghRniWaoLcyehkd3qqGElvW_VDL5AaWTg0nLVkjRo9z-40RQzuVaE8AkAFmxZzow3x-VJYKdjykkJ0iT9wCS0DRTXu269V264Vf_3jvredZiKRkgwlL9xNAwxXFg0x_XFw005UWVRIkdgcKWTjpBP2dPwVZ4WWC-9aGVd-Gyn1o0CLelf4rEjGoXbAAEgAqeGUxrcIlbjXfbcmw".to_string()),
            e: Some("AQAB".to_string()),
        }
    }

    #[test]
    fn rsa_signature_keys_decode() {
        assert!(decoding_key_from_jwk(&rsa_jwk("kid-1")).is_ok());
    }

    #[test]
    fn non_rsa_or_non_signature_keys_are_rejected() {
        let mut ec = rsa_jwk("kid-1");
        ec.kty = "EC".to_string();
        assert!(decoding_key_from_jwk(&ec).is_err());

        let mut enc = rsa_jwk("kid-2");
        enc.key_use = Some("enc".to_string());
        assert!(decoding_key_from_jwk(&enc).is_err());

        let mut partial = rsa_jwk("kid-3");
        partial.n = None;
        assert!(decoding_key_from_jwk(&partial).is_err());
    }
}
