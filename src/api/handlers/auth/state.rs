//! Auth configuration and shared state.

use crate::identity::IdentityCache;
use crate::mfa::MfaVerifier;
use crate::oidc::OidcClient;
use crate::rate_limit::RateLimiter;
use crate::session::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_SESSION_TTL_SECONDS: u64 = 15 * 60;
const MFA_REDIRECT_PATH: &str = "/editor/mfa";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    app_origin: String,
    rp_id: String,
    session_ttl_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(app_origin: String) -> Self {
        let rp_id = Url::parse(&app_origin)
            .ok()
            .and_then(|url| url.host_str().map(ToString::to_string))
            .unwrap_or_else(|| "localhost".to_string());
        let app_origin = app_origin.trim_end_matches('/').to_string();
        Self {
            app_origin,
            rp_id,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_rp_id(mut self, rp_id: String) -> Self {
        self.rp_id = rp_id;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn app_origin(&self) -> &str {
        &self.app_origin
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    /// Cookies are only marked secure when the app is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.app_origin.starts_with("https://")
    }

    #[must_use]
    pub fn mfa_redirect_url(&self) -> String {
        format!("{}{MFA_REDIRECT_PATH}", self.app_origin)
    }
}

pub struct AuthState {
    config: AuthConfig,
    sessions: SessionStore,
    oidc: OidcClient,
    mfa: MfaVerifier,
    identities: IdentityCache,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        oidc: OidcClient,
        mfa: MfaVerifier,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let sessions = SessionStore::new(config.session_ttl());
        Self {
            config,
            sessions,
            oidc,
            mfa,
            identities: IdentityCache::new(),
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn oidc(&self) -> &OidcClient {
        &self.oidc
    }

    #[must_use]
    pub fn mfa(&self) -> &MfaVerifier {
        &self.mfa
    }

    #[must_use]
    pub fn identities(&self) -> &IdentityCache {
        &self.identities
    }

    pub(crate) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_derives_rp_id_from_the_origin() {
        let config = AuthConfig::new("https://editor.example.com/".to_string());
        assert_eq!(config.app_origin(), "https://editor.example.com");
        assert_eq!(config.rp_id(), "editor.example.com");
        assert!(config.session_cookie_secure());
        assert_eq!(
            config.mfa_redirect_url(),
            "https://editor.example.com/editor/mfa"
        );
    }

    #[test]
    fn auth_config_overrides() {
        let config = AuthConfig::new("http://localhost:3000".to_string())
            .with_rp_id("localhost".to_string())
            .with_session_ttl_seconds(60);
        assert!(!config.session_cookie_secure());
        assert_eq!(config.session_ttl(), Duration::from_secs(60));
        assert_eq!(config.rp_id(), "localhost");
    }
}
