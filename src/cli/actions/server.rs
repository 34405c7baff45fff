use crate::api;
use crate::api::handlers::{
    analytics::AnalyticsState,
    auth::{AuthConfig, AuthState},
    editor::EditorState,
};
use crate::catalog::ProjectStore;
use crate::counters::CounterStore;
use crate::mfa::MfaVerifier;
use crate::oidc::{OidcClient, OidcConfig};
use crate::rate_limit::{FixedWindowRateLimiter, RateLimiter};
use crate::totp::TotpVerifier;
use crate::uploads::UploadStager;
use crate::webauthn::{CredentialStore, SecurityKeyService};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub data_dir: PathBuf,
    pub site_dir: PathBuf,
    pub app_origin: String,
    pub oidc_issuer_url: String,
    pub oidc_client_id: String,
    pub oidc_client_secret: SecretString,
    pub oidc_redirect_uri: String,
    pub rp_id: Option<String>,
    pub totp_secrets_path: Option<PathBuf>,
    pub webauthn_credentials_path: Option<PathBuf>,
    pub session_ttl_seconds: u64,
    pub upload_ttl_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if credential files cannot be loaded or the server
/// fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let totp = match &args.totp_secrets_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read TOTP secrets: {}", path.display()))?;
            TotpVerifier::from_json(&raw)?
        }
        None => TotpVerifier::new(HashMap::new()),
    };

    let credentials = Arc::new(match &args.webauthn_credentials_path {
        Some(path) => CredentialStore::load(path).await?,
        None => CredentialStore::in_memory(Vec::new()),
    });

    let mut auth_config = AuthConfig::new(args.app_origin.clone())
        .with_session_ttl_seconds(args.session_ttl_seconds);
    if let Some(rp_id) = args.rp_id {
        auth_config = auth_config.with_rp_id(rp_id);
    }

    let security_keys = SecurityKeyService::new(
        auth_config.rp_id(),
        auth_config.app_origin(),
        credentials,
    )?;
    let mfa = MfaVerifier::new(security_keys, totp);

    let oidc = OidcClient::new(OidcConfig {
        issuer_url: args.oidc_issuer_url,
        client_id: args.oidc_client_id,
        client_secret: args.oidc_client_secret,
        redirect_uri: args.oidc_redirect_uri,
    })?;

    let rate_limiter: Arc<dyn RateLimiter> = Arc::new(FixedWindowRateLimiter::new());
    let auth = Arc::new(AuthState::new(
        auth_config,
        oidc,
        mfa,
        Arc::clone(&rate_limiter),
    ));

    let projects = Arc::new(ProjectStore::open(args.data_dir.join("projects.json")).await?);
    let counters = Arc::new(CounterStore::open(args.data_dir.join("download-counts.json")).await?);
    let stager = Arc::new(
        UploadStager::new(
            args.data_dir.join("tmp-uploads"),
            args.site_dir.clone(),
            Duration::from_secs(args.upload_ttl_seconds),
        )
        .await?,
    );

    let editor = Arc::new(EditorState::new(Arc::clone(&projects), stager));
    let analytics = Arc::new(AnalyticsState::new(counters, projects, rate_limiter));

    info!(
        data_dir = %args.data_dir.display(),
        site_dir = %args.site_dir.display(),
        "stores initialized"
    );

    api::new(args.port, auth, editor, analytics).await
}
