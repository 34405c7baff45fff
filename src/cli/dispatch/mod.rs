//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands;
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);

    let required = |name: &str| -> Result<String> {
        matches
            .get_one::<String>(name)
            .cloned()
            .with_context(|| format!("missing required argument: --{name}"))
    };

    let app_origin = required(commands::ARG_APP_ORIGIN)?;
    let oidc_issuer_url = required(commands::ARG_OIDC_ISSUER_URL)?;
    let oidc_client_id = required(commands::ARG_OIDC_CLIENT_ID)?;
    let oidc_client_secret = SecretString::from(required(commands::ARG_OIDC_CLIENT_SECRET)?);
    let oidc_redirect_uri = required(commands::ARG_OIDC_REDIRECT_URI)?;

    let data_dir = matches
        .get_one::<String>(commands::ARG_DATA_DIR)
        .map_or_else(|| PathBuf::from("data"), PathBuf::from);
    let site_dir = matches
        .get_one::<String>(commands::ARG_SITE_DIR)
        .map_or_else(|| PathBuf::from("site"), PathBuf::from);

    Ok(Action::Server(Args {
        port,
        data_dir,
        site_dir,
        app_origin,
        oidc_issuer_url,
        oidc_client_id,
        oidc_client_secret,
        oidc_redirect_uri,
        rp_id: matches.get_one::<String>(commands::ARG_RP_ID).cloned(),
        totp_secrets_path: matches
            .get_one::<String>(commands::ARG_TOTP_SECRETS_PATH)
            .map(PathBuf::from),
        webauthn_credentials_path: matches
            .get_one::<String>(commands::ARG_WEBAUTHN_CREDENTIALS_PATH)
            .map(PathBuf::from),
        session_ttl_seconds: matches
            .get_one::<u64>(commands::ARG_SESSION_TTL_SECONDS)
            .copied()
            .unwrap_or(900),
        upload_ttl_seconds: matches
            .get_one::<u64>(commands::ARG_UPLOAD_TTL_SECONDS)
            .copied()
            .unwrap_or(900),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_origin_required() {
        temp_env::with_vars(
            [
                ("VESTIBULE_APP_ORIGIN", None::<&str>),
                ("VESTIBULE_OIDC_ISSUER_URL", Some("https://idp.example.com")),
                ("VESTIBULE_OIDC_CLIENT_ID", Some("editor")),
                ("VESTIBULE_OIDC_CLIENT_SECRET", Some("secret")),
                (
                    "VESTIBULE_OIDC_REDIRECT_URI",
                    Some("https://editor.example.com/auth/callback"),
                ),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["vestibule"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(
                        err.to_string()
                            .contains("missing required argument: --app-origin")
                    );
                }
            },
        );
    }

    #[test]
    fn full_configuration_dispatches_to_server() {
        temp_env::with_vars(
            [
                ("VESTIBULE_APP_ORIGIN", Some("https://editor.example.com")),
                ("VESTIBULE_OIDC_ISSUER_URL", Some("https://idp.example.com")),
                ("VESTIBULE_OIDC_CLIENT_ID", Some("editor")),
                ("VESTIBULE_OIDC_CLIENT_SECRET", Some("secret")),
                (
                    "VESTIBULE_OIDC_REDIRECT_URI",
                    Some("https://editor.example.com/auth/callback"),
                ),
                ("VESTIBULE_PORT", Some("8088")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["vestibule"]);
                let action = handler(&matches).expect("dispatch");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8088);
                assert_eq!(args.app_origin, "https://editor.example.com");
                assert_eq!(args.data_dir, PathBuf::from("data"));
                assert!(args.rp_id.is_none());
            },
        );
    }
}
