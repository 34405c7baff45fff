pub mod logging;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DATA_DIR: &str = "data-dir";
pub const ARG_SITE_DIR: &str = "site-dir";
pub const ARG_APP_ORIGIN: &str = "app-origin";
pub const ARG_OIDC_ISSUER_URL: &str = "oidc-issuer-url";
pub const ARG_OIDC_CLIENT_ID: &str = "oidc-client-id";
pub const ARG_OIDC_CLIENT_SECRET: &str = "oidc-client-secret";
pub const ARG_OIDC_REDIRECT_URI: &str = "oidc-redirect-uri";
pub const ARG_RP_ID: &str = "rp-id";
pub const ARG_TOTP_SECRETS_PATH: &str = "totp-secrets-path";
pub const ARG_WEBAUTHN_CREDENTIALS_PATH: &str = "webauthn-credentials-path";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_UPLOAD_TTL_SECONDS: &str = "upload-ttl-seconds";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("vestibule")
        .about("Trust and asset-ingestion backend for a content catalog editor")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("VESTIBULE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DATA_DIR)
                .long(ARG_DATA_DIR)
                .help("Directory for the catalog, counter file, and staged uploads")
                .default_value("data")
                .env("VESTIBULE_DATA_DIR"),
        )
        .arg(
            Arg::new(ARG_SITE_DIR)
                .long(ARG_SITE_DIR)
                .help("Public site root committed assets are published under")
                .default_value("site")
                .env("VESTIBULE_SITE_DIR"),
        )
        .arg(
            Arg::new(ARG_APP_ORIGIN)
                .long(ARG_APP_ORIGIN)
                .help("Origin the editor frontend is served from, e.g. https://editor.example.com")
                .env("VESTIBULE_APP_ORIGIN"),
        )
        .arg(
            Arg::new(ARG_OIDC_ISSUER_URL)
                .long(ARG_OIDC_ISSUER_URL)
                .help("Identity provider issuer URL")
                .env("VESTIBULE_OIDC_ISSUER_URL"),
        )
        .arg(
            Arg::new(ARG_OIDC_CLIENT_ID)
                .long(ARG_OIDC_CLIENT_ID)
                .help("OAuth2 client id registered with the provider")
                .env("VESTIBULE_OIDC_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_OIDC_CLIENT_SECRET)
                .long(ARG_OIDC_CLIENT_SECRET)
                .help("OAuth2 client secret")
                .env("VESTIBULE_OIDC_CLIENT_SECRET"),
        )
        .arg(
            Arg::new(ARG_OIDC_REDIRECT_URI)
                .long(ARG_OIDC_REDIRECT_URI)
                .help("Redirect URI registered for the authorization-code flow")
                .env("VESTIBULE_OIDC_REDIRECT_URI"),
        )
        .arg(
            Arg::new(ARG_RP_ID)
                .long(ARG_RP_ID)
                .help("WebAuthn relying-party id (defaults to the app origin host)")
                .env("VESTIBULE_RP_ID"),
        )
        .arg(
            Arg::new(ARG_TOTP_SECRETS_PATH)
                .long(ARG_TOTP_SECRETS_PATH)
                .help("JSON file mapping subject ids to base32 TOTP secrets")
                .env("VESTIBULE_TOTP_SECRETS_PATH"),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_CREDENTIALS_PATH)
                .long(ARG_WEBAUTHN_CREDENTIALS_PATH)
                .help("JSON file of registered security keys")
                .env("VESTIBULE_WEBAUTHN_CREDENTIALS_PATH"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Fixed session lifetime in seconds (non-sliding)")
                .default_value("900")
                .env("VESTIBULE_SESSION_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_UPLOAD_TTL_SECONDS)
                .long(ARG_UPLOAD_TTL_SECONDS)
                .help("How long a staged upload stays committable")
                .default_value("900")
                .env("VESTIBULE_UPLOAD_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        );

    logging::with_args(command)
}
