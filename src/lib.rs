//! # Vestibule (Editor Trust & Asset-Ingestion Backend)
//!
//! `vestibule` is the backend trust layer behind a small content catalog's
//! admin editor. It authenticates an operator through a federated identity
//! provider plus a second factor, authorizes catalog mutations, and safely
//! admits operator-uploaded binary assets into public storage.
//!
//! ## Sessions & MFA
//!
//! Sessions move forward only: `Anonymous` → `PendingMfa` (after the OIDC
//! callback lands an identity with the `editor` role) → `Authenticated`
//! (after a security-key or TOTP check). Completing authentication
//! regenerates the session id, so a cookie captured before the trust
//! boundary is useless after it. MFA failures are reported uniformly.
//!
//! ## Asset ingestion
//!
//! Uploads are admitted in two phases: stage validates and parks the payload
//! privately, returning a promised public path; commit renames the file into
//! the public tree only while the catalog write that references it is
//! persisted, and only when the id, kind, and path all match the stage-time
//! promise. Entries that never commit are swept after a TTL.
//!
//! ## Durability & concurrency
//!
//! State is single-instance by design: the catalog and download counters are
//! single JSON files, and the counter store funnels every mutation through a
//! writer lane so concurrent increments are never lost. Running multiple
//! processes against the same files needs an external coordinator.

pub mod api;
pub mod catalog;
pub mod cli;
pub mod counters;
pub mod csrf;
pub mod identity;
pub mod mfa;
pub mod oidc;
pub mod rate_limit;
pub mod session;
pub mod totp;
pub mod uploads;
pub mod webauthn;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
