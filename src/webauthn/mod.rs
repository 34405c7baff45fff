//! Hardware security-key verification (second factor).
//!
//! The service coordinates the challenge-response protocol: challenges are
//! generated server-side and bound to the requesting session, never accepted
//! from the client; assertions are verified against the stored public key,
//! expected origin, and relying-party id; and the authenticator's signature
//! counter must strictly increase on every verification or the assertion is
//! rejected as a possible replay or clone.

pub mod models;
pub mod service;
pub mod store;

pub use models::StoredCredential;
pub use service::SecurityKeyService;
pub use store::{CredentialError, CredentialStore};
