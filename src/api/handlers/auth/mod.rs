//! Login, MFA, and session endpoints.
//!
//! Flow Overview: begin-login redirects to the identity provider; the
//! callback lands the candidate identity in `PendingMfa`; one factor check
//! (security key or TOTP) completes authentication, regenerating the session
//! id across the trust boundary.

pub mod mfa;
pub mod oidc;
pub mod session;
pub mod state;

pub use state::{AuthConfig, AuthState};
