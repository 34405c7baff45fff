use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered authenticator owned by one identity.
///
/// `key` is the verifier library's serialized security-key record (public
/// key, credential id, transports, backup flags), kept opaque in storage and
/// deserialized by the service. `sign_count` is tracked here so the
/// strictly-increasing check stays independent of the library internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    /// Base64url credential id, as reported by the authenticator.
    pub credential_id: String,
    /// External subject id of the owning identity.
    pub subject: String,
    #[serde(default)]
    pub label: Option<String>,
    pub key: serde_json::Value,
    pub sign_count: u32,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}
