//! Federated identities and the per-subject cache.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Role claim required for any catalog mutation.
pub const EDITOR_ROLE: &str = "editor";

/// Identity asserted by the provider, cached per subject and refreshed on
/// every successful callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|candidate| candidate == role)
    }
}

#[derive(Default)]
pub struct IdentityCache {
    entries: Mutex<HashMap<String, Identity>>,
}

impl IdentityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, identity: Identity) {
        let mut entries = self.entries.lock().await;
        entries.insert(identity.subject.clone(), identity);
    }

    pub async fn get(&self, subject: &str) -> Option<Identity> {
        self.entries.lock().await.get(subject).cloned()
    }
}
