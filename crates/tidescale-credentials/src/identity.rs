//! Authorization identities and cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

/// The identity a credential is issued for.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum AuthorizationIdentity {
    /// Workload identity of the running pod, optionally assuming a role.
    PodIdentity { role: Option<String> },
    /// Static access keys.
    AccessKey {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
    /// No credentials (public or network-trusted endpoints).
    Anonymous,
}

impl AuthorizationIdentity {
    /// Short, non-secret label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::PodIdentity { role: Some(role) } => format!("pod-identity:{role}"),
            Self::PodIdentity { role: None } => "pod-identity".to_string(),
            Self::AccessKey { access_key_id, .. } => format!("access-key:{access_key_id}"),
            Self::Anonymous => "anonymous".to_string(),
        }
    }
}

impl fmt::Debug for AuthorizationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PodIdentity { role } => f
                .debug_struct("PodIdentity")
                .field("role", role)
                .finish(),
            Self::AccessKey { access_key_id, .. } => f
                .debug_struct("AccessKey")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish_non_exhaustive(),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Derive the cache key for a (region, identity) pair.
///
/// The key is a SHA-256 digest so secrets never appear in map keys or logs,
/// while rotated secrets still map to a fresh entry.
pub fn cache_key(region: &str, identity: &AuthorizationIdentity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(region.as_bytes());
    hasher.update([0u8]);

    match identity {
        AuthorizationIdentity::PodIdentity { role } => {
            hasher.update(b"pod");
            hasher.update([0u8]);
            hasher.update(role.as_deref().unwrap_or_default().as_bytes());
        }
        AuthorizationIdentity::AccessKey {
            access_key_id,
            secret_access_key,
            session_token,
        } => {
            hasher.update(b"key");
            hasher.update([0u8]);
            hasher.update(access_key_id.as_bytes());
            hasher.update([0u8]);
            hasher.update(secret_access_key.as_bytes());
            hasher.update([0u8]);
            hasher.update(session_token.as_deref().unwrap_or_default().as_bytes());
        }
        AuthorizationIdentity::Anonymous => hasher.update(b"anonymous"),
    }

    hex::encode(hasher.finalize())
}
