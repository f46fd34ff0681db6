//! Revoked credential domain types

use super::common::{mysql_string_enum, StringUuid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

/// Why a credential was revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Logout,
    Security,
    AdminRevoke,
}

impl std::str::FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logout" => Ok(Self::Logout),
            "security" => Ok(Self::Security),
            "admin_revoke" => Ok(Self::AdminRevoke),
            _ => Err(format!("Unknown revocation reason: {}", s)),
        }
    }
}

impl std::fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logout => write!(f, "logout"),
            Self::Security => write!(f, "security"),
            Self::AdminRevoke => write!(f, "admin_revoke"),
        }
    }
}

mysql_string_enum!(RevocationReason);

/// SHA-256 hex digest identifying a token in the registry
pub fn token_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// One revoked credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RevocationEntry {
    /// See [`token_fingerprint`]
    pub token_hash: String,
    pub user_id: StringUuid,
    pub tenant_id: Option<StringUuid>,
    pub reason: RevocationReason,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RevocationEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Every credential of `user_id` carrying a token version below
/// `min_token_version` is revoked until `expires_at` (by then all such
/// credentials have stopped verifying).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserRevocation {
    pub user_id: StringUuid,
    pub tenant_id: Option<StringUuid>,
    pub reason: RevocationReason,
    pub min_token_version: i64,
    pub revoked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UserRevocation {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whether a credential stamped with `token_version` is covered.
    pub fn covers(&self, token_version: i64) -> bool {
        token_version < self.min_token_version
    }

    /// Fold `other` into `self`: the higher version floor and the later expiry win.
    pub fn merge(&mut self, other: UserRevocation) {
        let expires_at = self.expires_at.max(other.expires_at);
        if other.min_token_version >= self.min_token_version {
            *self = other;
        }
        self.expires_at = expires_at;
    }
}
