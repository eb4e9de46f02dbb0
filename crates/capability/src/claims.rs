//! Share and session claim definitions.
//!
//! Claims are concrete tagged structs, validated by serde at the codec
//! boundary. A share claim is a capability over one resource: presented
//! against the resource itself it grants a download, presented against a
//! folder it doubles as an ancestor unlock for everything beneath it.
//! A session claim carries the caller's identity as established by the
//! external sign-in collaborator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resource::ResourceId;

/// Claims carried inside a signed token, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Claims {
    /// A share capability scoped to one resource.
    Share(ShareClaims),
    /// A caller identity established by the sign-in collaborator.
    Session(SessionClaims),
}

impl Claims {
    /// Unix timestamp at which these claims expire.
    pub fn expires_at(&self) -> u64 {
        match self {
            Claims::Share(c) => c.expires_at,
            Claims::Session(c) => c.expires_at,
        }
    }

    /// Unique token id, used as the revocation-set key.
    pub fn jti(&self) -> &str {
        match self {
            Claims::Share(c) => &c.jti,
            Claims::Session(c) => &c.jti,
        }
    }
}

/// A share capability over a single resource.
///
/// Immutable once issued. Revocation is recorded externally by `jti`, so an
/// unexpired token can still be dead; the holder cannot tell the difference,
/// which is the point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareClaims {
    /// The resource (file or folder) this capability grants access to.
    pub resource_id: ResourceId,
    /// Unix timestamp of issuance.
    pub issued_at: u64,
    /// Unix timestamp after which the capability is invalid.
    pub expires_at: u64,
    /// Unique token id (revocation-set key).
    pub jti: String,
    /// Whether presenting this capability additionally requires an active
    /// signed-in session.
    pub login_required: bool,
}

impl ShareClaims {
    /// Creates new share claims issued at `issued_at` with the given TTL.
    pub fn new(resource_id: ResourceId, issued_at: u64, ttl_secs: u64, login_required: bool) -> Self {
        Self {
            resource_id,
            issued_at,
            expires_at: issued_at.saturating_add(ttl_secs),
            jti: Uuid::new_v4().to_string(),
            login_required,
        }
    }

    /// Remaining lifetime in seconds at time `now`, zero if already expired.
    pub fn remaining_ttl(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// A caller identity claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Email address of the signed-in caller.
    pub email: String,
    /// Whether the caller holds administrator rights.
    pub is_admin: bool,
    /// Unix timestamp of issuance.
    pub issued_at: u64,
    /// Unix timestamp after which the session is invalid.
    pub expires_at: u64,
    /// Unique token id.
    pub jti: String,
}

impl SessionClaims {
    /// Creates new session claims issued at `issued_at` with the given TTL.
    pub fn new(email: String, is_admin: bool, issued_at: u64, ttl_secs: u64) -> Self {
        Self {
            email,
            is_admin,
            issued_at,
            expires_at: issued_at.saturating_add(ttl_secs),
            jti: Uuid::new_v4().to_string(),
        }
    }
}
