//! Resource-id validation.
//!
//! Remote-store resource ids are opaque tokens, but they have a known shape:
//! URL-safe characters only, bounded length. Validating them syntactically
//! before any network call keeps shaped ids (path traversal, query
//! injection) away from the remote store entirely.

use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, Result};

/// Maximum length of a resource id in characters.
pub const MAX_RESOURCE_ID_LEN: usize = 128;

/// A validated remote-store resource identifier.
///
/// Construction goes through [`ResourceId::parse`], so holding a `ResourceId`
/// is proof the id passed the charset and length checks. The inner string is
/// deliberately private; use [`ResourceId::as_str`] to read it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Validates and wraps a raw resource id.
    ///
    /// Accepts non-empty strings of ASCII alphanumerics, `-` and `_`, up to
    /// [`MAX_RESOURCE_ID_LEN`] characters. Anything else (separators, dots,
    /// whitespace, control characters) is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(CapabilityError::InvalidResourceId("empty id".to_string()));
        }
        if raw.len() > MAX_RESOURCE_ID_LEN {
            return Err(CapabilityError::ResourceIdTooLong {
                len: raw.len(),
                max: MAX_RESOURCE_ID_LEN,
            });
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(CapabilityError::InvalidResourceId(format!(
                "disallowed character in id: {raw:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the validated id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ResourceId {
    type Error = CapabilityError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}
