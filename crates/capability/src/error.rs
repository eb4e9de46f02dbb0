//! Error types for the capability crate.

use thiserror::Error;

/// Capability error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum CapabilityError {
    // Configuration errors
    /// The signing secret is shorter than the required minimum.
    #[error("signing secret too short: {len} bytes, need at least {min}")]
    SecretTooShort {
        /// Actual secret length in bytes.
        len: usize,
        /// Minimum acceptable length in bytes.
        min: usize,
    },

    // Resource-id errors
    /// The resource id contains characters outside the allowed charset.
    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),

    /// The resource id exceeds the maximum allowed length.
    #[error("resource id too long: {len} characters exceeds maximum of {max}")]
    ResourceIdTooLong {
        /// Actual length in characters.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    // Token errors
    /// The token is not in the expected `payload.tag` wire form.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The token's signature does not match its payload.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The token's expiry timestamp has passed.
    #[error("token expired at {expires_at}, now {now}")]
    Expired {
        /// Unix timestamp at which the token expired.
        expires_at: u64,
        /// Unix timestamp of the verification attempt.
        now: u64,
    },

    // Serialization errors
    /// Failed to serialize or deserialize claims.
    #[error("claims serialization failed: {0}")]
    Serialization(String),
}

/// Result type alias for capability operations.
pub type Result<T> = std::result::Result<T, CapabilityError>;

impl From<serde_json::Error> for CapabilityError {
    fn from(err: serde_json::Error) -> Self {
        CapabilityError::Serialization(err.to_string())
    }
}
