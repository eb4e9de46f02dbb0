//! HMAC-SHA256 token signing and verification.
//!
//! The wire form is `base64url(json claims) "." base64url(tag)` with no
//! padding. The tag is a standard HMAC-SHA256 over the payload bytes,
//! derived from SHA-256 directly via the ipad/opad construction. Signature
//! comparison is constant-time.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::claims::Claims;
use crate::error::{CapabilityError, Result};

/// Minimum length of the signing secret in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// SHA-256 block size, used for HMAC key padding.
const BLOCK_SIZE: usize = 64;
const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5C;

/// Signs and verifies capability tokens with a server-held symmetric secret.
///
/// The codec is pure: it checks signature and expiry only. Revocation lives
/// with the gateway's token service, which layers a revocation-set lookup on
/// top of [`TokenCodec::verify`].
pub struct TokenCodec {
    key: Vec<u8>,
}

// The signing key must never reach logs or panic messages.
impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Creates a codec from the signing secret.
    ///
    /// Fails with [`CapabilityError::SecretTooShort`] if the secret is under
    /// [`MIN_SECRET_LEN`] bytes; callers are expected to degrade the share
    /// feature rather than abort the process.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CapabilityError::SecretTooShort {
                len: secret.len(),
                min: MIN_SECRET_LEN,
            });
        }
        Ok(Self {
            key: secret.to_vec(),
        })
    }

    /// Signs claims into the bearer wire form.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        let payload = serde_json::to_vec(claims)?;
        let tag = self.hmac_sha256(&payload);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    /// Verifies a token's signature and expiry at time `now` (unix seconds).
    ///
    /// Returns the embedded claims on success. Claims are only deserialized
    /// after the signature check passes, so unauthenticated input never
    /// reaches serde's structured parsing.
    pub fn verify(&self, token: &str, now: u64) -> Result<Claims> {
        let (payload_b64, tag_b64) = token
            .split_once('.')
            .ok_or_else(|| CapabilityError::Malformed("missing '.' separator".to_string()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| CapabilityError::Malformed(format!("payload: {e}")))?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|e| CapabilityError::Malformed(format!("tag: {e}")))?;

        let expected = self.hmac_sha256(&payload);
        if !constant_time_eq(&expected, &tag) {
            return Err(CapabilityError::InvalidSignature);
        }

        let claims: Claims = serde_json::from_slice(&payload)?;
        let expires_at = claims.expires_at();
        if now >= expires_at {
            return Err(CapabilityError::Expired { expires_at, now });
        }
        Ok(claims)
    }

    /// Standard HMAC-SHA256 via the ipad/opad construction.
    fn hmac_sha256(&self, data: &[u8]) -> [u8; 32] {
        let key = if self.key.len() > BLOCK_SIZE {
            Sha256::digest(&self.key).to_vec()
        } else {
            self.key.clone()
        };

        let mut key_padded = [0u8; BLOCK_SIZE];
        key_padded[..key.len()].copy_from_slice(&key);

        let mut ipad_key = [0u8; BLOCK_SIZE];
        let mut opad_key = [0u8; BLOCK_SIZE];
        for i in 0..BLOCK_SIZE {
            ipad_key[i] = key_padded[i] ^ IPAD;
            opad_key[i] = key_padded[i] ^ OPAD;
        }

        let mut inner = Sha256::new();
        inner.update(ipad_key);
        inner.update(data);
        let inner_hash = inner.finalize();

        let mut outer = Sha256::new();
        outer.update(opad_key);
        outer.update(inner_hash);
        outer.finalize().into()
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
