//! Share/session token service.
//!
//! Wraps the capability codec with the gateway-side concerns the codec
//! deliberately does not know about: wall-clock time, the revocation set,
//! and the login-required policy. Every verification failure here is
//! non-fatal by contract; callers degrade to "treat as unauthenticated"
//! instead of aborting the request pipeline.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use capability::{CapabilityError, Claims, ResourceId, SessionClaims, ShareClaims, TokenCodec};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{KvError, KvStore};

/// Revocation set key in the shared store.
const REVOKED_SET: &str = "tokens:revoked";

/// Errors from token issue/verify/revoke.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No usable signing secret was configured; the share feature is off.
    #[error("share tokens are disabled: no usable signing secret")]
    Disabled,

    /// Signature, expiry, or shape failure from the codec.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// The token's unique id is in the revocation set.
    #[error("token revoked")]
    Revoked,

    /// The capability requires an active signed-in session and none was
    /// presented.
    #[error("token requires an active signed-in session")]
    LoginRequired,

    /// A share token was presented where a session token was expected, or
    /// vice versa.
    #[error("unexpected token kind")]
    WrongKind,

    /// The revocation store could not be reached. Authorization fails
    /// closed, so this rejects the token.
    #[error("revocation check unavailable: {0}")]
    Store(#[from] KvError),
}

/// Issues, verifies, and revokes signed bearer capabilities.
pub struct TokenService<K> {
    codec: Option<TokenCodec>,
    kv: Arc<K>,
    default_ttl: Duration,
}

impl<K: KvStore> TokenService<K> {
    /// Creates the service from the configured signing secret.
    ///
    /// A missing or short secret degrades the feature: the gateway keeps
    /// serving, but `issue` and `verify` return [`TokenError::Disabled`].
    pub fn new(signing_secret: &str, default_ttl: Duration, kv: Arc<K>) -> Self {
        let codec = match TokenCodec::new(signing_secret.as_bytes()) {
            Ok(codec) => Some(codec),
            Err(e) => {
                warn!(error = %e, "Share tokens disabled");
                None
            }
        };
        Self {
            codec,
            kv,
            default_ttl,
        }
    }

    /// Whether share tokens are usable at all.
    pub fn enabled(&self) -> bool {
        self.codec.is_some()
    }

    fn codec(&self) -> Result<&TokenCodec, TokenError> {
        self.codec.as_ref().ok_or(TokenError::Disabled)
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Issues a share capability for one resource.
    pub fn issue_share(
        &self,
        resource_id: ResourceId,
        ttl: Option<Duration>,
        login_required: bool,
    ) -> Result<(String, ShareClaims), TokenError> {
        let codec = self.codec()?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        let claims = ShareClaims::new(resource_id, Self::now(), ttl.as_secs(), login_required);
        let token = codec.sign(&Claims::Share(claims.clone()))?;
        info!(resource = %claims.resource_id, jti = %claims.jti, "Issued share token");
        Ok((token, claims))
    }

    /// Issues a session identity token.
    pub fn issue_session(
        &self,
        email: String,
        is_admin: bool,
        ttl: Duration,
    ) -> Result<(String, SessionClaims), TokenError> {
        let codec = self.codec()?;
        let claims = SessionClaims::new(email, is_admin, Self::now(), ttl.as_secs());
        let token = codec.sign(&Claims::Session(claims.clone()))?;
        Ok((token, claims))
    }

    /// Verifies a share token: signature, expiry, revocation, and the
    /// login-required policy against `has_session`.
    pub async fn verify_share(
        &self,
        token: &str,
        has_session: bool,
    ) -> Result<ShareClaims, TokenError> {
        let claims = match self.codec()?.verify(token, Self::now())? {
            Claims::Share(claims) => claims,
            Claims::Session(_) => return Err(TokenError::WrongKind),
        };

        if self.kv.set_contains(REVOKED_SET, &claims.jti).await? {
            return Err(TokenError::Revoked);
        }

        if claims.login_required && !has_session {
            return Err(TokenError::LoginRequired);
        }

        Ok(claims)
    }

    /// Verifies a session token: signature, expiry, revocation.
    pub async fn verify_session(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let claims = match self.codec()?.verify(token, Self::now())? {
            Claims::Session(claims) => claims,
            Claims::Share(_) => return Err(TokenError::WrongKind),
        };

        if self.kv.set_contains(REVOKED_SET, &claims.jti).await? {
            return Err(TokenError::Revoked);
        }

        Ok(claims)
    }

    /// Revokes by unique id, with a TTL equal to the token's remaining
    /// lifetime so the revocation set never grows unbounded.
    pub async fn revoke(&self, jti: &str, remaining_ttl: Duration) -> Result<(), TokenError> {
        if remaining_ttl.is_zero() {
            // Already expired; nothing to record.
            return Ok(());
        }
        self.kv
            .set_add_with_ttl(REVOKED_SET, jti, remaining_ttl)
            .await?;
        info!(jti, ttl_secs = remaining_ttl.as_secs(), "Revoked token");
        Ok(())
    }

    /// Revokes by unique id alone, without the token in hand. The entry
    /// lives for the default share lifetime, the longest window in which
    /// an id of unknown expiry can still matter.
    pub async fn revoke_jti(&self, jti: &str) -> Result<(), TokenError> {
        self.revoke(jti, self.default_ttl).await
    }

    /// Verifies a presented token and revokes it for its remaining
    /// lifetime. Returns the revoked unique id.
    pub async fn revoke_token(&self, token: &str) -> Result<String, TokenError> {
        let claims = self.codec()?.verify(token, Self::now())?;
        let remaining = claims.expires_at().saturating_sub(Self::now());
        let jti = claims.jti().to_string();
        self.revoke(&jti, Duration::from_secs(remaining)).await?;
        Ok(jti)
    }
}
