//! HTTP surface: routing, shared state, and request handlers.

pub mod download;
pub mod error;
pub mod share;
pub mod upload;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap};
use axum::routing::{delete, get, post};
use axum::Router;

use crate::auth::{AccessResolver, KvAccessRecords, TokenService};
use crate::limit::RateLimiter;
use crate::store::{KvStore, RemoteStore};
use crate::upload::UploadOrchestrator;

pub use error::ApiError;

/// Shared per-request state.
///
/// Everything inside is an `Arc`, so cloning per request is pointer-sized.
pub struct AppState<R, K> {
    pub store: Arc<R>,
    pub tokens: Arc<TokenService<K>>,
    pub resolver: Arc<AccessResolver<R, KvAccessRecords<K>>>,
    pub limiter: Arc<RateLimiter<K>>,
    pub uploads: Arc<UploadOrchestrator<R, K>>,
    pub activity: crate::activity::ActivityLog,
    /// Root container id; uploads without an explicit parent land here.
    pub root_id: Arc<str>,
}

// Derived Clone would bound R and K themselves.
impl<R, K> Clone for AppState<R, K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tokens: self.tokens.clone(),
            resolver: self.resolver.clone(),
            limiter: self.limiter.clone(),
            uploads: self.uploads.clone(),
            activity: self.activity.clone(),
            root_id: self.root_id.clone(),
        }
    }
}

/// Builds the application router over the shared state.
pub fn router<R: RemoteStore, K: KvStore>(state: AppState<R, K>) -> Router {
    Router::new()
        .route("/download", get(download::download::<R, K>))
        .route("/upload", post(upload::upload::<R, K>))
        .route("/api/share", post(share::issue::<R, K>))
        .route("/api/share/:jti", delete(share::revoke::<R, K>))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Client identity for rate limiting: the first `X-Forwarded-For` hop when
/// a proxy supplied one, otherwise the peer address.
pub(crate) fn client_key(headers: &HeaderMap, peer: &ConnectInfo<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| peer.0.ip().to_string())
}

/// Extracts a bearer token from the `Authorization` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
