//! Share-link administration: issue and revoke capabilities.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use capability::{ResourceId, ShareClaims};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::limit::RouteClass;
use crate::store::{KvStore, RemoteStore};

use super::upload::require_admin;
use super::{client_key, ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub file_id: String,
    /// Override of the configured default lifetime.
    pub ttl_secs: Option<u64>,
    /// Whether redeeming the link additionally requires a signed-in
    /// session.
    #[serde(default)]
    pub login_required: bool,
}

#[derive(Serialize)]
pub struct IssueResponse {
    pub token: String,
    pub capability: ShareClaims,
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub revoked: String,
}

pub async fn issue<R: RemoteStore, K: KvStore>(
    State(state): State<AppState<R, K>>,
    connect: ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<IssueRequest>,
) -> Result<Json<IssueResponse>, ApiError> {
    require_admin(&state, &headers).await?;
    check_rate(&state, &headers, &connect).await?;

    let resource = ResourceId::parse(&request.file_id)
        .map_err(|e| ApiError::bad_request(format!("invalid file id: {e}")))?;
    let ttl = request.ttl_secs.map(Duration::from_secs);

    let (token, capability) = state
        .tokens
        .issue_share(resource, ttl, request.login_required)?;

    Ok(Json(IssueResponse { token, capability }))
}

pub async fn revoke<R: RemoteStore, K: KvStore>(
    State(state): State<AppState<R, K>>,
    connect: ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(jti): Path<String>,
) -> Result<Json<RevokeResponse>, ApiError> {
    require_admin(&state, &headers).await?;
    check_rate(&state, &headers, &connect).await?;

    state.tokens.revoke_jti(&jti).await?;
    Ok(Json(RevokeResponse { revoked: jti }))
}

async fn check_rate<R: RemoteStore, K: KvStore>(
    state: &AppState<R, K>,
    headers: &HeaderMap,
    connect: &ConnectInfo<SocketAddr>,
) -> Result<(), ApiError> {
    let client = client_key(headers, connect);
    let decision = state.limiter.check(&client, RouteClass::Auth).await;
    if !decision.allowed {
        let secs = decision.retry_after.map(|d| d.as_secs().max(1)).unwrap_or(1);
        return Err(ApiError::too_many_requests(secs));
    }
    Ok(())
}
