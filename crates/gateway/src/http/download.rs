//! Range-aware download proxy.
//!
//! The request walks a fixed pipeline: rate limit, token verification,
//! id validation, access resolution, then a streamed fetch whose partial-
//! content headers are mirrored back verbatim. Validation happens before
//! any provider call, so malformed requests cost nothing upstream.

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use capability::ResourceId;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::activity::{ActivityEvent, ActivityKind};
use crate::auth::TokenError;
use crate::limit::RouteClass;
use crate::store::{DriveError, KvStore, RemoteStore};
use crate::stream::{content_disposition, is_preview_request, is_range_continuation};

use super::{bearer_token, client_key, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// Remote object id to fetch.
    #[serde(rename = "fileId")]
    pub file_id: String,
    /// Share capability token.
    pub share_token: Option<String>,
    /// Session token, for clients that cannot set headers.
    pub access_token: Option<String>,
}

pub async fn download<R: RemoteStore, K: KvStore>(
    State(state): State<AppState<R, K>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let client = client_key(&headers, &ConnectInfo(peer));

    // Follow-up ranges do not consume quota, but only once this client
    // has passed the check for this object; a cold mid-file range still
    // counts, or the limit could be sidestepped outright.
    let continuation = is_range_continuation(&headers)
        && state.limiter.download_open(&client, &query.file_id).await;
    if !continuation {
        let decision = state.limiter.check(&client, RouteClass::Download).await;
        if !decision.allowed {
            let secs = decision.retry_after.map(|d| d.as_secs().max(1)).unwrap_or(1);
            return Err(ApiError::too_many_requests(secs));
        }
        state.limiter.note_download(&client, &query.file_id).await;
    }

    let resource = ResourceId::parse(&query.file_id)
        .map_err(|e| ApiError::bad_request(format!("invalid file id: {e}")))?;

    // A broken session degrades to anonymous rather than failing the
    // request. The bearer slot also accepts a share capability, for
    // clients that put their one token in the header instead of the
    // query; it unlocks its resource rather than naming a caller.
    let mut session = None;
    let mut unlocked = HashSet::new();
    if let Some(token) = bearer_token(&headers).or(query.access_token.as_deref()) {
        match state.tokens.verify_session(token).await {
            Ok(claims) => session = Some(claims),
            Err(TokenError::WrongKind) => {
                match state.tokens.verify_share(token, false).await {
                    Ok(claims) => {
                        unlocked.insert(claims.resource_id.to_string());
                    }
                    Err(TokenError::LoginRequired) => {
                        return Err(ApiError::unauthorized("login_required"));
                    }
                    Err(e) => {
                        debug!(error = %e, "Bearer share token rejected");
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Session token rejected, treating as anonymous");
            }
        }
    }

    // A valid share capability unlocks its resource and, through the
    // resolver's ancestor short-circuit, everything beneath it.
    if let Some(token) = query.share_token.as_deref() {
        match state.tokens.verify_share(token, session.is_some()).await {
            Ok(claims) => {
                unlocked.insert(claims.resource_id.to_string());
            }
            Err(TokenError::LoginRequired) => {
                return Err(ApiError::unauthorized("login_required"));
            }
            Err(e) => {
                debug!(error = %e, "Share token rejected");
            }
        }
    }

    let is_admin = session.as_ref().is_some_and(|s| s.is_admin);
    let caller = session.as_ref().map(|s| s.email.as_str());

    if !is_admin
        && state
            .resolver
            .is_restricted(resource.as_str(), &unlocked, caller)
            .await
    {
        // Anonymous callers might unlock this by signing in; signed-in
        // callers are missing a capability or password instead.
        return Err(match session {
            None => ApiError::unauthorized("login_required"),
            Some(_) => ApiError::forbidden("password_required"),
        });
    }

    // Even unrestricted objects require some identity: a session or a
    // share capability that actually verified.
    if session.is_none() && unlocked.is_empty() {
        return Err(ApiError::unauthorized("login_required"));
    }

    let meta = state
        .store
        .metadata(resource.as_str())
        .await
        .map_err(upstream_error)?
        .filter(|m| !m.trashed && !m.is_folder() && m.size.is_some())
        .ok_or_else(ApiError::not_found)?;

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    let media = state
        .store
        .fetch_media(resource.as_str(), range)
        .await
        .map_err(upstream_error)?;

    // Only the opening request of a download counts as activity; range
    // continuations would multiply one save into dozens of events.
    if media.status == 200 {
        state.activity.emit(ActivityEvent::now(
            ActivityKind::Download,
            resource.as_str(),
            &meta.name,
            caller,
        ));
    }

    let inline = is_preview_request(&headers);
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(media.status).unwrap_or(StatusCode::OK))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_DISPOSITION, content_disposition(&meta.name, inline));

    if let Some(content_type) = &media.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    if let Some(content_range) = &media.content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    if let Some(length) = media.content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    builder
        .body(Body::from_stream(media.body))
        .map_err(|e| ApiError::internal(format!("response build failed: {e}")))
}

fn upstream_error(e: DriveError) -> ApiError {
    match e {
        DriveError::Status(404) => ApiError::not_found(),
        DriveError::Status(code) => {
            warn!(code, "Upstream rejected download");
            ApiError::upstream(code)
        }
        DriveError::Unauthorized => {
            warn!("Upstream rejected provider credentials");
            ApiError::internal("provider authorization failed")
        }
        other => {
            warn!(error = %other, "Upstream download failed");
            ApiError::internal("provider unreachable")
        }
    }
}
