//! Upload endpoints: session init and chunk submission.
//!
//! Both operations are admin-only. The session URL returned by `init` is
//! the provider's own resumable URL; the client presents it back with each
//! chunk, so the gateway stays stateless across chunk requests.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use capability::SessionClaims;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::limit::RouteClass;
use crate::store::{ChunkOutcome, DriveError, FileMetadata, KvStore, RemoteStore, UploadInit};
use crate::upload::{ContentRange, UploadError};

use super::{bearer_token, client_key, ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub name: String,
    pub mime_type: String,
    /// Explicit parent id; defaults to the configured root.
    pub parent_id: Option<String>,
    /// Optional `/`-separated folder path created beneath the parent.
    pub path: Option<String>,
    pub size: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    upload_url: String,
    parent_id: String,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ChunkResponse {
    Partial {
        #[serde(rename = "nextOffset")]
        next_offset: u64,
    },
    Completed {
        file: FileMetadata,
    },
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Operation selector: `init` or `chunk`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Provider session URL from the init response, required for `chunk`.
    #[serde(rename = "uploadUrl")]
    pub upload_url: Option<String>,
}

pub async fn upload<R: RemoteStore, K: KvStore>(
    State(state): State<AppState<R, K>>,
    connect: ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let claims = require_admin(&state, &headers).await?;

    let client = client_key(&headers, &connect);
    let decision = state.limiter.check(&client, RouteClass::Admin).await;
    if !decision.allowed {
        let secs = decision.retry_after.map(|d| d.as_secs().max(1)).unwrap_or(1);
        return Err(ApiError::too_many_requests(secs));
    }

    match query.kind.as_str() {
        "init" => init(&state, &claims, body).await,
        "chunk" => {
            let session = query
                .upload_url
                .as_deref()
                .ok_or_else(|| ApiError::bad_request("chunk requires uploadUrl"))?;
            chunk(&state, &claims, session, &headers, body).await
        }
        other => Err(ApiError::bad_request(format!(
            "unknown upload type {other:?}"
        ))),
    }
}

async fn init<R: RemoteStore, K: KvStore>(
    state: &AppState<R, K>,
    claims: &SessionClaims,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: InitRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid init body: {e}")))?;

    let base_parent = request
        .parent_id
        .clone()
        .unwrap_or_else(|| state.root_id.to_string());

    let parent_id = match request.path.as_deref() {
        Some(path) if !path.is_empty() => state
            .uploads
            .ensure_folder_path(&base_parent, path)
            .await
            .map_err(upload_error)?,
        _ => base_parent,
    };

    let upload_url = state
        .uploads
        .init(UploadInit {
            name: request.name.clone(),
            mime_type: request.mime_type,
            parent_id: parent_id.clone(),
            size: request.size,
        })
        .await
        .map_err(upload_error)?;

    info!(name = %request.name, parent = %parent_id, size = request.size,
          admin = %claims.email, "Opened upload session");

    Ok(Json(InitResponse {
        upload_url,
        parent_id,
    })
    .into_response())
}

async fn chunk<R: RemoteStore, K: KvStore>(
    state: &AppState<R, K>,
    claims: &SessionClaims,
    session_url: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let range = headers
        .get(axum::http::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing Content-Range header"))?;
    let range = ContentRange::parse(range).map_err(upload_error)?;

    let outcome = state
        .uploads
        .chunk(session_url, range, body, Some(&claims.email))
        .await
        .map_err(upload_error)?;

    let response = match outcome {
        ChunkOutcome::Partial { next_offset } => {
            Json(ChunkResponse::Partial { next_offset }).into_response()
        }
        ChunkOutcome::Completed(file) => (
            StatusCode::CREATED,
            Json(ChunkResponse::Completed { file }),
        )
            .into_response(),
    };
    Ok(response)
}

/// Verifies the bearer session and requires the admin flag.
pub(super) async fn require_admin<R: RemoteStore, K: KvStore>(
    state: &AppState<R, K>,
    headers: &HeaderMap,
) -> Result<SessionClaims, ApiError> {
    let token =
        bearer_token(headers).ok_or_else(|| ApiError::unauthorized("login_required"))?;
    let claims = state.tokens.verify_session(token).await?;
    if !claims.is_admin {
        return Err(ApiError::forbidden("admin_required"));
    }
    Ok(claims)
}

fn upload_error(e: UploadError) -> ApiError {
    match e {
        UploadError::Invalid(msg) => ApiError::bad_request(msg),
        UploadError::Aborted(DriveError::Status(code)) => ApiError::upstream(code),
        UploadError::Aborted(other) => ApiError::internal(format!("upload aborted: {other}")),
        UploadError::RetriesExhausted { attempts, source } => {
            ApiError::internal(format!("upload failed after {attempts} attempts: {source}"))
        }
    }
}
