//! Remote drive provider client.
//!
//! Everything the gateway knows about the provider's HTTP API lives here:
//! metadata lookups, range-proxied media fetches, and the two-phase
//! resumable upload protocol. The [`RemoteStore`] trait is the seam the
//! resolver, streaming gateway, and upload orchestrator program against, so
//! all of them test against in-process fakes instead of the network.

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::config::DriveConfig;

/// HTTP request timeout for metadata and control calls. Media streaming
/// uses no overall timeout; the connection-level timeout still applies.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(15);

/// Folder MIME type used by the provider.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Errors from the remote drive provider.
#[derive(Debug, Error)]
pub enum DriveError {
    /// Network-level failure (connect, timeout, broken transfer).
    #[error("drive request failed: {0}")]
    Network(String),

    /// The provider rejected our bearer token.
    #[error("drive rejected credentials (401)")]
    Unauthorized,

    /// Non-OK provider status outside the cases above.
    #[error("drive returned status {0}")]
    Status(u16),

    /// The provider's response body did not have the expected shape.
    #[error("unexpected drive response: {0}")]
    Decode(String),

    /// A caller-supplied resumable session URL does not belong to the
    /// configured provider.
    #[error("invalid upload session url: {0}")]
    InvalidSessionUrl(String),
}

impl DriveError {
    /// Whether retrying this failure can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DriveError::Network(_) => true,
            DriveError::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(err: reqwest::Error) -> Self {
        DriveError::Network(err.to_string())
    }
}

/// Metadata for one remote file or folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Provider-assigned resource id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Size in bytes. Folders and some native documents have none. The
    /// provider serializes int64 as a JSON string, so accept both forms.
    #[serde(default, deserialize_with = "de_size")]
    pub size: Option<u64>,
    /// MIME type.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Parent folder ids (at most one in practice).
    #[serde(default)]
    pub parents: Vec<String>,
    /// Whether the resource is in the trash.
    #[serde(default)]
    pub trashed: bool,
}

impl FileMetadata {
    /// First parent id, if any.
    pub fn parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }

    /// Whether this resource is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

fn de_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid size: {s:?}"))),
    }
}

/// A proxied media response: upstream status, the range headers worth
/// mirroring, and the body as a byte stream.
pub struct MediaResponse {
    /// Upstream status code (200 or 206 on success paths).
    pub status: u16,
    /// Upstream `Content-Range`, present on partial responses.
    pub content_range: Option<String>,
    /// Upstream `Content-Length`.
    pub content_length: Option<u64>,
    /// Upstream `Content-Type`.
    pub content_type: Option<String>,
    /// Body bytes, streamed. Dropping the stream aborts the upstream
    /// transfer, which is how client cancellation propagates.
    pub body: BoxStream<'static, Result<Bytes, DriveError>>,
}

/// Outcome of one resumable-upload chunk submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// The provider acknowledged bytes up to (not including) `next_offset`
    /// and expects more.
    Partial {
        /// Byte offset the next chunk must start at.
        next_offset: u64,
    },
    /// The upload finished; the provider returned the created object.
    Completed(FileMetadata),
}

/// Parameters for opening a resumable upload session.
#[derive(Debug, Clone)]
pub struct UploadInit {
    /// File name to create.
    pub name: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// Destination parent folder id.
    pub parent_id: String,
    /// Declared total size in bytes.
    pub size: u64,
}

/// Operations the gateway needs from the remote store.
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetches metadata for a resource. `Ok(None)` means the resource does
    /// not exist (or is not visible to our credentials).
    fn metadata(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<FileMetadata>, DriveError>> + Send;

    /// Fetches media content, forwarding an inbound `Range` header verbatim
    /// when present.
    fn fetch_media(
        &self,
        id: &str,
        range: Option<&str>,
    ) -> impl std::future::Future<Output = Result<MediaResponse, DriveError>> + Send;

    /// Opens a resumable upload session, returning the provider's session
    /// URL.
    fn start_resumable(
        &self,
        init: &UploadInit,
    ) -> impl std::future::Future<Output = Result<String, DriveError>> + Send;

    /// Submits one chunk to an open session.
    fn upload_chunk(
        &self,
        session_url: &str,
        content_range: &str,
        body: Bytes,
    ) -> impl std::future::Future<Output = Result<ChunkOutcome, DriveError>> + Send;

    /// Looks up a child folder by name under a parent.
    fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<FileMetadata>, DriveError>> + Send;

    /// Creates a child folder under a parent.
    fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<FileMetadata, DriveError>> + Send;

    /// Asks the external token collaborator for fresh credentials. Called
    /// at most once per upload session on a mid-session 401.
    fn refresh_auth(&self) -> impl std::future::Future<Output = Result<(), DriveError>> + Send;
}

/// reqwest-backed [`RemoteStore`] implementation.
pub struct DriveClient {
    http: reqwest::Client,
    api_base: Url,
    upload_base: Url,
    /// Current bearer token. Replaced wholesale by `refresh_auth`.
    token: RwLock<String>,
}

impl DriveClient {
    /// Builds a client from the drive section of the configuration.
    pub fn new(config: &DriveConfig) -> Result<Self, DriveError> {
        let api_base = Url::parse(&config.api_base_url)
            .map_err(|e| DriveError::Decode(format!("api_base_url: {e}")))?;
        let upload_base = Url::parse(&config.upload_base_url)
            .map_err(|e| DriveError::Decode(format!("upload_base_url: {e}")))?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_base,
            upload_base,
            token: RwLock::new(config.access_token.clone()),
        })
    }

    async fn bearer(&self) -> String {
        format!("Bearer {}", self.token.read().await)
    }

    fn api_url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Maps a non-success control response to an error.
    fn status_error(status: reqwest::StatusCode) -> DriveError {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            DriveError::Unauthorized
        } else {
            DriveError::Status(status.as_u16())
        }
    }
}

impl RemoteStore for DriveClient {
    async fn metadata(&self, id: &str) -> Result<Option<FileMetadata>, DriveError> {
        let mut url = self.api_url(&["files", id]);
        url.query_pairs_mut()
            .append_pair("fields", "id,name,size,mimeType,parents,trashed");

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.bearer().await)
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let meta = response
                    .json::<FileMetadata>()
                    .await
                    .map_err(|e| DriveError::Decode(e.to_string()))?;
                Ok(Some(meta))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => Err(Self::status_error(status)),
        }
    }

    async fn fetch_media(
        &self,
        id: &str,
        range: Option<&str>,
    ) -> Result<MediaResponse, DriveError> {
        let mut url = self.api_url(&["files", id]);
        url.query_pairs_mut().append_pair("alt", "media");

        let mut request = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.bearer().await);
        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DriveError::Unauthorized);
        }
        if !status.is_success() {
            return Err(DriveError::Status(status.as_u16()));
        }

        let headers = response.headers();
        let content_range = headers
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let content_length = response.content_length();

        let body = response
            .bytes_stream()
            .map_err(DriveError::from)
            .boxed();

        Ok(MediaResponse {
            status: status.as_u16(),
            content_range,
            content_length,
            content_type,
            body,
        })
    }

    async fn start_resumable(&self, init: &UploadInit) -> Result<String, DriveError> {
        let mut url = self.upload_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("files");
        }
        url.query_pairs_mut().append_pair("uploadType", "resumable");

        let body = serde_json::json!({
            "name": init.name,
            "mimeType": init.mime_type,
            "parents": [init.parent_id],
        });

        let response = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, self.bearer().await)
            .header("X-Upload-Content-Type", &init.mime_type)
            .header("X-Upload-Content-Length", init.size)
            .timeout(CONTROL_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status));
        }

        let session_url = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DriveError::Decode("missing Location header".to_string()))?
            .to_string();

        debug!(name = %init.name, parent = %init.parent_id, "Opened resumable upload session");
        Ok(session_url)
    }

    async fn upload_chunk(
        &self,
        session_url: &str,
        content_range: &str,
        body: Bytes,
    ) -> Result<ChunkOutcome, DriveError> {
        // The session URL arrives from the caller; only forward it if it
        // points at the configured upload host.
        let url = Url::parse(session_url)
            .map_err(|_| DriveError::InvalidSessionUrl(session_url.to_string()))?;
        if url.scheme() != self.upload_base.scheme() || url.host() != self.upload_base.host() {
            return Err(DriveError::InvalidSessionUrl(session_url.to_string()));
        }

        let response = self
            .http
            .put(url)
            .header(header::AUTHORIZATION, self.bearer().await)
            .header(header::CONTENT_RANGE, content_range)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        match status.as_u16() {
            // 308 Resume Incomplete: the Range header tells us how far the
            // provider got. No Range header means nothing persisted yet.
            308 => {
                let next_offset = response
                    .headers()
                    .get(header::RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_acknowledged_end)
                    .map(|end| end + 1)
                    .unwrap_or(0);
                Ok(ChunkOutcome::Partial { next_offset })
            }
            200 | 201 => {
                let meta = response
                    .json::<FileMetadata>()
                    .await
                    .map_err(|e| DriveError::Decode(e.to_string()))?;
                info!(id = %meta.id, name = %meta.name, "Resumable upload completed");
                Ok(ChunkOutcome::Completed(meta))
            }
            401 => Err(DriveError::Unauthorized),
            code => Err(DriveError::Status(code)),
        }
    }

    async fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<FileMetadata>, DriveError> {
        #[derive(Deserialize)]
        struct FileList {
            #[serde(default)]
            files: Vec<FileMetadata>,
        }

        let query = format!(
            "name = '{}' and '{}' in parents and mimeType = '{}' and trashed = false",
            escape_query_value(name),
            parent_id,
            FOLDER_MIME_TYPE,
        );

        let mut url = self.api_url(&["files"]);
        url.query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("fields", "files(id,name,size,mimeType,parents,trashed)")
            .append_pair("pageSize", "1");

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.bearer().await)
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status));
        }

        let list = response
            .json::<FileList>()
            .await
            .map_err(|e| DriveError::Decode(e.to_string()))?;
        Ok(list.files.into_iter().next())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<FileMetadata, DriveError> {
        let url = self.api_url(&["files"]);
        let body = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });

        let response = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, self.bearer().await)
            .timeout(CONTROL_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status));
        }

        response
            .json::<FileMetadata>()
            .await
            .map_err(|e| DriveError::Decode(e.to_string()))
    }

    async fn refresh_auth(&self) -> Result<(), DriveError> {
        // Token refresh is an external collaborator's job; it publishes the
        // fresh token through the environment. Absent that, keep what we
        // have and let the retry surface the 401.
        match std::env::var("DRIVEGATE_ACCESS_TOKEN") {
            Ok(fresh) if !fresh.is_empty() => {
                let mut token = self.token.write().await;
                if *token != fresh {
                    info!("Refreshed drive access token from environment");
                    *token = fresh;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Parses the end byte out of a provider `Range: bytes=0-12345` header.
fn parse_acknowledged_end(range: &str) -> Option<u64> {
    range
        .strip_prefix("bytes=")?
        .split_once('-')?
        .1
        .parse::<u64>()
        .ok()
}

/// Escapes a value for embedding in a provider search query.
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
