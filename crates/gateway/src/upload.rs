//! Resumable upload orchestration.
//!
//! A logical upload moves through `Uninitialized -> SessionOpen ->
//! {Uploading -> SessionOpen}* -> Completed`, with `Aborted` reachable from
//! any state on an unrecoverable error. The provider's session URL is the
//! whole session state: the orchestrator holds nothing durable between
//! calls, so a client retrying after a network failure just resubmits its
//! chunk against the same URL. Chunks must arrive in strictly increasing
//! offset order; the orchestrator never reorders, it forwards and lets the
//! provider reject.
//!
//! Retry policy: transient failures (network, 5xx) on init or chunk are
//! retried with linear backoff up to a fixed budget. A 401 mid-session
//! triggers exactly one re-authentication-and-retry cycle. Any other 4xx
//! aborts the session and surfaces to the caller.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::activity::{ActivityEvent, ActivityKind, ActivityLog};
use crate::config::UploadConfig;
use crate::store::{ChunkOutcome, DriveError, KvStore, RemoteStore, UploadInit};

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Malformed init parameters or content range.
    #[error("invalid upload request: {0}")]
    Invalid(String),

    /// A permanent provider error aborted the session.
    #[error("upload session aborted: {0}")]
    Aborted(DriveError),

    /// Transient failures persisted past the retry budget.
    #[error("upload failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Final transient error.
        source: DriveError,
    },
}

/// A parsed `Content-Range: bytes <start>-<end>/<total>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte offset of this chunk.
    pub start: u64,
    /// Last byte offset of this chunk, inclusive.
    pub end: u64,
    /// Declared total object size.
    pub total: u64,
}

impl ContentRange {
    /// Parses the header value, rejecting inverted or overflowing ranges.
    pub fn parse(header: &str) -> Result<Self, UploadError> {
        let bad = || UploadError::Invalid(format!("content range {header:?}"));

        let rest = header.strip_prefix("bytes ").ok_or_else(bad)?;
        let (range, total) = rest.split_once('/').ok_or_else(bad)?;
        let (start, end) = range.split_once('-').ok_or_else(bad)?;

        let parsed = Self {
            start: start.parse().map_err(|_| bad())?,
            end: end.parse().map_err(|_| bad())?,
            total: total.parse().map_err(|_| bad())?,
        };
        if parsed.start > parsed.end || parsed.end >= parsed.total {
            return Err(bad());
        }
        Ok(parsed)
    }

    /// Number of bytes this range covers.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Renders back to the provider header form.
    pub fn header(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Drives resumable upload sessions against the remote store.
pub struct UploadOrchestrator<R, K> {
    store: Arc<R>,
    kv: Arc<K>,
    settings: UploadConfig,
    /// Bounds concurrently in-flight provider calls for one batch, so a
    /// multi-file upload cannot trip the provider's own rate limits.
    permits: Arc<Semaphore>,
    activity: ActivityLog,
}

impl<R: RemoteStore, K: KvStore> UploadOrchestrator<R, K> {
    /// Creates an orchestrator with the configured concurrency bound.
    pub fn new(settings: UploadConfig, store: Arc<R>, kv: Arc<K>, activity: ActivityLog) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            store,
            kv,
            settings,
            permits,
            activity,
        }
    }

    /// Opens a resumable session, returning the provider's session URL.
    pub async fn init(&self, init: UploadInit) -> Result<String, UploadError> {
        if init.name.is_empty() {
            return Err(UploadError::Invalid("empty file name".to_string()));
        }
        if init.size == 0 {
            return Err(UploadError::Invalid("declared size must be > 0".to_string()));
        }

        let _permit = self.permits.acquire().await.expect("semaphore never closed");
        self.with_retries(|| self.store.start_resumable(&init)).await
    }

    /// Submits one chunk. `Partial` means keep sending; `Completed` carries
    /// the created object and has already fired the side effects (parent
    /// listing invalidation, activity event).
    pub async fn chunk(
        &self,
        session_url: &str,
        range: ContentRange,
        body: Bytes,
        caller: Option<&str>,
    ) -> Result<ChunkOutcome, UploadError> {
        if body.len() as u64 != range.len() {
            return Err(UploadError::Invalid(format!(
                "body is {} bytes but range covers {}",
                body.len(),
                range.len()
            )));
        }

        let _permit = self.permits.acquire().await.expect("semaphore never closed");
        let header = range.header();
        let outcome = self
            .with_retries(|| self.store.upload_chunk(session_url, &header, body.clone()))
            .await?;

        match &outcome {
            ChunkOutcome::Partial { next_offset } => {
                debug!(session_url, next_offset, "Chunk acknowledged");
            }
            ChunkOutcome::Completed(meta) => {
                if let Some(parent) = meta.parent() {
                    self.invalidate_listing(parent).await;
                }
                self.activity.emit(ActivityEvent::now(
                    ActivityKind::Upload,
                    &meta.id,
                    &meta.name,
                    caller,
                ));
            }
        }
        Ok(outcome)
    }

    /// Resolves (creating as needed) a `/`-separated folder path under
    /// `base_parent`, returning the final folder id. Intermediate lookups
    /// are memoized in the shared store so one multi-file batch creates
    /// each folder once.
    pub async fn ensure_folder_path(
        &self,
        base_parent: &str,
        path: &str,
    ) -> Result<String, UploadError> {
        let mut current = base_parent.to_string();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let cache_key = format!("path:{current}:{segment}");

            // Cache is availability-oriented: errors just mean a lookup.
            if let Ok(Some(value)) = self.kv.get_json(&cache_key).await {
                if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                    current = id.to_string();
                    continue;
                }
            }

            let folder = match self
                .with_retries(|| self.store.find_child_folder(&current, segment))
                .await?
            {
                Some(existing) => existing,
                None => {
                    info!(parent = %current, name = segment, "Creating folder");
                    self.with_retries(|| self.store.create_folder(&current, segment))
                        .await?
                }
            };

            let ttl = std::time::Duration::from_secs(self.settings.path_cache_ttl_secs);
            if let Err(e) = self
                .kv
                .put_json(&cache_key, serde_json::json!({ "id": folder.id }), ttl)
                .await
            {
                debug!(error = %e, "Folder path cache write failed");
            }
            current = folder.id;
        }

        Ok(current)
    }

    async fn invalidate_listing(&self, parent_id: &str) {
        let key = format!("listing:{parent_id}");
        if let Err(e) = self.kv.del(&key).await {
            // Best effort; a stale listing is not worth failing the upload.
            warn!(parent_id, error = %e, "Listing cache invalidation failed");
        }
    }

    /// Runs `op` under the retry policy: linear backoff for transients up
    /// to the budget, exactly one re-auth cycle on 401, abort on other
    /// permanent errors.
    async fn with_retries<T, F, Fut>(&self, op: F) -> Result<T, UploadError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, DriveError>>,
    {
        let mut attempt = 0u32;
        let mut reauthed = false;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(DriveError::Unauthorized) if !reauthed => {
                    reauthed = true;
                    warn!("Provider rejected credentials mid-session, refreshing once");
                    if let Err(e) = self.store.refresh_auth().await {
                        return Err(UploadError::Aborted(e));
                    }
                }
                Err(e) if e.is_transient() && attempt < self.settings.retry_budget => {
                    attempt += 1;
                    debug!(attempt, error = %e, "Transient upload failure, backing off");
                    tokio::time::sleep(
                        std::time::Duration::from_millis(self.settings.backoff_ms) * attempt,
                    )
                    .await;
                }
                Err(e) if e.is_transient() => {
                    return Err(UploadError::RetriesExhausted {
                        attempts: attempt + 1,
                        source: e,
                    });
                }
                Err(e) => return Err(UploadError::Aborted(e)),
            }
        }
    }
}
