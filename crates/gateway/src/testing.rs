//! In-process test doubles shared across unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use uuid::Uuid;

use crate::store::{
    ChunkOutcome, DriveError, FileMetadata, MediaResponse, RemoteStore, UploadInit,
    FOLDER_MIME_TYPE,
};

/// State of one fake resumable session.
struct MockSession {
    name: String,
    parent_id: String,
    mime_type: String,
    total: u64,
    received: Vec<u8>,
}

/// Scriptable in-memory [`RemoteStore`].
///
/// Counts calls so tests can assert "no upstream call was made", and
/// injects failures for retry-path coverage.
#[derive(Default)]
pub(crate) struct MockStore {
    files: DashMap<String, FileMetadata>,
    content: DashMap<String, Bytes>,
    sessions: DashMap<String, Mutex<MockSession>>,

    metadata_calls: AtomicUsize,
    media_calls: AtomicUsize,
    refresh_calls: AtomicUsize,

    fail_metadata: AtomicU32,
    fail_init: AtomicU32,
    fail_chunks: AtomicU32,
    unauthorized_once: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&self, id: &str, parent: &str) {
        self.files.insert(
            id.to_string(),
            FileMetadata {
                id: id.to_string(),
                name: id.to_string(),
                size: None,
                mime_type: Some(FOLDER_MIME_TYPE.to_string()),
                parents: vec![parent.to_string()],
                trashed: false,
            },
        );
    }

    pub fn add_file(&self, id: &str, parent: &str, name: &str, body: &[u8], mime: &str) {
        self.files.insert(
            id.to_string(),
            FileMetadata {
                id: id.to_string(),
                name: name.to_string(),
                size: Some(body.len() as u64),
                mime_type: Some(mime.to_string()),
                parents: vec![parent.to_string()],
                trashed: false,
            },
        );
        self.content
            .insert(id.to_string(), Bytes::copy_from_slice(body));
    }

    /// Fail the next `n` metadata calls with a 503.
    pub fn fail_metadata(&self, n: u32) {
        self.fail_metadata.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` session-init calls with a 503.
    pub fn fail_init(&self, n: u32) {
        self.fail_init.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` chunk submissions with a 503.
    pub fn fail_chunks(&self, n: u32) {
        self.fail_chunks.store(n, Ordering::SeqCst);
    }

    /// Reject the next chunk submission with a 401, once.
    pub fn reject_next_chunk_unauthorized(&self) {
        self.unauthorized_once.store(true, Ordering::SeqCst);
    }

    pub fn metadata_call_count(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn media_call_count(&self) -> usize {
        self.media_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_call_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Total upstream calls of any kind, for "nothing was called" checks.
    pub fn upstream_call_count(&self) -> usize {
        self.metadata_call_count() + self.media_call_count()
    }

    /// Number of folders currently known to the store.
    pub fn folder_count(&self) -> usize {
        self.files.iter().filter(|entry| entry.is_folder()).count()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RemoteStore for MockStore {
    async fn metadata(&self, id: &str) -> Result<Option<FileMetadata>, DriveError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_metadata) {
            return Err(DriveError::Status(503));
        }
        Ok(self.files.get(id).map(|m| m.value().clone()))
    }

    async fn fetch_media(
        &self,
        id: &str,
        range: Option<&str>,
    ) -> Result<MediaResponse, DriveError> {
        self.media_calls.fetch_add(1, Ordering::SeqCst);

        let Some(body) = self.content.get(id).map(|b| b.value().clone()) else {
            return Err(DriveError::Status(404));
        };
        let meta = self.files.get(id).expect("content without metadata");
        let total = body.len() as u64;
        let content_type = meta.mime_type.clone();

        let (status, content_range, slice) = match range.and_then(parse_byte_range) {
            Some((start, end)) => {
                let end = end.unwrap_or(total.saturating_sub(1)).min(total.saturating_sub(1));
                if start > end || start >= total {
                    return Err(DriveError::Status(416));
                }
                (
                    206,
                    Some(format!("bytes {start}-{end}/{total}")),
                    body.slice(start as usize..=end as usize),
                )
            }
            None => (200, None, body),
        };

        Ok(MediaResponse {
            status,
            content_range,
            content_length: Some(slice.len() as u64),
            content_type,
            body: stream::once(async move { Ok(slice) }).boxed(),
        })
    }

    async fn start_resumable(&self, init: &UploadInit) -> Result<String, DriveError> {
        if Self::take_failure(&self.fail_init) {
            return Err(DriveError::Status(503));
        }
        let url = format!("https://upload.mock/session/{}", Uuid::new_v4());
        self.sessions.insert(
            url.clone(),
            Mutex::new(MockSession {
                name: init.name.clone(),
                parent_id: init.parent_id.clone(),
                mime_type: init.mime_type.clone(),
                total: init.size,
                received: Vec::new(),
            }),
        );
        Ok(url)
    }

    async fn upload_chunk(
        &self,
        session_url: &str,
        content_range: &str,
        body: Bytes,
    ) -> Result<ChunkOutcome, DriveError> {
        if self.unauthorized_once.swap(false, Ordering::SeqCst) {
            return Err(DriveError::Unauthorized);
        }
        if Self::take_failure(&self.fail_chunks) {
            return Err(DriveError::Status(503));
        }

        let session = self
            .sessions
            .get(session_url)
            .ok_or(DriveError::Status(404))?;
        let mut session = session.lock().unwrap();

        let (start, end, total) =
            parse_content_range(content_range).ok_or(DriveError::Status(400))?;
        if total != session.total || start != session.received.len() as u64 {
            // The provider rejects out-of-order or mismatched ranges.
            return Err(DriveError::Status(416));
        }
        if body.len() as u64 != end - start + 1 {
            return Err(DriveError::Status(400));
        }

        session.received.extend_from_slice(&body);

        if session.received.len() as u64 == session.total {
            let meta = FileMetadata {
                id: format!("uploaded-{}", Uuid::new_v4()),
                name: session.name.clone(),
                size: Some(session.total),
                mime_type: Some(session.mime_type.clone()),
                parents: vec![session.parent_id.clone()],
                trashed: false,
            };
            self.files.insert(meta.id.clone(), meta.clone());
            Ok(ChunkOutcome::Completed(meta))
        } else {
            Ok(ChunkOutcome::Partial {
                next_offset: session.received.len() as u64,
            })
        }
    }

    async fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<FileMetadata>, DriveError> {
        Ok(self
            .files
            .iter()
            .find(|entry| {
                entry.is_folder()
                    && entry.name == name
                    && entry.parent() == Some(parent_id)
                    && !entry.trashed
            })
            .map(|entry| entry.value().clone()))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<FileMetadata, DriveError> {
        let meta = FileMetadata {
            id: format!("folder-{}", Uuid::new_v4()),
            name: name.to_string(),
            size: None,
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: vec![parent_id.to_string()],
            trashed: false,
        };
        self.files.insert(meta.id.clone(), meta.clone());
        Ok(meta)
    }

    async fn refresh_auth(&self) -> Result<(), DriveError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Parses an inbound `bytes=start-end` range (end optional).
fn parse_byte_range(header: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    let start = start.parse::<u64>().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().ok()?)
    };
    Some((start, end))
}

/// Parses an upload `bytes start-end/total` content range.
fn parse_content_range(header: &str) -> Option<(u64, u64, u64)> {
    let rest = header.strip_prefix("bytes ")?;
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    Some((
        start.parse().ok()?,
        end.parse().ok()?,
        total.parse().ok()?,
    ))
}
