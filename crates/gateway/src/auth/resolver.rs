//! Access restriction resolution.
//!
//! Decides whether a resource is restricted for a caller by walking its
//! ancestor chain in the remote store: static private ids, password- and
//! allowlist-protected records, and pre-authorized ancestor unlocks all
//! feed the decision. The walk is an explicit bounded loop, never
//! recursion, so cyclic or pathological ancestry cannot run away.
//!
//! The resolver is pure policy: it never checks admin status (the caller
//! short-circuits admins before invoking it) and has no side effects beyond
//! reads. Authorization fails closed: when the metadata or record store
//! cannot be reached after retries, the answer is "restricted".

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AccessConfig;
use crate::store::{DriveError, FileMetadata, KvError, KvStore, RemoteStore};

/// How a protected resource restricts access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionKind {
    /// Unlocked by presenting the folder password (which yields an
    /// ancestor-unlock capability; the password exchange itself is the
    /// share-issuing collaborator's job).
    Password,
    /// Visible only to the listed caller emails.
    PrivateAllowlist,
}

/// Per-resource protection record, written by the administrative
/// collaborator and read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    /// The protected resource id.
    pub resource_id: String,
    /// Protection kind.
    pub kind: ProtectionKind,
    /// Allowed caller emails (allowlist kind only).
    #[serde(default)]
    pub allowed: Vec<String>,
}

impl AccessRecord {
    /// Whether `caller` satisfies this record without an ancestor unlock.
    fn permits(&self, caller: Option<&str>) -> bool {
        match self.kind {
            ProtectionKind::Password => false,
            ProtectionKind::PrivateAllowlist => caller.is_some_and(|email| {
                self.allowed
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(email))
            }),
        }
    }
}

/// Read access to protection records.
pub trait AccessRecordStore: Send + Sync + 'static {
    /// Looks up the record protecting `resource_id`, if any.
    fn lookup(
        &self,
        resource_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<AccessRecord>, KvError>> + Send;
}

/// Protection records stored as JSON blobs in the shared KV store, under
/// `protected:<resource_id>`. The administrative collaborator writes them;
/// the gateway only reads, so eventual consistency is acceptable.
pub struct KvAccessRecords<K> {
    kv: Arc<K>,
}

impl<K> KvAccessRecords<K> {
    /// Wraps the shared store.
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    fn key(resource_id: &str) -> String {
        format!("protected:{resource_id}")
    }
}

impl<K: KvStore> AccessRecordStore for KvAccessRecords<K> {
    async fn lookup(&self, resource_id: &str) -> Result<Option<AccessRecord>, KvError> {
        let Some(value) = self.kv.get_json(&Self::key(resource_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<AccessRecord>(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // A malformed record is treated as protection we cannot
                // evaluate, so it restricts.
                warn!(resource_id, error = %e, "Malformed access record");
                Err(KvError::Unavailable(format!("bad access record: {e}")))
            }
        }
    }
}

/// Resolver policy knobs, fixed at construction from the configuration.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// The configured root folder id; always public.
    pub root_id: String,
    /// Statically private resource ids.
    pub private_ids: HashSet<String>,
    /// Caller emails exempt from the static private set.
    pub batch_grants: HashSet<String>,
    /// Hard cap on ancestry-walk depth.
    pub max_depth: usize,
    /// Retry attempts for transient metadata failures.
    pub metadata_retries: u32,
    /// Base backoff between metadata retries.
    pub metadata_backoff: Duration,
}

impl ResolverSettings {
    /// Builds settings from the access section plus the root id.
    pub fn from_config(access: &AccessConfig, root_id: &str) -> Self {
        Self {
            root_id: root_id.to_string(),
            private_ids: access.private_ids.iter().cloned().collect(),
            batch_grants: access
                .batch_grants
                .iter()
                .map(|email| email.to_ascii_lowercase())
                .collect(),
            max_depth: access.max_depth,
            metadata_retries: access.metadata_retries,
            metadata_backoff: Duration::from_millis(access.metadata_backoff_ms),
        }
    }

    fn batch_granted(&self, caller: Option<&str>) -> bool {
        caller.is_some_and(|email| self.batch_grants.contains(&email.to_ascii_lowercase()))
    }
}

/// Walks ancestry in the remote store to answer "is this restricted".
pub struct AccessResolver<R, S> {
    store: Arc<R>,
    records: S,
    settings: ResolverSettings,
}

impl<R: RemoteStore, S: AccessRecordStore> AccessResolver<R, S> {
    /// Creates a resolver over the remote store and record store.
    pub fn new(store: Arc<R>, records: S, settings: ResolverSettings) -> Self {
        Self {
            store,
            records,
            settings,
        }
    }

    /// Whether `resource_id` is restricted for the caller.
    ///
    /// `pre_authorized` carries ancestor ids the caller has already
    /// unlocked; hitting one short-circuits the walk for all descendants.
    /// The answer is a plain bool by design: every failure mode inside is
    /// folded into the fail-closed `true`.
    pub async fn is_restricted(
        &self,
        resource_id: &str,
        pre_authorized: &HashSet<String>,
        caller_email: Option<&str>,
    ) -> bool {
        let mut current = resource_id.to_string();

        for depth in 0..self.settings.max_depth {
            if current == self.settings.root_id {
                // Root is public by construction.
                return false;
            }

            if pre_authorized.contains(&current) {
                debug!(resource_id, ancestor = %current, "Pre-authorized ancestor unlock");
                return false;
            }

            if self.settings.private_ids.contains(&current)
                && !self.settings.batch_granted(caller_email)
            {
                return true;
            }

            match self.records.lookup(&current).await {
                Ok(Some(record)) => {
                    if !record.permits(caller_email) {
                        return true;
                    }
                    // Record satisfied; ancestors above may still restrict.
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(resource_id = %current, error = %e, "Record lookup failed, failing closed");
                    return true;
                }
            }

            match self.metadata_with_retry(&current).await {
                Ok(Some(meta)) => match meta.parent() {
                    None => return false,
                    Some(parent) if parent == self.settings.root_id => return false,
                    Some(parent) => current = parent.to_string(),
                },
                // Deleted/trashed resources resolve as unrestricted at the
                // metadata layer; the download step 404s on content anyway.
                Ok(None) => return false,
                Err(e) => {
                    warn!(resource_id = %current, error = %e, "Ancestry fetch exhausted retries, failing closed");
                    return true;
                }
            }

            if depth + 1 == self.settings.max_depth {
                warn!(resource_id, max_depth = self.settings.max_depth, "Ancestry walk hit depth cap");
            }
        }

        false
    }

    async fn metadata_with_retry(&self, id: &str) -> Result<Option<FileMetadata>, DriveError> {
        let mut attempt = 0u32;
        loop {
            match self.store.metadata(id).await {
                Ok(meta) => return Ok(meta),
                Err(e) if e.is_transient() && attempt < self.settings.metadata_retries => {
                    attempt += 1;
                    debug!(id, attempt, error = %e, "Transient metadata failure, retrying");
                    tokio::time::sleep(self.settings.metadata_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
