//! Fire-and-forget activity events.
//!
//! Download and upload completions are reported through a bounded channel
//! to a recorder task. The response path only ever `try_send`s: a full
//! queue drops the event, a dead recorder is logged and ignored. Nothing
//! here may block or fail a response.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Kind of recorded activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A completed (non-range) download response.
    Download,
    /// A completed resumable upload.
    Upload,
}

/// One activity event.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    /// What happened.
    pub kind: ActivityKind,
    /// Resource the activity touched.
    pub resource_id: String,
    /// Display name of the resource.
    pub name: String,
    /// Caller email when known.
    pub caller: Option<String>,
    /// Unix timestamp.
    pub at: u64,
}

impl ActivityEvent {
    /// Builds an event stamped with the current time.
    pub fn now(kind: ActivityKind, resource_id: &str, name: &str, caller: Option<&str>) -> Self {
        Self {
            kind,
            resource_id: resource_id.to_string(),
            name: name.to_string(),
            caller: caller.map(String::from),
            at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// External persistence boundary for activity events.
pub trait ActivityRecorder: Send + Sync {
    /// Persists one event. Failures are the recorder's own problem; this
    /// is past the point where they can affect a response.
    fn record(&self, event: &ActivityEvent);
}

/// Recorder that just logs, the default when no collaborator is wired.
pub struct TracingRecorder;

impl ActivityRecorder for TracingRecorder {
    fn record(&self, event: &ActivityEvent) {
        info!(
            kind = ?event.kind,
            resource_id = %event.resource_id,
            name = %event.name,
            caller = event.caller.as_deref().unwrap_or("-"),
            "Activity"
        );
    }
}

/// Sending half handed to the request path.
#[derive(Clone)]
pub struct ActivityLog {
    tx: mpsc::Sender<ActivityEvent>,
}

impl ActivityLog {
    /// Default queue depth.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Spawns the recorder task and returns the sending handle.
    pub fn spawn(recorder: Arc<dyn ActivityRecorder>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(recorder, Self::DEFAULT_CAPACITY)
    }

    /// Like [`ActivityLog::spawn`] with an explicit queue depth.
    pub fn spawn_with_capacity(
        recorder: Arc<dyn ActivityRecorder>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ActivityEvent>(capacity);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                recorder.record(&event);
            }
            debug!("Activity channel closed, recorder task exiting");
        });
        (Self { tx }, handle)
    }

    /// Queues an event without waiting. A full queue drops it.
    pub fn emit(&self, event: ActivityEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(error = %e, "Dropped activity event");
        }
    }
}
