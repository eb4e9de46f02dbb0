//! Sliding-window rate limiting.
//!
//! Counters live in the shared store as atomic increment-with-expiry keys,
//! one per `(client, route class)` pair. The limiter is a non-critical
//! control: when the counter store is unreachable it fails open, logging a
//! warning, because availability wins over strict quota enforcement here
//! (authorization, by contrast, fails closed).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{LimitConfig, RouteLimit};
use crate::store::KvStore;

/// Route classes with independent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// General API requests.
    Api,
    /// Download streaming.
    Download,
    /// Token issue/revoke.
    Auth,
    /// Administrative operations (uploads included).
    Admin,
}

impl RouteClass {
    /// Stable key fragment for the counter store.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Api => "api",
            RouteClass::Download => "download",
            RouteClass::Auth => "auth",
            RouteClass::Admin => "admin",
        }
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// How long the client should wait before retrying, when denied.
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    const ALLOW: Self = Self {
        allowed: true,
        retry_after: None,
    };
}

/// Per-route-class sliding-window request limiter.
pub struct RateLimiter<K> {
    kv: Arc<K>,
    limits: LimitConfig,
}

impl<K: KvStore> RateLimiter<K> {
    /// Creates a limiter over the shared counter store.
    pub fn new(limits: LimitConfig, kv: Arc<K>) -> Self {
        Self { kv, limits }
    }

    fn route_limit(&self, class: RouteClass) -> RouteLimit {
        match class {
            RouteClass::Api => self.limits.api,
            RouteClass::Download => self.limits.download,
            RouteClass::Auth => self.limits.auth,
            RouteClass::Admin => self.limits.admin,
        }
    }

    /// Counts this request against `(client, class)` and decides.
    pub async fn check(&self, client: &str, class: RouteClass) -> RateDecision {
        let route = self.route_limit(class);
        let key = format!("rl:{}:{client}", class.as_str());

        match self.kv.incr_with_ttl(&key, route.window()).await {
            Ok(counter) if counter.count <= route.limit => {
                debug!(client, class = class.as_str(), count = counter.count, "Rate check passed");
                RateDecision::ALLOW
            }
            Ok(counter) => {
                warn!(
                    client,
                    class = class.as_str(),
                    count = counter.count,
                    limit = route.limit,
                    "Rate limit exceeded"
                );
                RateDecision {
                    allowed: false,
                    retry_after: Some(counter.ttl_remaining),
                }
            }
            Err(e) => {
                // Counter store outage: fail open.
                warn!(client, class = class.as_str(), error = %e, "Rate limiter store unreachable, allowing");
                RateDecision::ALLOW
            }
        }
    }

    /// Records that `client` passed the download check for `resource`, so
    /// later range continuations of the same object can skip the counter.
    pub async fn note_download(&self, client: &str, resource: &str) {
        let key = format!("dl:open:{client}");
        let window = self.limits.download.window();
        if let Err(e) = self.kv.set_add_with_ttl(&key, resource, window).await {
            warn!(client, resource, error = %e, "Could not record open download");
        }
    }

    /// Whether `client` passed the download check for `resource` within
    /// the current window. Store outage reads as "not open"; the caller
    /// falls through to [`RateLimiter::check`], which fails open itself.
    pub async fn download_open(&self, client: &str, resource: &str) -> bool {
        let key = format!("dl:open:{client}");
        match self.kv.set_contains(&key, resource).await {
            Ok(open) => open,
            Err(e) => {
                warn!(client, resource, error = %e, "Open-download lookup failed");
                false
            }
        }
    }
}
