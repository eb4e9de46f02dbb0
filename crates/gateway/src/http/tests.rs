//! End-to-end handler tests over a real listener.
//!
//! Each test spawns the full router on an ephemeral port and drives it
//! with a plain HTTP client, so extractors, status codes, and headers are
//! exercised exactly as a client sees them.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use capability::ResourceId;

use crate::activity::{ActivityLog, TracingRecorder};
use crate::auth::{AccessResolver, KvAccessRecords, ResolverSettings, TokenService};
use crate::config::{LimitConfig, UploadConfig};
use crate::limit::RateLimiter;
use crate::store::MemoryKv;
use crate::testing::MockStore;
use crate::upload::UploadOrchestrator;

use super::{router, AppState};

const SECRET: &str = "0123456789abcdef0123456789abcdef";

struct TestServer {
    addr: SocketAddr,
    client: reqwest::Client,
    store: Arc<MockStore>,
    tokens: Arc<TokenService<MemoryKv>>,
}

impl TestServer {
    fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{path_and_query}", self.addr)
    }

    fn admin_token(&self) -> String {
        self.tokens
            .issue_session("admin@example.com".into(), true, Duration::from_secs(3600))
            .unwrap()
            .0
    }

    fn user_token(&self) -> String {
        self.tokens
            .issue_session("user@example.com".into(), false, Duration::from_secs(3600))
            .unwrap()
            .0
    }

    fn share_token(&self, resource: &str) -> String {
        self.tokens
            .issue_share(ResourceId::parse(resource).unwrap(), None, false)
            .unwrap()
            .0
    }
}

/// Spawns the router over a seeded [`MockStore`].
///
/// The store holds a public file under the root and a restricted file
/// inside `secret-folder`, which is on the private list.
async fn spawn_server() -> TestServer {
    let store = Arc::new(MockStore::new());
    store.add_folder("secret-folder", "root");
    store.add_file("file-pub", "root", "report.pdf", &[7u8; 1000], "application/pdf");
    store.add_file(
        "file-sec",
        "secret-folder",
        "secret.bin",
        &[9u8; 500],
        "application/octet-stream",
    );

    let kv = Arc::new(MemoryKv::new());
    let tokens = Arc::new(TokenService::new(
        SECRET,
        Duration::from_secs(3600),
        kv.clone(),
    ));

    let settings = ResolverSettings {
        root_id: "root".to_string(),
        private_ids: HashSet::from(["secret-folder".to_string()]),
        batch_grants: HashSet::new(),
        max_depth: 20,
        metadata_retries: 1,
        metadata_backoff: Duration::from_millis(1),
    };
    let resolver = Arc::new(AccessResolver::new(
        store.clone(),
        KvAccessRecords::new(kv.clone()),
        settings,
    ));

    let limiter = Arc::new(RateLimiter::new(LimitConfig::default(), kv.clone()));
    let (activity, _) = ActivityLog::spawn(Arc::new(TracingRecorder));
    let uploads = Arc::new(UploadOrchestrator::new(
        UploadConfig {
            backoff_ms: 1,
            ..UploadConfig::default()
        },
        store.clone(),
        kv.clone(),
        activity.clone(),
    ));

    let state = AppState {
        store: store.clone(),
        tokens: tokens.clone(),
        resolver,
        limiter,
        uploads,
        activity,
        root_id: Arc::from("root"),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        client: reqwest::Client::new(),
        store,
        tokens,
    }
}

#[tokio::test]
async fn healthz_responds() {
    let server = spawn_server().await;
    let response = server.client.get(server.url("/healthz")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn malformed_id_rejected_without_upstream_call() {
    let server = spawn_server().await;
    let response = server
        .client
        .get(server.url("/download?fileId=../../etc/passwd"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(server.store.upstream_call_count(), 0);
}

#[tokio::test]
async fn anonymous_download_rejected_even_for_public_files() {
    let server = spawn_server().await;
    let response = server
        .client
        .get(server.url("/download?fileId=file-pub"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "login_required");
}

#[tokio::test]
async fn public_file_downloads_with_session() {
    let server = spawn_server().await;
    let response = server
        .client
        .get(server.url("/download?fileId=file-pub"))
        .bearer_auth(server.user_token())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("accept-ranges").unwrap(),
        "bytes"
    );
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("report.pdf"));
    assert_eq!(response.bytes().await.unwrap().len(), 1000);
}

#[tokio::test]
async fn restricted_file_distinguishes_anonymous_from_denied() {
    let server = spawn_server().await;

    let anonymous = server
        .client
        .get(server.url("/download?fileId=file-sec"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 401);
    let body: serde_json::Value = anonymous.json().await.unwrap();
    assert_eq!(body["reason"], "login_required");

    let denied = server
        .client
        .get(server.url("/download?fileId=file-sec"))
        .bearer_auth(server.user_token())
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 403);
    let body: serde_json::Value = denied.json().await.unwrap();
    assert_eq!(body["reason"], "password_required");
}

#[tokio::test]
async fn admin_session_bypasses_restriction() {
    let server = spawn_server().await;
    let response = server
        .client
        .get(server.url("/download?fileId=file-sec"))
        .bearer_auth(server.admin_token())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().len(), 500);
}

#[tokio::test]
async fn share_token_in_authorization_header_unlocks() {
    let server = spawn_server().await;
    let token = server.share_token("file-sec");
    let response = server
        .client
        .get(server.url("/download?fileId=file-sec"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().len(), 500);
}

#[tokio::test]
async fn share_token_unlocks_file() {
    let server = spawn_server().await;
    let token = server.share_token("file-sec");
    let response = server
        .client
        .get(server.url(&format!("/download?fileId=file-sec&share_token={token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn folder_share_unlocks_descendants() {
    let server = spawn_server().await;
    let token = server.share_token("secret-folder");
    let response = server
        .client
        .get(server.url(&format!("/download?fileId=file-sec&share_token={token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn revoked_share_stops_working() {
    let server = spawn_server().await;
    let token = server.share_token("file-sec");
    server.tokens.revoke_token(&token).await.unwrap();

    let response = server
        .client
        .get(server.url(&format!("/download?fileId=file-sec&share_token={token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn range_request_mirrors_partial_content() {
    let server = spawn_server().await;
    let response = server
        .client
        .get(server.url("/download?fileId=file-pub"))
        .bearer_auth(server.user_token())
        .header("range", "bytes=100-199")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 206);
    assert_eq!(
        response.headers().get("content-range").unwrap(),
        "bytes 100-199/1000"
    );
    assert_eq!(response.bytes().await.unwrap().len(), 100);
}

#[tokio::test]
async fn download_quota_yields_429_with_retry_hint() {
    let server = spawn_server().await;
    let user = server.user_token();

    for _ in 0..10 {
        let response = server
            .client
            .get(server.url("/download?fileId=file-pub"))
            .bearer_auth(&user)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let denied = server
        .client
        .get(server.url("/download?fileId=file-pub"))
        .bearer_auth(&user)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 429);
    assert!(denied.headers().contains_key("retry-after"));
    let body: serde_json::Value = denied.json().await.unwrap();
    assert!(body["retry_after_secs"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn range_continuations_do_not_consume_quota() {
    let server = spawn_server().await;
    let user = server.user_token();

    // The opening request takes the one quota slot the download needs;
    // every later range picks up mid-file for free.
    let open = server
        .client
        .get(server.url("/download?fileId=file-pub"))
        .bearer_auth(&user)
        .send()
        .await
        .unwrap();
    assert_eq!(open.status(), 200);

    for _ in 0..15 {
        let response = server
            .client
            .get(server.url("/download?fileId=file-pub"))
            .bearer_auth(&user)
            .header("range", "bytes=500-599")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 206);
    }
}

#[tokio::test]
async fn cold_range_requests_still_hit_the_quota() {
    let server = spawn_server().await;
    let admin = server.admin_token();

    for _ in 0..10 {
        let response = server
            .client
            .get(server.url("/download?fileId=file-pub"))
            .bearer_auth(&admin)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    // Quota spent. A mid-file range for an object this client never
    // opened counts like any other request and is denied.
    let denied = server
        .client
        .get(server.url("/download?fileId=file-sec"))
        .bearer_auth(&admin)
        .header("range", "bytes=100-199")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 429);

    // The already-open object keeps streaming.
    let continuation = server
        .client
        .get(server.url("/download?fileId=file-pub"))
        .bearer_auth(&admin)
        .header("range", "bytes=500-599")
        .send()
        .await
        .unwrap();
    assert_eq!(continuation.status(), 206);
}

#[tokio::test]
async fn upload_requires_admin_session() {
    let server = spawn_server().await;

    let anonymous = server
        .client
        .post(server.url("/upload?type=init"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 401);

    let non_admin = server
        .client
        .post(server.url("/upload?type=init"))
        .bearer_auth(server.user_token())
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(non_admin.status(), 403);
    let body: serde_json::Value = non_admin.json().await.unwrap();
    assert_eq!(body["reason"], "admin_required");
}

#[tokio::test]
async fn chunked_upload_runs_to_completion() {
    let server = spawn_server().await;
    let admin = server.admin_token();

    let init = server
        .client
        .post(server.url("/upload?type=init"))
        .bearer_auth(&admin)
        .json(&serde_json::json!({
            "name": "video.mp4",
            "mimeType": "video/mp4",
            "size": 5000,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(init.status(), 200);
    let body: serde_json::Value = init.json().await.unwrap();
    let session = body["uploadUrl"].as_str().unwrap().to_string();
    assert_eq!(body["parentId"], "root");

    let encoded = urlencode(&session);
    for i in 0..4u64 {
        let response = server
            .client
            .post(server.url(&format!("/upload?type=chunk&uploadUrl={encoded}")))
            .bearer_auth(&admin)
            .header("content-range", format!("bytes {}-{}/5000", i * 1000, i * 1000 + 999))
            .body(vec![i as u8; 1000])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "partial");
        assert_eq!(body["nextOffset"], (i + 1) * 1000);
    }

    let last = server
        .client
        .post(server.url(&format!("/upload?type=chunk&uploadUrl={encoded}")))
        .bearer_auth(&admin)
        .header("content-range", "bytes 4000-4999/5000")
        .body(vec![4u8; 1000])
        .send()
        .await
        .unwrap();
    assert_eq!(last.status(), 201);
    let body: serde_json::Value = last.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["file"]["name"], "video.mp4");
    assert_eq!(body["file"]["size"], 5000);
}

#[tokio::test]
async fn upload_with_path_creates_folders() {
    let server = spawn_server().await;
    let admin = server.admin_token();

    let init = server
        .client
        .post(server.url("/upload?type=init"))
        .bearer_auth(&admin)
        .json(&serde_json::json!({
            "name": "doc.txt",
            "mimeType": "text/plain",
            "path": "reports/2026",
            "size": 10,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(init.status(), 200);
    let body: serde_json::Value = init.json().await.unwrap();
    assert_ne!(body["parentId"], "root");
    // "reports" and "2026", plus the seeded secret folder.
    assert_eq!(server.store.folder_count(), 3);
}

#[tokio::test]
async fn share_endpoint_issues_working_token() {
    let server = spawn_server().await;
    let admin = server.admin_token();

    let issued = server
        .client
        .post(server.url("/api/share"))
        .bearer_auth(&admin)
        .json(&serde_json::json!({ "fileId": "file-sec" }))
        .send()
        .await
        .unwrap();
    assert_eq!(issued.status(), 200);
    let body: serde_json::Value = issued.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();
    let jti = body["capability"]["jti"].as_str().unwrap().to_string();
    assert_eq!(body["capability"]["resource_id"], "file-sec");

    let download = server
        .client
        .get(server.url(&format!("/download?fileId=file-sec&share_token={token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), 200);

    // Revoke through the API and confirm the token dies.
    let revoked = server
        .client
        .delete(server.url(&format!("/api/share/{jti}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(revoked.status(), 200);
    let body: serde_json::Value = revoked.json().await.unwrap();
    assert_eq!(body["revoked"], jti);

    let after = server
        .client
        .get(server.url(&format!("/download?fileId=file-sec&share_token={token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(after.status(), 401);
}

#[tokio::test]
async fn share_endpoint_rejects_non_admin() {
    let server = spawn_server().await;
    let response = server
        .client
        .post(server.url("/api/share"))
        .bearer_auth(server.user_token())
        .json(&serde_json::json!({ "fileId": "file-sec" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

/// Minimal query-value encoding for the session URL round-trip.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
