//! End-to-end tests against a live server.
//!
//! Each test starts the application on an ephemeral port over a throwaway
//! SQLite file and talks to it with `reqwest`, exactly like an external
//! client. All requests originate from 127.0.0.1 and therefore share one
//! rate-limit identity per fixture.
//!
//! Run with: `cargo test --test integration_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use qr_service::error::ErrorBody;
use qr_service::models::{GenerateResponse, HealthResponse, ListResponse};
use qr_service::{AppState, Config, SharedStore, SqliteStore, build_router};
use reqwest::{Client, StatusCode};
use tempfile::TempDir;
use tokio::net::TcpListener;

const VALID_KEY: &str = "secret_key_1";

/// Test fixture that owns the database directory and the running server
struct TestFixture {
    _db_dir: TempDir,
    base_url: String,
    client: Client,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Start a server with `Config::default()` adjusted by `configure`
    async fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let db_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = db_dir.path().join("qrcodes.db");

        let mut config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            db_name: db_path.to_string_lossy().into_owned(),
            ..Config::default()
        };
        configure(&mut config);
        config.validate().expect("Test config should be valid");

        let store: SharedStore =
            Arc::new(SqliteStore::open(&config.db_name).expect("Failed to open store"));
        let state = AppState::new(store, config);
        let app = build_router(state).expect("Failed to build router");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr = listener.local_addr().expect("Failed to get local address");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Server failed");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            _db_dir: db_dir,
            base_url: format!("http://{addr}"),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn generate(&self, content: &str) -> reqwest::Response {
        self.client
            .post(self.url("/generate"))
            .form(&[("content", content)])
            .send()
            .await
            .expect("Generate request failed")
    }

    async fn generate_ok(&self, content: &str) -> GenerateResponse {
        let response = self.generate(content).await;
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.expect("Failed to parse generate response")
    }

    async fn get_with_key(&self, path: &str, key: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(key) = key {
            request = request.header("X-API-Key", key);
        }
        request.send().await.expect("Request failed")
    }
}

/// Decode the single QR code in a PNG.
fn decode_qr(png: &[u8]) -> String {
    let img = image::load_from_memory(png)
        .expect("Response should be a valid image")
        .to_luma8();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        img.width() as usize,
        img.height() as usize,
        |x, y| img.get_pixel(x as u32, y as u32).0[0],
    );
    let grids = prepared.detect_grids();
    assert_eq!(grids.len(), 1, "expected exactly one QR code");
    grids[0].decode().expect("QR code should decode").1
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;

    let response = fixture.get_with_key("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: HealthResponse = response.json().await.expect("Failed to parse response");
    assert_eq!(body.status, "healthy");
    assert!(body.error.is_none());
    assert!(!body.version.is_empty());
}

#[tokio::test]
async fn test_health_is_never_rate_limited() {
    let fixture = TestFixture::new().await;

    for _ in 0..12 {
        let response = fixture.get_with_key("/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let fixture = TestFixture::new().await;

    let response = fixture.get_with_key("/health", None).await;
    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id missing")
        .to_str()
        .unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

// ============================================================================
// Generate
// ============================================================================

#[tokio::test]
async fn test_generate_returns_decodable_image() {
    let fixture = TestFixture::new().await;

    let body = fixture.generate_ok("https://example.com/hello").await;
    assert!(body.id > 0);

    let png = STANDARD.decode(&body.image).expect("image should be base64");
    assert_eq!(decode_qr(&png), "https://example.com/hello");
}

#[tokio::test]
async fn test_generate_empty_content_is_rejected() {
    let fixture = TestFixture::new().await;

    for content in ["", "   "] {
        let response = fixture.generate(content).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: ErrorBody = response.json().await.expect("Failed to parse error");
        assert_eq!(body.code, 400);
        assert_eq!(body.name, "Bad Request");
        assert_eq!(body.description, "Content is required");
    }
}

#[tokio::test]
async fn test_generate_missing_field_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/generate"))
        .form(&[("other", "value")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_generate_content_beyond_capacity_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture.generate(&"x".repeat(8_000)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let list: ListResponse = fixture
        .get_with_key("/list", Some(VALID_KEY))
        .await
        .json()
        .await
        .unwrap();
    assert!(list.qr_codes.is_empty(), "rejected content must not be stored");
}

#[tokio::test]
async fn test_concurrent_generates_get_unique_ids() {
    let fixture = Arc::new(
        TestFixture::with_config(|config| config.rate_limit_requests = 100).await,
    );

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let fixture = fixture.clone();
            tokio::spawn(async move { fixture.generate_ok(&format!("item-{i}")).await.id })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        assert!(ids.insert(handle.await.unwrap()), "duplicate id");
    }
    assert_eq!(ids.len(), 20);
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_list_requires_valid_key() {
    let fixture = TestFixture::new().await;

    let ok = fixture.get_with_key("/list", Some(VALID_KEY)).await;
    assert_eq!(ok.status(), StatusCode::OK);

    let ok = fixture.get_with_key("/list", Some("secret_key_2")).await;
    assert_eq!(ok.status(), StatusCode::OK);

    let missing = fixture.get_with_key("/list", None).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let invalid = fixture.get_with_key("/list", Some("not-a-key")).await;
    assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
    let body: ErrorBody = invalid.json().await.unwrap();
    assert_eq!(body.code, 401);
    assert_eq!(body.name, "Unauthorized");
    assert_eq!(body.description, "Invalid API key");
}

#[tokio::test]
async fn test_form_post_bypasses_key_check_by_default() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/generate"))
        .header("X-API-Key", "not-a-key")
        .form(&[("content", "bypass")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_form_post_requires_key_when_bypass_disabled() {
    let fixture = TestFixture::with_config(|config| config.auth_form_bypass = false).await;

    let rejected = fixture.generate("no key").await;
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let accepted = fixture
        .client
        .post(fixture.url("/generate"))
        .header("X-API-Key", VALID_KEY)
        .form(&[("content", "with key")])
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
}

// ============================================================================
// Download
// ============================================================================

#[tokio::test]
async fn test_download_round_trip() {
    let fixture = TestFixture::new().await;
    let created = fixture.generate_ok("round trip content").await;

    let response = fixture
        .get_with_key(&format!("/download/{}", created.id), Some(VALID_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(
        response.headers()["content-disposition"],
        format!("attachment; filename=\"qrcode_{}.png\"", created.id).as_str()
    );

    let png = response.bytes().await.unwrap();
    assert_eq!(decode_qr(&png), "round trip content");
}

#[tokio::test]
async fn test_download_unknown_id_is_not_found() {
    let fixture = TestFixture::new().await;

    for path in ["/download/999", "/download/abc", "/download/-1"] {
        let response = fixture.get_with_key(path, Some(VALID_KEY)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");

        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(
            body,
            ErrorBody {
                code: 404,
                name: "Not Found".to_string(),
                description: "QR code not found".to_string(),
            }
        );
    }
}

#[tokio::test]
async fn test_download_requires_key() {
    let fixture = TestFixture::new().await;
    let created = fixture.generate_ok("secret").await;

    let response = fixture
        .get_with_key(&format!("/download/{}", created.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// List
// ============================================================================

#[tokio::test]
async fn test_list_is_newest_first_and_idempotent() {
    let fixture = TestFixture::new().await;
    let first = fixture.generate_ok("first").await;
    let second = fixture.generate_ok("second").await;

    let a: ListResponse = fixture
        .get_with_key("/list", Some(VALID_KEY))
        .await
        .json()
        .await
        .unwrap();
    let b: ListResponse = fixture
        .get_with_key("/list", Some(VALID_KEY))
        .await
        .json()
        .await
        .unwrap();

    let ids: Vec<i64> = a.qr_codes.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(a.qr_codes[0].content, "second");
    assert_eq!(a.qr_codes, b.qr_codes);
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test]
async fn test_sixth_request_in_window_is_rate_limited() {
    let fixture = TestFixture::new().await;

    for i in 0..5 {
        fixture.generate_ok(&format!("request {i}")).await;
    }

    let response = fixture.generate("one too many").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(response.headers()["x-ratelimit-limit"], "5");

    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.code, 429);
    assert_eq!(body.name, "Too Many Requests");
}

#[tokio::test]
async fn test_rate_limit_budget_is_shared_across_routes() {
    let fixture = TestFixture::new().await;
    let created = fixture.generate_ok("shared").await;

    // Distinct ids so every download misses the cache
    for id in [created.id, 100, 101, 102] {
        let response = fixture
            .get_with_key(&format!("/download/{id}"), Some(VALID_KEY))
            .await;
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    let response = fixture.generate("over budget").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_list_is_not_rate_limited() {
    let fixture = TestFixture::new().await;

    for _ in 0..10 {
        let response = fixture.get_with_key("/list", Some(VALID_KEY)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
