//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with a mock browser injected, enabling E2E testing of the HTTP API
//! without a browser shim attached.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use modreport_core::{
    testing::MockBrowser, AdmissionQueue, BridgeBrowser, Config, MessageRouter,
    ReportOrchestrator,
};
use modreport_server::state::AppState;

/// Re-export fixtures for test convenience
pub use modreport_core::testing::fixtures;

/// Test fixture for E2E testing with a mock browser.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_list_round_trip() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/messages", json!({
///         "message": { "action_name": "get-from-list", "action_payload": { "item_id": "1" } }
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock browser - script tab loading and page replies
    pub browser: Arc<MockBrowser>,
    /// Bridge the `/bridge` endpoint attaches to (unused by the mock pipeline)
    pub bridge: Arc<BridgeBrowser>,
    pub queue: Arc<AdmissionQueue>,
    pub config: Config,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    /// Create a new test fixture with default test config.
    pub async fn new() -> Self {
        Self::with_config(fixtures::test_config()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(config: Config) -> Self {
        let browser = Arc::new(MockBrowser::new());
        let bridge = Arc::new(BridgeBrowser::new(config.bridge.command_timeout()));

        let queue = Arc::new(AdmissionQueue::new(&config.queue));
        queue.start().await;

        let orchestrator = Arc::new(ReportOrchestrator::new(
            &config,
            Arc::clone(&queue),
            browser.clone(),
        ));
        let message_router = Arc::new(MessageRouter::new(
            Arc::clone(&orchestrator),
            browser.clone(),
        ));

        // Create app state with mocks
        let state = Arc::new(AppState::new(
            config.clone(),
            Arc::clone(&queue),
            Arc::clone(&bridge),
            orchestrator,
            message_router,
        ));

        // Create router
        let router = modreport_server::api::create_router(state);

        Self {
            router,
            browser,
            bridge,
            queue,
            config,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}
