mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{get, TestApp};
use tower::util::ServiceExt;

#[tokio::test]
async fn test_health_reports_database_down_with_pool_stats() {
    let app = TestApp::new();

    let (status, body) = app.send(get("/health", None)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["database"], "down");
    assert_eq!(body["pool"]["max"], 2);
    assert_eq!(body["pool"]["active"], 0);
    assert!(body["pool"]["failed_requests"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_metrics_endpoint_renders_prometheus_text() {
    service_core::observability::init_metrics();
    let app = TestApp::new();

    // Generate at least one auth rejection so the counter exists.
    let _ = app.send(get("/auth/verify-token", None)).await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("auth_rejections_total"));
}

#[tokio::test]
async fn test_security_and_request_id_headers() {
    let app = TestApp::new();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/verify-token")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["cache-control"], "no-store");
    assert_eq!(headers["x-request-id"], "req-123");
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let app = TestApp::new();

    let (status, body) = app.send(get("/.well-known/openapi.json", None)).await;

    assert_eq!(status, StatusCode::OK);
    let paths = body["paths"].as_object().unwrap();
    for path in ["/auth/google", "/reports/{id}", "/admin/pool/stats", "/chat"] {
        assert!(paths.contains_key(path), "{path}");
    }
    assert!(body["components"]["securitySchemes"]["bearer_auth"].is_object());
}
