mod common;

use axum::http::StatusCode;
use common::{get, json_request, test_config, TestApp};
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn test_reports_require_session() {
    let app = TestApp::new();

    let (status, body) = app.send(get("/reports", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "missing_token");
}

#[tokio::test]
async fn test_empty_update_is_bad_request() {
    let app = TestApp::new();
    let token = app.token(4, "Public");

    let (status, _) = app
        .send(json_request("PATCH", "/reports/1", Some(&token), json!({})))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_rejects_oversized_page() {
    let app = TestApp::new();
    let token = app.token(4, "Public");

    let (status, _) = app.send(get("/reports?limit=500", Some(&token))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_create_validates_coordinates() {
    let app = TestApp::new();
    let token = app.token(4, "Public");

    let (status, _) = app
        .send(json_request(
            "POST",
            "/reports",
            Some(&token),
            json!({
                "title": "Landslide",
                "description": "Road blocked",
                "disaster_type": "landslide",
                "location": "Wayanad",
                "latitude": 123.0
            }),
        ))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_status_change_is_admin_only() {
    let app = TestApp::new();
    let token = app.token(4, "Public");

    let (status, body) = app
        .send(json_request(
            "PATCH",
            "/admin/reports/1/status",
            Some(&token),
            json!({ "status": "verified" }),
        ))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "insufficient_role");
}

async fn register(app: &TestApp, email: &str) -> (String, i64) {
    let (status, body) = app
        .send(json_request(
            "POST",
            "/auth/register",
            None,
            json!({ "email": email, "password": "a-long-password" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["user"]["user_id"].as_i64().unwrap(),
    )
}

/// Report lifecycle with alerts. Needs PostgreSQL at `TEST_DATABASE_URL`.
#[tokio::test]
#[ignore]
async fn test_report_workflow_and_alerts() {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        return;
    };
    let stamp = chrono::Utc::now().timestamp_micros();
    let admin_email = format!("admin-{stamp}@example.org");
    let mut config = test_config();
    config.database.url = secrecy::Secret::new(url);
    config.security.admin_emails = vec![admin_email.clone()];
    let pool = disaster_service::db::create_pool(&config.database).unwrap();
    disaster_service::db::run_migrations(&pool).await.unwrap();
    let app = TestApp::with_config(config);

    let (admin, _) = register(&app, &admin_email).await;
    let (reporter, reporter_id) = register(&app, &format!("reporter-{stamp}@example.org")).await;
    let (watcher, _) = register(&app, &format!("watcher-{stamp}@example.org")).await;
    let (other, _) = register(&app, &format!("other-{stamp}@example.org")).await;

    let (status, _) = app
        .send(json_request(
            "PUT",
            "/subscriptions/me",
            Some(&watcher),
            json!({
                "disaster_types": ["Flood"],
                "min_severity": "high",
                "region": "kerala"
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, report) = app
        .send(json_request(
            "POST",
            "/reports",
            Some(&reporter),
            json!({
                "title": "Periyar breached its banks",
                "description": "Water entering homes near Aluva",
                "disaster_type": "flood",
                "location": "Aluva, Kerala",
                "severity": "critical"
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(report["status"], "pending");
    assert_eq!(report["user_id"], reporter_id);
    let id = report["report_id"].as_i64().unwrap();
    let uri = format!("/reports/{id}");

    // Only the reporter may edit a pending report.
    let (status, _) = app
        .send(json_request("PATCH", &uri, Some(&other), json!({ "title": "Spam title" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, updated) = app
        .send(json_request(
            "PATCH",
            &uri,
            Some(&reporter),
            json!({ "description": "Water entering homes near Aluva market" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "Periyar breached its banks");

    // pending -> resolved is not a legal move.
    let status_uri = format!("/admin/reports/{id}/status");
    let (status, _) = app
        .send(json_request("PATCH", &status_uri, Some(&admin), json!({ "status": "resolved" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, changed) = app
        .send(json_request("PATCH", &status_uri, Some(&admin), json!({ "status": "verified" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(changed["report"]["status"], "verified");
    assert!(changed["notifications_queued"].as_u64().unwrap() >= 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let sent = app.notifier.sent();
    assert!(sent.contains(&(format!("watcher-{stamp}@example.org"), id)));
    assert!(!sent.iter().any(|(to, _)| to.starts_with(&format!("reporter-{stamp}"))));

    // Verified reports are no longer editable by their owner.
    let (status, _) = app
        .send(json_request("PATCH", &uri, Some(&reporter), json!({ "severity": "low" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, list) = app.send(get("/reports?mine=true", Some(&reporter))).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<Value> = list["reports"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["report_id"].clone())
        .collect();
    assert!(ids.contains(&json!(id)));

    let (status, _) = app.send(delete(&uri, &other)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.send(delete(&uri, &reporter)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.send(get(&uri, Some(&reporter))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn delete(uri: &str, token: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(axum::body::Body::empty())
        .unwrap()
}
