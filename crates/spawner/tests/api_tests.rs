//! API integration tests.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;

mod common;
use common::{NeverReady, test_app, test_app_with_readiness};

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

fn forward_auth(original_uri: &str) -> Request<Body> {
    Request::builder()
        .uri("/auth")
        .method(Method::GET)
        .header("X-Forwarded-Uri", original_uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();

    let response = app.router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_spawn_creates_container_and_redirects_to_same_url() {
    let app = test_app();

    let response = app.router.oneshot(get("/u/alice")).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/u/alice");
    assert!(app.runtime.has("browser_alice"));
    assert_eq!(app.runtime.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_spawn_reuses_existing_container() {
    let app = test_app();

    for _ in 0..3 {
        let response = app
            .router
            .clone()
            .oneshot(get("/u/alice/index.html"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    assert_eq!(app.runtime.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_spawn_preserves_query_in_location() {
    let app = test_app();

    let response = app
        .router
        .oneshot(get("/u/bob.smith/vnc.html?autoconnect=1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/u/bob.smith/vnc.html?autoconnect=1"
    );
    assert!(app.runtime.has("browser_bob.smith"));
}

#[tokio::test]
async fn test_spawn_without_session_path_is_bad_request() {
    let app = test_app();

    for uri in ["/status", "/u/", "/u/al%20ice", "/users/alice"] {
        let response = app.router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body_text(response).await, "use /u/<id>");
    }

    assert_eq!(app.runtime.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_spawn_runtime_failure_is_service_unavailable() {
    let app = test_app();
    app.runtime.unreachable.store(true, Ordering::SeqCst);

    let response = app.router.oneshot(get("/u/alice")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(response).await, "session unavailable");
}

#[tokio::test]
async fn test_spawn_redirects_while_session_is_warming() {
    let app = test_app_with_readiness(Arc::new(NeverReady));

    let response = app
        .router
        .oneshot(get("/u/alice/vnc.html?resize=scale"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/u/alice/vnc.html?resize=scale"
    );
    assert!(app.runtime.has("browser_alice"));
}

#[tokio::test]
async fn test_spawn_rejects_non_get_methods() {
    let app = test_app();

    for method in [Method::POST, Method::DELETE, Method::PUT] {
        let request = Request::builder()
            .uri("/u/alice")
            .method(method.clone())
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
    }

    let head = Request::builder()
        .uri("/u/alice")
        .method(Method::HEAD)
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(head).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(app.runtime.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_forward_auth_allows_session_paths_and_records_activity() {
    let app = test_app();
    let before = Utc::now();

    let response = app
        .router
        .oneshot(forward_auth("/u/alice/settings"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
    let seen = app.activity.last_seen("browser_alice").await.unwrap();
    assert!(seen >= before);
}

#[tokio::test]
async fn test_forward_auth_ignores_query_string() {
    let app = test_app();

    let response = app
        .router
        .oneshot(forward_auth("/u/alice?token=abc/def"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.activity.last_seen("browser_alice").await.is_some());
}

#[tokio::test]
async fn test_forward_auth_denies_other_paths() {
    let app = test_app();

    let response = app.router.clone().oneshot(forward_auth("/admin")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "forbidden");

    // Without the forwarded header the request's own path is checked.
    let response = app.router.oneshot(get("/auth")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(app.activity.is_empty().await);
}

#[tokio::test]
async fn test_forward_auth_does_not_create_containers() {
    let app = test_app();

    let response = app
        .router
        .oneshot(forward_auth("/u/carol/"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!app.runtime.has("browser_carol"));
}
