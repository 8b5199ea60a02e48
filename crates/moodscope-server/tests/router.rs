//! In-process router tests over the full pipeline with the lexicon backend.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use tower::ServiceExt;

use moodscope_cache::MemoryCache;
use moodscope_core::{Analyzer, AppConfig};
use moodscope_model::LexiconClassifier;
use moodscope_server::state::AppState;

fn test_router() -> axum::Router {
    let config = AppConfig::default();
    let analyzer = Analyzer::new(
        Arc::new(LexiconClassifier::new()),
        Arc::new(MemoryCache::new()),
        &config,
    );
    moodscope_server::create_router(AppState::new(Arc::new(analyzer)))
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn analyze_returns_full_envelope() {
    let app = test_router();
    let request = post_json(
        "/api/v1/analysis/analyze",
        r#"{
            "conversation_id": 42,
            "messages": [
                {"content": "Hi! Nice to meet you!"},
                {"content": "Great to connect! Excited to learn about your startup."}
            ]
        }"#,
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["conversation_id"], 42);

    let polarity = body["analysis"]["sentiment"]["sentiment_polarity"]
        .as_str()
        .unwrap();
    assert!(polarity == "positive" || polarity == "neutral");

    let quality = body["analysis"]["quality"]["conversation_quality_score"]
        .as_f64()
        .unwrap();
    assert!((0.0..=1.0).contains(&quality));

    let distribution = body["analysis"]["emotion"]["emotion_distribution"]
        .as_object()
        .unwrap();
    assert_eq!(distribution.len(), 7);

    assert!(body["models_info"]["emotion_model"].is_string());
}

#[tokio::test]
async fn empty_message_list_is_unprocessable() {
    let app = test_router();
    let request = post_json(
        "/api/v1/analysis/analyze",
        r#"{"conversation_id": 1, "messages": []}"#,
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("no messages"));
}

#[tokio::test]
async fn blank_content_reports_offending_index() {
    let app = test_router();
    let request = post_json(
        "/api/v1/analysis/analyze",
        r#"{"conversation_id": 1, "messages": [{"content": "ok"}, {"content": "  "}]}"#,
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    assert_eq!(body["message_index"], 1);
}

#[tokio::test]
async fn health_reports_accelerator_state() {
    let app = test_router();
    let request = Request::builder()
        .uri("/api/v1/analysis/health")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["accelerator"]["device"], "cpu");
    assert_eq!(body["accelerator"]["accelerator_available"], false);
}

#[tokio::test]
async fn warmup_is_idempotent() {
    let app = test_router();
    for _ in 0..2 {
        let request = Request::builder()
            .uri("/api/v1/analysis/warmup")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "warmed_up");
        assert_eq!(body["models_ready"], true);
    }
}

#[tokio::test]
async fn root_banner_and_liveness_respond() {
    let app = test_router();
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "operational");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn identical_requests_get_identical_bodies() {
    let app = test_router();
    let raw = r#"{"conversation_id": 9, "messages": [{"content": "What a wonderful day"}]}"#;

    let first = app
        .clone()
        .oneshot(post_json("/api/v1/analysis/analyze", raw))
        .await
        .unwrap();
    let second = app
        .oneshot(post_json("/api/v1/analysis/analyze", raw))
        .await
        .unwrap();

    let first_bytes = to_bytes(first.into_body(), usize::MAX).await.unwrap();
    let second_bytes = to_bytes(second.into_body(), usize::MAX).await.unwrap();
    assert_eq!(first_bytes, second_bytes);
}
