//! Integration tests for the retrieval endpoint and ambient routes

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use tower::ServiceExt;

use server::store::SceneAudioRecords;

use common::*;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));
    let response = harness.app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));
    let response = harness.app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let metrics: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(metrics["request_count"].is_number());
    assert!(metrics["memory_total_mb"].is_number());
}

#[tokio::test]
async fn test_retrieval_without_record_reports_missing() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));
    let response = harness
        .app
        .oneshot(get("/stories/s1/scenes/3/audio"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["exists"], false);
    // No generation was requested, so nothing may have been persisted.
    assert!(json.get("audioUrl").is_none());
    assert_eq!(harness.records.record_count(), 0);
}

#[tokio::test]
async fn test_retrieval_validation_rejects_bad_addressing() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));

    let response = harness
        .app
        .clone()
        .oneshot(get("/stories/bad%20id/scenes/3/audio"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .app
        .oneshot(get("/stories/s1/scenes/0/audio"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_inline_generation_for_unknown_scene_is_not_found() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));
    let response = harness
        .app
        .oneshot(get("/stories/s1/scenes/99/audio?generate=true"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_inline_generation_creates_record_and_signed_url() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));
    let response = harness
        .app
        .clone()
        .oneshot(get("/stories/s1/scenes/3/audio?generate=true"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["exists"], true);
    assert!(json["audioUrl"].as_str().unwrap().contains("token="));
    assert_eq!(json["fileSize"], WHOLE_FILE_BYTES as u64);
    assert_eq!(json["duration"], WHOLE_FILE_DURATION as f64);
    assert_eq!(json["provider"], "scripted");
    assert_eq!(json["voice"]["id"], "aria");
    assert_eq!(json["voice"]["name"], "Aria");

    let record = harness.records.get("s1", 3).await.unwrap().unwrap();
    assert_eq!(record.file_size_bytes, WHOLE_FILE_BYTES as u64);
    assert_eq!(
        harness.store.blob(&record.audio_location).unwrap().len(),
        WHOLE_FILE_BYTES
    );

    // A later plain retrieval is served from the record.
    let response = harness
        .app
        .oneshot(get("/stories/s1/scenes/3/audio"))
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["exists"], true);
}

#[tokio::test]
async fn test_inline_generation_is_idempotent_per_scene() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));
    for _ in 0..2 {
        let response = harness
            .app
            .clone()
            .oneshot(get("/stories/s1/scenes/2/audio?generate=true"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(harness.records.record_count(), 1);
}

#[tokio::test]
async fn test_settings_invalidate_endpoint() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));
    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/settings/invalidate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["invalidated"], true);
}

#[tokio::test]
async fn test_not_found_endpoint() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));
    let response = harness.app.oneshot(get("/nonexistent")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
