//! End-to-end tests for the NDJSON stream relay

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use futures_util::StreamExt;
use tower::ServiceExt;

use common::*;
use speech_core::{AudioChunk, WireFrame};

fn stream_request(story_id: &str, scene_number: u32) -> Request<Body> {
    Request::builder()
        .uri(format!("/stories/{story_id}/scenes/{scene_number}/audio/stream"))
        .body(Body::empty())
        .unwrap()
}

async fn collect_frames(body: Body) -> Vec<WireFrame> {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| WireFrame::parse_line(l).unwrap())
        .collect()
}

fn audio_chunks(frames: &[WireFrame]) -> Vec<AudioChunk> {
    frames
        .iter()
        .filter_map(|f| f.clone().into_chunk().unwrap())
        .collect()
}

#[tokio::test]
async fn test_scenario_a_five_chunk_stream() {
    // Story s1 scene 3, streaming-capable provider, five chunks with the
    // last one flagged.
    let payloads: Vec<Vec<u8>> = vec![
        vec![1u8; 100],
        vec![2u8; 200],
        vec![3u8; 300],
        vec![4u8; 400],
        vec![5u8; 500],
    ];
    let total_bytes: usize = payloads.iter().map(Vec::len).sum();
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Chunks(payloads)));

    let response = harness.app.oneshot(stream_request("s1", 3)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/x-ndjson"
    );

    let frames = collect_frames(response.into_body()).await;

    // Metadata exactly once, and first.
    let metadata_frames: Vec<_> = frames
        .iter()
        .filter(|f| matches!(f, WireFrame::Metadata { .. }))
        .collect();
    assert_eq!(metadata_frames.len(), 1);
    assert!(matches!(frames[0], WireFrame::Metadata { .. }));
    if let WireFrame::Metadata { metadata } = &frames[0] {
        assert_eq!(metadata.provider_id, "scripted");
        assert_eq!(metadata.total_chunks, Some(5));
    }

    // Five ordered audio chunks, isLast on the fifth only.
    let chunks = audio_chunks(&frames);
    assert_eq!(chunks.len(), 5);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i as u64);
        assert_eq!(chunk.is_last, i == 4);
    }

    // The persisted record reflects the reconstituted audio.
    let record = wait_for_record(&harness.records, "s1", 3)
        .await
        .expect("detached persistence never completed");
    assert_eq!(record.file_size_bytes, total_bytes as u64);
    assert_eq!(record.provider_id, "scripted");
    assert_eq!(record.voice_id, "aria");
    assert_eq!(record.voice_name, "Aria");
    let expected_duration = TEST_PCM_SPEC.duration_of(total_bytes);
    assert!((record.duration_seconds - expected_duration).abs() < 0.001);

    // Round-trip: client-side concatenation equals the persisted bytes.
    let received: Vec<u8> = chunks.into_iter().flat_map(|c| c.payload).collect();
    let persisted = harness.store.blob(&record.audio_location).unwrap();
    assert_eq!(received, persisted);
}

#[tokio::test]
async fn test_single_chunk_stream_round_trips() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Chunks(vec![vec![
        9u8; 77
    ]])));

    let response = harness.app.oneshot(stream_request("s1", 1)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let frames = collect_frames(response.into_body()).await;
    let chunks = audio_chunks(&frames);
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_last);

    let record = wait_for_record(&harness.records, "s1", 1).await.unwrap();
    let persisted = harness.store.blob(&record.audio_location).unwrap();
    assert_eq!(persisted, vec![9u8; 77]);
}

#[tokio::test]
async fn test_regeneration_overwrites_in_place() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Chunks(vec![
        vec![1u8; 10],
        vec![2u8; 20],
    ])));

    for _ in 0..2 {
        let response = harness
            .app
            .clone()
            .oneshot(stream_request("s1", 4))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let _ = collect_frames(response.into_body()).await;
        wait_for_record(&harness.records, "s1", 4).await.unwrap();
    }

    // At most one record per (story, scene) key.
    assert_eq!(harness.records.record_count(), 1);
}

#[tokio::test]
async fn test_streaming_unsupported_sentinel() {
    // Scenario B: the provider cannot stream; the relay answers with the
    // specific sentinel the orchestrator keys its silent fallback on.
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Unsupported));
    let response = harness.app.oneshot(stream_request("s1", 3)).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "streaming_unsupported");
    assert_eq!(harness.records.record_count(), 0);
}

#[tokio::test]
async fn test_unknown_scene_is_not_found() {
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Chunks(vec![vec![1]])));
    let response = harness.app.oneshot(stream_request("s1", 99)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mid_stream_failure_discards_partial_audio() {
    let payloads: Vec<Vec<u8>> = (0..5).map(|i| vec![i as u8; 50]).collect();
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::FailAfter(
        2, payloads,
    )));

    let response = harness.app.oneshot(stream_request("s1", 3)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let frames = collect_frames(response.into_body()).await;

    // Two forwarded chunks, then the error signal closes the transport.
    assert_eq!(audio_chunks(&frames).len(), 2);
    assert!(matches!(frames.last(), Some(WireFrame::Error { .. })));

    // No corrupt or partial record may ever be written.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(harness.records.record_count(), 0);
    assert_eq!(harness.store.blob_count(), 0);
}

#[tokio::test]
async fn test_client_disconnect_is_benign_and_discards() {
    // More chunks than the relay channel holds, so the relay is still
    // forwarding when the client walks away.
    let payloads: Vec<Vec<u8>> = (0..12).map(|i| vec![i as u8; 64]).collect();
    let harness = create_test_harness(ScriptedProvider::new(StreamScript::Chunks(payloads)));

    let response = harness.app.oneshot(stream_request("s1", 3)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    // Read a little, then drop the transport mid-stream.
    let first = body.next().await;
    assert!(matches!(first, Some(Ok(_))));
    drop(body);

    // The relay must tolerate the dead transport and persist nothing.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(harness.records.record_count(), 0);
    assert_eq!(harness.store.blob_count(), 0);
}
