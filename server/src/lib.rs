pub mod config;
pub mod error;
pub mod relay;
pub mod store;
pub mod validation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, Request, State},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use speech_core::{
    providers::HttpSpeechProvider, SpeechProvider, Voice, VoiceSettings, VoiceSettingsCache,
};
use story_core::{HttpSceneTextSource, SceneTextSource};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::store::{
    AudioStore, MemoryAudioStore, MemoryRecordStore, SceneAudioRecord, SceneAudioRecords,
};
use crate::validation::{validate_scene_request, validate_scene_text};

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn SpeechProvider>,
    pub scenes: Arc<dyn SceneTextSource>,
    pub store: Arc<dyn AudioStore>,
    pub records: Arc<dyn SceneAudioRecords>,
    pub settings: Arc<VoiceSettingsCache>,
    pub request_count: Arc<AtomicU64>,
    pub config: ServerConfig,
}

/// Build the application router over an already-wired state.
///
/// The streaming route lives outside the timeout stack: a relay response is
/// open for as long as synthesis runs and must not be cut by the request
/// timeout that guards every other route.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    let timed_api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/settings/invalidate", post(invalidate_settings))
        .route(
            "/stories/{story_id}/scenes/{scene_number}/audio",
            get(get_scene_audio),
        )
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    let streaming_api = Router::new().route(
        "/stories/{story_id}/scenes/{scene_number}/audio/stream",
        get(relay::stream_scene_audio),
    );

    Router::new()
        .merge(timed_api)
        .merge(streaming_api)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .into_inner(),
        )
        .with_state(state)
}

// CORS configuration - environment-aware
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if let Some(ref allowed_origins) = config.cors_allowed_origins {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin: &String| origin.parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
            permissive_cors()
        } else {
            info!("CORS configured for {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        }
    } else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        permissive_cors()
    }
}

fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false)
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    request.headers_mut().insert(
        "x-request-id",
        axum::http::HeaderValue::from_str(&request_id).unwrap(),
    );
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        "x-request-id",
        axum::http::HeaderValue::from_str(&request_id).unwrap(),
    );
    response
}

pub async fn health_check() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
}

static START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_usage = system.global_cpu_info().cpu_usage();
    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let request_count = state.request_count.load(Ordering::Relaxed);
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(MetricsResponse {
        cpu_usage_percent: cpu_usage,
        memory_used_mb: memory_used / 1024 / 1024,
        memory_total_mb: memory_total / 1024 / 1024,
        memory_usage_percent,
        request_count,
        uptime_seconds: uptime,
    })
}

/// Voice settings changed upstream: drop every cached selection.
pub async fn invalidate_settings(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.settings.invalidate().await;
    Json(serde_json::json!({ "invalidated": true }))
}

#[derive(Deserialize)]
pub struct SceneAudioQuery {
    #[serde(default)]
    generate: bool,
}

#[derive(Serialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneAudioResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceInfo>,
}

impl SceneAudioResponse {
    fn missing() -> Self {
        Self {
            exists: false,
            audio_url: None,
            file_size: None,
            duration: None,
            provider: None,
            voice: None,
        }
    }

    fn found(record: &SceneAudioRecord, audio_url: String) -> Self {
        Self {
            exists: true,
            audio_url: Some(audio_url),
            file_size: Some(record.file_size_bytes),
            duration: Some(record.duration_seconds),
            provider: Some(record.provider_id.clone()),
            voice: Some(VoiceInfo {
                id: record.voice_id.clone(),
                name: record.voice_name.clone(),
            }),
        }
    }
}

/// Retrieval endpoint: existing records are answered with a signed URL; with
/// `generate=true` a missing record triggers inline whole-file generation.
pub async fn get_scene_audio(
    State(state): State<AppState>,
    Path((story_id, scene_number)): Path<(String, u32)>,
    Query(query): Query<SceneAudioQuery>,
) -> Result<Json<SceneAudioResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_scene_request(&story_id, scene_number)?;

    if let Some(record) = state.records.get(&story_id, scene_number).await? {
        let url = state
            .store
            .sign(&record.audio_location, state.config.signed_url_ttl())
            .await?;
        return Ok(Json(SceneAudioResponse::found(&record, url)));
    }

    if !query.generate {
        return Ok(Json(SceneAudioResponse::missing()));
    }

    let text = state
        .scenes
        .scene_text(&story_id, scene_number)
        .await
        .map_err(|e| ApiError::InternalError(format!("story service: {e}")))?
        .ok_or_else(|| {
            ApiError::NotFound(format!("no scene {scene_number} in story {story_id}"))
        })?;
    validate_scene_text(&text)?;

    let settings = state.settings.for_story(&story_id).await;
    let audio = tokio::time::timeout(
        state.config.provider_timeout(),
        state.provider.generate(&text, &settings.voice),
    )
    .await
    .map_err(|_| {
        ApiError::Synthesis(format!(
            "generation timed out after {} seconds",
            state.config.provider_timeout_secs
        ))
    })?
    .map_err(|e| ApiError::Synthesis(e.to_string()))?;

    let file_size_bytes = audio.bytes.len() as u64;
    let location = state.store.upload(audio.bytes).await?;
    let record = SceneAudioRecord {
        story_id: story_id.clone(),
        scene_number,
        audio_location: location,
        file_size_bytes,
        duration_seconds: audio.duration_seconds,
        provider_id: state.provider.id().to_string(),
        voice_id: settings.voice.id.clone(),
        voice_name: settings.voice.name.clone(),
        generated_at: chrono::Utc::now(),
    };
    state.records.upsert(record.clone()).await?;
    info!(story_id, scene_number, "scene audio generated inline");

    let url = state
        .store
        .sign(&record.audio_location, state.config.signed_url_ttl())
        .await?;
    Ok(Json(SceneAudioResponse::found(&record, url)))
}

/// Wire the production collaborators from the environment and serve.
pub async fn run() -> anyhow::Result<()> {
    info!("Starting narration relay server...");

    let config = ServerConfig::from_env();

    let streaming = std::env::var("SPEECH_STREAMING")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true);
    let provider_id =
        std::env::var("SPEECH_PROVIDER_ID").unwrap_or_else(|_| "narrator-v1".into());
    let provider: Arc<dyn SpeechProvider> =
        Arc::new(HttpSpeechProvider::from_env(provider_id.clone(), streaming)?);
    info!(
        provider = %provider_id,
        streaming, "speech provider configured"
    );

    let story_api_url =
        std::env::var("STORY_API_URL").unwrap_or_else(|_| "http://localhost:8080".into());
    let scenes: Arc<dyn SceneTextSource> = Arc::new(HttpSceneTextSource::new(story_api_url));

    let public_base = std::env::var("AUDIO_PUBLIC_URL")
        .unwrap_or_else(|_| format!("http://localhost:{}/blobs", config.port));
    let store: Arc<dyn AudioStore> = Arc::new(MemoryAudioStore::new(public_base));
    let records: Arc<dyn SceneAudioRecords> = Arc::new(MemoryRecordStore::new());

    let default_voice = VoiceSettings {
        provider_id,
        voice: Voice {
            id: std::env::var("VOICE_ID").unwrap_or_else(|_| "aria".into()),
            name: std::env::var("VOICE_NAME").unwrap_or_else(|_| "Aria".into()),
        },
    };
    let settings = Arc::new(VoiceSettingsCache::new(
        default_voice,
        256,
        Duration::from_secs(3600),
    ));

    let _ = START_TIME.get_or_init(std::time::Instant::now);

    let state = AppState {
        provider,
        scenes,
        store,
        records,
        settings,
        request_count: Arc::new(AtomicU64::new(0)),
        config: config.clone(),
    };
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, provider_timeout={}s",
        config.port, config.rate_limit_per_minute, config.provider_timeout_secs
    );

    // Rate limiting configuration
    // Using GlobalKeyExtractor to rate limit globally (all requests share the same limit)
    // This works better in Docker/proxy environments where IP extraction can be problematic
    let governor_conf = Arc::new(
        tower_governor::governor::GovernorConfigBuilder::default()
            .per_second((config.rate_limit_per_minute / 60).max(1) as u64)
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(tower_governor::key_extractor::GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let app = app(state).layer(tower_governor::GovernorLayer::new(governor_conf));

    let addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
