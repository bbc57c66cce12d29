//! Client for the story service that owns scene text.
//!
//! The narration pipeline never generates or stores prose itself; it asks
//! this collaborator for the text of one scene and synthesizes from that.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("story service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("story service answered {0}")]
    Status(u16),
}

/// Text source contract: `Ok(None)` means the scene does not exist.
#[async_trait]
pub trait SceneTextSource: Send + Sync {
    async fn scene_text(
        &self,
        story_id: &str,
        scene_number: u32,
    ) -> Result<Option<String>, StoryError>;
}

#[derive(Deserialize)]
struct SceneResponse {
    text: String,
}

/// HTTP implementation against the story service, with a small LRU cache so
/// regeneration of the same scene does not refetch its text.
pub struct HttpSceneTextSource {
    client: reqwest::Client,
    base_url: String,
    cache: Mutex<LruCache<(String, u32), String>>,
}

impl HttpSceneTextSource {
    const CACHE_CAPACITY: usize = 64;

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(Self::CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }
}

#[async_trait]
impl SceneTextSource for HttpSceneTextSource {
    async fn scene_text(
        &self,
        story_id: &str,
        scene_number: u32,
    ) -> Result<Option<String>, StoryError> {
        let key = (story_id.to_string(), scene_number);
        {
            let mut cache = self.cache.lock().await;
            if let Some(text) = cache.get(&key) {
                debug!(story_id, scene_number, "scene text cache hit");
                return Ok(Some(text.clone()));
            }
        }

        let url = format!(
            "{}/stories/{}/scenes/{}",
            self.base_url, story_id, scene_number
        );
        let response = self.client.get(&url).send().await?;
        match response.status() {
            s if s.is_success() => {
                let scene: SceneResponse = response.json().await?;
                let mut cache = self.cache.lock().await;
                cache.put(key, scene.text.clone());
                Ok(Some(scene.text))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            s => Err(StoryError::Status(s.as_u16())),
        }
    }
}
