//! Process-wide voice selection cache.
//!
//! Which provider and voice narrate a story is configuration owned by an
//! external settings service; the adapter only consults a cached copy.
//! Entries age out on a TTL and the whole cache can be dropped through the
//! explicit `invalidate` lifecycle hook when settings change upstream.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use ahash::AHasher;
use lru::LruCache;
use tokio::sync::RwLock;

use crate::provider::Voice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSettings {
    pub provider_id: String,
    pub voice: Voice,
}

struct CachedSettings {
    settings: VoiceSettings,
    cached_at: Instant,
}

pub struct VoiceSettingsCache {
    entries: RwLock<LruCache<u64, CachedSettings>>,
    ttl: Duration,
    default: VoiceSettings,
}

impl VoiceSettingsCache {
    pub fn new(default: VoiceSettings, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
            default,
        }
    }

    fn key(story_id: &str) -> u64 {
        let mut hasher = AHasher::default();
        story_id.hash(&mut hasher);
        hasher.finish()
    }

    /// Voice selection for a story; falls back to the process default when
    /// nothing fresh is cached.
    pub async fn for_story(&self, story_id: &str) -> VoiceSettings {
        let key = Self::key(story_id);
        let entries = self.entries.read().await;
        if let Some(cached) = entries.peek(&key) {
            if cached.cached_at.elapsed() < self.ttl {
                return cached.settings.clone();
            }
        }
        self.default.clone()
    }

    pub async fn set(&self, story_id: &str, settings: VoiceSettings) {
        let key = Self::key(story_id);
        let mut entries = self.entries.write().await;
        entries.put(
            key,
            CachedSettings {
                settings,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop every cached selection. Called when upstream settings change.
    pub async fn invalidate(&self) {
        self.entries.write().await.clear();
    }

    pub async fn invalidate_story(&self, story_id: &str) {
        self.entries.write().await.pop(&Self::key(story_id));
    }

    pub fn default_settings(&self) -> &VoiceSettings {
        &self.default
    }
}
