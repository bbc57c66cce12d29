//! Durable audio store and scene record contracts.
//!
//! The physical store is an external collaborator; only its upload/sign
//! contract matters to the pipeline. The in-memory implementations back
//! local deployments and tests: uploads are content-addressed by digest and
//! signed URLs carry an expiry plus a token derived from location and
//! expiry, time-limited the way a real blob store would issue them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("upload failed: {0}")]
    Upload(String),

    #[error("unknown audio location: {0}")]
    UnknownLocation(String),
}

/// Content-addressed blob store contract: `upload` returns a location,
/// `sign` turns a location into a time-limited URL.
#[async_trait]
pub trait AudioStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>) -> Result<String, StoreError>;

    async fn sign(&self, location: &str, ttl: Duration) -> Result<String, StoreError>;
}

/// The one durable artifact of the pipeline, keyed by (story, scene).
#[derive(Debug, Clone, PartialEq)]
pub struct SceneAudioRecord {
    pub story_id: String,
    pub scene_number: u32,
    pub audio_location: String,
    pub file_size_bytes: u64,
    pub duration_seconds: f32,
    pub provider_id: String,
    pub voice_id: String,
    pub voice_name: String,
    pub generated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SceneAudioRecords: Send + Sync {
    /// Last-writer-wins: at most one record per key, regeneration overwrites
    /// in place.
    async fn upsert(&self, record: SceneAudioRecord) -> Result<(), StoreError>;

    async fn get(
        &self,
        story_id: &str,
        scene_number: u32,
    ) -> Result<Option<SceneAudioRecord>, StoreError>;
}

pub struct MemoryAudioStore {
    blobs: DashMap<String, Vec<u8>>,
    public_base: String,
}

impl MemoryAudioStore {
    pub fn new(public_base: impl Into<String>) -> Self {
        Self {
            blobs: DashMap::new(),
            public_base: public_base.into(),
        }
    }

    /// Raw blob lookup, used by tests to verify round-trips.
    pub fn blob(&self, location: &str) -> Option<Vec<u8>> {
        self.blobs.get(location).map(|b| b.value().clone())
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    fn token(location: &str, expires: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(location.as_bytes());
        hasher.update(expires.to_le_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl AudioStore for MemoryAudioStore {
    async fn upload(&self, bytes: Vec<u8>) -> Result<String, StoreError> {
        let location = hex::encode(Sha256::digest(&bytes));
        self.blobs.insert(location.clone(), bytes);
        Ok(location)
    }

    async fn sign(&self, location: &str, ttl: Duration) -> Result<String, StoreError> {
        if !self.blobs.contains_key(location) {
            return Err(StoreError::UnknownLocation(location.to_string()));
        }
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + ttl.as_secs();
        Ok(format!(
            "{}/{}?expires={}&token={}",
            self.public_base,
            location,
            expires,
            Self::token(location, expires)
        ))
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<(String, u32), SceneAudioRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl SceneAudioRecords for MemoryRecordStore {
    async fn upsert(&self, record: SceneAudioRecord) -> Result<(), StoreError> {
        self.records
            .insert((record.story_id.clone(), record.scene_number), record);
        Ok(())
    }

    async fn get(
        &self,
        story_id: &str,
        scene_number: u32,
    ) -> Result<Option<SceneAudioRecord>, StoreError> {
        Ok(self
            .records
            .get(&(story_id.to_string(), scene_number))
            .map(|r| r.value().clone()))
    }
}
