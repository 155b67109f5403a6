use crate::{cache_key, MediaRecord, Platform, ResolveError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// One cached resolution, with its access bookkeeping.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub id: String,
    /// Original URL as the user pasted it.
    pub url: String,
    pub normalized_url: String,
    pub video_id: String,
    pub platform: Platform,
    pub result: MediaRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

/// The persistent document store the gateway talks to. Lookup is keyed by
/// (normalized URL, platform); upsert identity additionally includes the
/// video id.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn find(
        &self,
        normalized_url: &str,
        platform: Platform,
    ) -> Result<Option<CacheEntry>, StoreError>;

    /// Bump `accessed_at` and the access count of one entry.
    async fn touch(&self, id: &str) -> Result<(), StoreError>;

    async fn upsert(
        &self,
        original_url: &str,
        normalized_url: &str,
        platform: Platform,
        record: MediaRecord,
    ) -> Result<(), StoreError>;

    /// Most recently accessed first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<CacheEntry>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn total_accesses(&self) -> Result<u64, StoreError>;

    async fn top_accessed(&self, limit: usize) -> Result<Vec<CacheEntry>, StoreError>;

    /// Delete by store-native id first, then by the `video_id` field.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// In-process store used by default and under test.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn find(
        &self,
        normalized_url: &str,
        platform: Platform,
    ) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self
            .entries
            .iter()
            .find(|entry| entry.normalized_url == normalized_url && entry.platform == platform)
            .map(|entry| entry.clone()))
    }

    async fn touch(&self, id: &str) -> Result<(), StoreError> {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.accessed_at = Utc::now();
            entry.access_count += 1;
        }
        Ok(())
    }

    async fn upsert(
        &self,
        original_url: &str,
        normalized_url: &str,
        platform: Platform,
        record: MediaRecord,
    ) -> Result<(), StoreError> {
        let now = Utc::now();

        let existing_id = self
            .entries
            .iter()
            .find(|entry| {
                entry.normalized_url == normalized_url
                    && entry.platform == platform
                    && entry.video_id == record.video_id
            })
            .map(|entry| entry.id.clone());

        match existing_id {
            Some(id) => {
                if let Some(mut entry) = self.entries.get_mut(&id) {
                    entry.url = original_url.to_string();
                    entry.result = record;
                    entry.updated_at = now;
                    entry.accessed_at = now;
                    entry.access_count += 1;
                }
            }
            None => {
                let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                self.entries.insert(
                    id.clone(),
                    CacheEntry {
                        id,
                        url: original_url.to_string(),
                        normalized_url: normalized_url.to_string(),
                        video_id: record.video_id.clone(),
                        platform,
                        result: record,
                        created_at: now,
                        updated_at: now,
                        accessed_at: now,
                        access_count: 1,
                    },
                );
            }
        }
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<CacheEntry>, StoreError> {
        let mut entries: Vec<CacheEntry> =
            self.entries.iter().map(|entry| entry.clone()).collect();
        entries.sort_by(|a, b| b.accessed_at.cmp(&a.accessed_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.entries.len() as u64)
    }

    async fn total_accesses(&self) -> Result<u64, StoreError> {
        Ok(self.entries.iter().map(|entry| entry.access_count).sum())
    }

    async fn top_accessed(&self, limit: usize) -> Result<Vec<CacheEntry>, StoreError> {
        let mut entries: Vec<CacheEntry> =
            self.entries.iter().map(|entry| entry.clone()).collect();
        entries.sort_by(|a, b| b.access_count.cmp(&a.access_count));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if self.entries.remove(id).is_some() {
            return Ok(true);
        }
        let fallback = self
            .entries
            .iter()
            .find(|entry| entry.video_id == id)
            .map(|entry| entry.id.clone());
        match fallback {
            Some(key) => Ok(self.entries.remove(&key).is_some()),
            None => Ok(false),
        }
    }
}

/// Aggregate cache statistics for the history surface.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: u64,
    pub total_accesses: u64,
    pub top_accessed: Vec<CacheEntry>,
}

/// Best-effort caching front. Lookup and upsert swallow store failures so a
/// dead store degrades to an always-miss cache instead of failing requests;
/// the history surface does surface store errors.
#[derive(Clone)]
pub struct CacheGateway {
    store: Arc<dyn VideoStore>,
}

impl CacheGateway {
    pub fn new(store: Arc<dyn VideoStore>) -> Self {
        Self { store }
    }

    /// Cache hit returns the stored record and bumps the access bookkeeping.
    pub async fn lookup(&self, url: &str, platform: Platform) -> Option<MediaRecord> {
        let normalized = cache_key(url);
        match self.store.find(&normalized, platform).await {
            Ok(Some(entry)) => {
                if let Err(e) = self.store.touch(&entry.id).await {
                    warn!(error = %e, "Cache touch failed");
                }
                debug!(normalized_url = %normalized, platform = %platform, "Cache hit");
                Some(entry.result)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Insert or update keyed by (normalized URL, platform, video id).
    /// Failures are logged and dropped; caching never aborts resolution.
    pub async fn upsert(&self, original_url: &str, platform: Platform, record: &MediaRecord) {
        let normalized = cache_key(original_url);
        if let Err(e) = self
            .store
            .upsert(original_url, &normalized, platform, record.clone())
            .await
        {
            warn!(error = %e, "Cache upsert failed, continuing");
        }
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<CacheEntry>, ResolveError> {
        self.store
            .list_recent(limit)
            .await
            .map_err(|e| ResolveError::CacheError(e.to_string()))
    }

    pub async fn stats(&self) -> Result<CacheStats, ResolveError> {
        let total_entries = self
            .store
            .count()
            .await
            .map_err(|e| ResolveError::CacheError(e.to_string()))?;
        let total_accesses = self
            .store
            .total_accesses()
            .await
            .map_err(|e| ResolveError::CacheError(e.to_string()))?;
        let top_accessed = self
            .store
            .top_accessed(10)
            .await
            .map_err(|e| ResolveError::CacheError(e.to_string()))?;

        Ok(CacheStats {
            total_entries,
            total_accesses,
            top_accessed,
        })
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<bool, ResolveError> {
        self.store
            .delete(id)
            .await
            .map_err(|e| ResolveError::CacheError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(video_id: &str) -> MediaRecord {
        MediaRecord {
            video_id: video_id.to_string(),
            description: String::new(),
            author: "ai đó".to_string(),
            avatar: None,
            cover: None,
            music: None,
            duration_seconds: 10,
            resolution: None,
            bitrate_kbps: None,
            size_bytes: None,
            published_at: None,
            direct_media_url: "https://cdn/v.mp4".to_string(),
            proxy_download_path: "/api/douyin/download?source=x&filename=1.mp4".to_string(),
            platform: Platform::Douyin,
        }
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_entry_and_counts() {
        let store = MemoryStore::new();
        let url = "https://www.douyin.com/video/1";

        store
            .upsert(url, "https://www.douyin.com/video/1", Platform::Douyin, record("1"))
            .await
            .unwrap();
        store
            .upsert(url, "https://www.douyin.com/video/1", Platform::Douyin, record("1"))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let entry = store
            .find("https://www.douyin.com/video/1", Platform::Douyin)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.access_count, 2);
    }

    #[tokio::test]
    async fn distinct_video_ids_get_distinct_entries() {
        let store = MemoryStore::new();
        store
            .upsert("u1", "n1", Platform::Douyin, record("1"))
            .await
            .unwrap();
        store
            .upsert("u1", "n1", Platform::Douyin, record("2"))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn lookup_touches_bookkeeping() {
        let store = Arc::new(MemoryStore::new());
        let gateway = CacheGateway::new(store.clone());

        gateway
            .upsert("https://www.douyin.com/video/1?share=1", Platform::Douyin, &record("1"))
            .await;

        let hit = gateway
            .lookup("https://www.douyin.com/video/1", Platform::Douyin)
            .await;
        assert!(hit.is_some());

        let entry = store
            .find("https://www.douyin.com/video/1", Platform::Douyin)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.access_count, 2);
    }

    #[tokio::test]
    async fn platform_scopes_lookups() {
        let gateway = CacheGateway::new(Arc::new(MemoryStore::new()));
        gateway.upsert("https://x/1", Platform::Douyin, &record("1")).await;

        assert!(gateway.lookup("https://x/1", Platform::Tiktok).await.is_none());
        assert!(gateway.lookup("https://x/1", Platform::Douyin).await.is_some());
    }

    #[tokio::test]
    async fn delete_tries_native_id_then_video_id() {
        let store = MemoryStore::new();
        store.upsert("u", "n", Platform::Douyin, record("77")).await.unwrap();

        // Unknown everything: false without error.
        assert!(!store.delete("missing").await.unwrap());
        // By video id field.
        assert!(store.delete("77").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_orders_by_recency() {
        let store = Arc::new(MemoryStore::new());
        let gateway = CacheGateway::new(store.clone());

        gateway.upsert("https://x/old", Platform::Douyin, &record("old")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        gateway.upsert("https://x/new", Platform::Douyin, &record("new")).await;

        let history = gateway.history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].video_id, "new");

        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_accesses, 2);
    }
}
