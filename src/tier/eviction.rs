//! LRU eviction of pages from the hot embedded store to the external bucket
//!.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{BucketDriver, ObjectMetadata};

use super::page::{PageStore, PageTier};

#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    pub evicted: Vec<String>,
    pub dry_run: bool,
}

/// `maxHotPages`/`evictionThreshold`/`evictionTarget`.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    pub max_hot_pages: usize,
    pub eviction_threshold: f64,
    pub eviction_target: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        EvictionConfig {
            max_hot_pages: 256,
            eviction_threshold: 0.9,
            eviction_target: 0.7,
        }
    }
}

/// moves the coldest resident pages out to `cold_bucket`, one at a time, in
/// crash-safe order: write to the bucket, retag the page's tier, *then* drop
/// the embedded row. a failure between the
/// bucket write and the row delete leaves a recoverable duplicate, never a
/// lost page — so the row delete is the last thing this does per page.
pub struct EvictionManager {
    pages: Arc<PageStore>,
    cold_bucket: Arc<dyn BucketDriver>,
    config: EvictionConfig,
}

impl EvictionManager {
    pub fn new(pages: Arc<PageStore>, cold_bucket: Arc<dyn BucketDriver>, config: EvictionConfig) -> Self {
        EvictionManager {
            pages,
            cold_bucket,
            config,
        }
    }

    /// true once the resident page count reaches `threshold · maxHotPages`.
    pub async fn should_evict(&self) -> Result<bool> {
        let resident = self.pages.resident_count().await?;
        Ok(resident as f64 >= self.config.eviction_threshold * self.config.max_hot_pages as f64)
    }

    /// evict the coldest pages until resident count reaches
    /// `target · maxHotPages`, or `limit` pages have been processed.
    pub async fn run_eviction(&self) -> Result<EvictionReport> {
        self.run(false, None).await
    }

    pub async fn run_eviction_dry(&self) -> Result<EvictionReport> {
        self.run(true, None).await
    }

    pub async fn run_eviction_limited(&self, limit: usize) -> Result<EvictionReport> {
        self.run(false, Some(limit)).await
    }

    async fn run(&self, dry_run: bool, limit: Option<usize>) -> Result<EvictionReport> {
        let resident = self.pages.resident_count().await?;
        let target = (self.config.eviction_target * self.config.max_hot_pages as f64) as usize;
        let to_evict = resident.saturating_sub(target).min(limit.unwrap_or(usize::MAX));

        if to_evict == 0 {
            return Ok(EvictionReport {
                evicted: Vec::new(),
                dry_run,
            });
        }

        let coldest = self.pages.resident_pages_by_age().await?;
        let mut evicted = Vec::new();

        for (key, _last_access) in coldest.into_iter().take(to_evict) {
            if dry_run {
                evicted.push(key);
                continue;
            }
            self.evict_one(&key).await?;
            evicted.push(key);
        }

        debug!(count = evicted.len(), "eviction run complete");
        Ok(EvictionReport { evicted, dry_run })
    }

    /// safe eviction of a single page: read, write-to-cold, retag, delete.
    async fn evict_one(&self, key: &str) -> Result<()> {
        let Some((blob_id, page_index)) = self.pages.page_meta(key).await? else {
            warn!(key, "page vanished before eviction could read it");
            return Ok(());
        };
        let Some(data) = self.pages.peek_data(key).await? else {
            warn!(key, "page vanished before eviction could read it");
            return Ok(());
        };

        let mut meta = ObjectMetadata::new();
        meta.insert("pageId".to_string(), key.to_string());
        meta.insert("blobId".to_string(), blob_id);
        meta.insert("pageIndex".to_string(), page_index.to_string());

        self.cold_bucket.put(key, data, meta).await?;
        // only after the bucket write has succeeded do we retag and drop the
        // embedded row — a crash here just leaves a duplicate in both places.
        self.pages.retag_cold(key).await?;
        self.pages.remove_row(key).await?;

        Ok(())
    }

    /// read a page back, transparently falling through to cold storage and
    /// retagging it resident retags it to `warm`").
    pub async fn read_through(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.pages.tier_of(key).await?.is_some() {
            return Ok(self.pages.read_pages("", std::slice::from_ref(&key.to_string())).await.ok());
        }

        let Some(obj) = self.cold_bucket.get(key).await? else {
            return Ok(None);
        };
        Ok(Some(obj.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBucket, MemoryRowStore};
    use std::sync::atomic::{AtomicI64, Ordering};

    fn pages_with_clock() -> (Arc<PageStore>, Arc<AtomicI64>) {
        let counter = Arc::new(AtomicI64::new(0));
        let c = counter.clone();
        let pages = Arc::new(PageStore::new(
            Arc::new(MemoryRowStore::new()),
            Arc::new(move || c.load(Ordering::SeqCst)),
        ));
        (pages, counter)
    }

    #[tokio::test]
    async fn test_should_evict_threshold() {
        let (pages, _c) = pages_with_clock();
        let config = EvictionConfig {
            max_hot_pages: 4,
            eviction_threshold: 0.75,
            eviction_target: 0.5,
        };
        let manager = EvictionManager::new(pages.clone(), Arc::new(MemoryBucket::new()), config);

        for i in 0..2 {
            pages.write_pages(&format!("blob-{i}"), b"x").await.unwrap();
        }
        assert!(!manager.should_evict().await.unwrap());

        for i in 2..3 {
            pages.write_pages(&format!("blob-{i}"), b"x").await.unwrap();
        }
        assert!(manager.should_evict().await.unwrap());
    }

    #[tokio::test]
    async fn test_safe_eviction_evicts_coldest_two_of_six() {
        let (pages, counter) = pages_with_clock();
        let config = EvictionConfig {
            max_hot_pages: 4,
            eviction_threshold: 0.75,
            eviction_target: 0.5,
        };
        let cold_bucket = Arc::new(MemoryBucket::new());
        let manager = EvictionManager::new(pages.clone(), cold_bucket.clone(), config);

        let mut all_keys = Vec::new();
        for i in 0..6 {
            counter.store(i, Ordering::SeqCst);
            let keys = pages.write_pages(&format!("blob-{i}"), b"payload").await.unwrap();
            all_keys.extend(keys);
        }

        let report = manager.run_eviction().await.unwrap();
        assert_eq!(report.evicted.len(), 2);
        // the two oldest (blob-0, blob-1) should be the ones evicted.
        assert!(report.evicted[0].contains("blob-0"));
        assert!(report.evicted[1].contains("blob-1"));

        for key in &report.evicted {
            assert!(cold_bucket.get(key).await.unwrap().is_some());
            assert_eq!(pages.tier_of(key).await.unwrap(), None);
        }
        for key in &all_keys[2..] {
            assert_eq!(pages.tier_of(key).await.unwrap(), Some(PageTier::Warm));
        }
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let (pages, counter) = pages_with_clock();
        let config = EvictionConfig {
            max_hot_pages: 4,
            eviction_threshold: 0.75,
            eviction_target: 0.5,
        };
        let cold_bucket = Arc::new(MemoryBucket::new());
        let manager = EvictionManager::new(pages.clone(), cold_bucket.clone(), config);

        let mut keys = Vec::new();
        for i in 0..6 {
            counter.store(i, Ordering::SeqCst);
            keys.extend(pages.write_pages(&format!("blob-{i}"), b"payload").await.unwrap());
        }

        let report = manager.run_eviction_dry().await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.evicted.len(), 2);
        for key in &keys {
            assert_eq!(pages.tier_of(key).await.unwrap(), Some(PageTier::Warm));
        }
    }

    #[tokio::test]
    async fn test_eviction_of_already_cold_page_is_noop() {
        let (pages, _c) = pages_with_clock();
        let config = EvictionConfig::default();
        let cold_bucket = Arc::new(MemoryBucket::new());
        let manager = EvictionManager::new(pages.clone(), cold_bucket, config);

        let keys = pages.write_pages("blob-x", b"content").await.unwrap();
        manager.evict_one(&keys[0]).await.unwrap();
        assert_eq!(pages.tier_of(&keys[0]).await.unwrap(), None);

        // page is gone from hot storage; a second physical eviction attempt
        // is simply a no-op since should_evict/run_eviction only considers
        // resident pages.
        assert_eq!(pages.resident_count().await.unwrap(), 0);
    }
}
