//! tiered blob engine: hot/warm/cold placement, migration, and
//! access tracking over a row store (hot) and bucket drivers (warm/cold).

pub mod compression;
pub mod eviction;
pub mod page;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::TieringConfig;
use crate::error::{Error, Result};
use crate::storage::{BucketDriver, ListOptions, ObjectMetadata, Row, RowStore, Value};

/// placement class for a blob or page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }

    pub fn from_str(s: &str) -> Option<Tier> {
        match s {
            "hot" => Some(Tier::Hot),
            "warm" => Some(Tier::Warm),
            "cold" => Some(Tier::Cold),
            _ => None,
        }
    }
}

/// envelope returned by every tier operation that may have migrated data.
#[derive(Debug, Clone)]
pub struct TierResult {
    pub tier: Tier,
    pub migrated: bool,
    pub previous_tier: Option<Tier>,
    pub data: Option<Vec<u8>>,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TierStats {
    pub count: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone)]
struct AccessRecord {
    tier: Tier,
    last_access: i64,
    access_count: u64,
    size: u64,
    created_at: i64,
}

/// row shape for the `tiered_access_metadata` table.
pub fn access_row(key: &str, tier: Tier, last_access: i64, access_count: u64, size: u64, created_at: i64) -> Row {
    let mut row = Row::new();
    row.insert("key".to_string(), Value::Text(key.to_string()));
    row.insert("tier".to_string(), Value::Text(tier.as_str().to_string()));
    row.insert("last_access".to_string(), Value::Integer(last_access));
    row.insert("access_count".to_string(), Value::Integer(access_count as i64));
    row.insert("size".to_string(), Value::Integer(size as i64));
    row.insert("created_at".to_string(), Value::Integer(created_at));
    row
}

fn row_to_access(row: &Row) -> Result<(String, AccessRecord)> {
    let missing = |col: &str| Error::Storage(format!("missing or invalid column {col} in tiered_access_metadata row"));
    let key = row.get("key").and_then(Value::as_str).ok_or_else(|| missing("key"))?.to_string();
    let tier_str = row.get("tier").and_then(Value::as_str).ok_or_else(|| missing("tier"))?;
    let tier = Tier::from_str(tier_str).ok_or_else(|| Error::Storage(format!("unknown tier: {tier_str}")))?;
    let last_access = row.get("last_access").and_then(Value::as_i64).ok_or_else(|| missing("last_access"))?;
    let access_count = row.get("access_count").and_then(Value::as_i64).ok_or_else(|| missing("access_count"))? as u64;
    let size = row.get("size").and_then(Value::as_i64).ok_or_else(|| missing("size"))? as u64;
    let created_at = row.get("created_at").and_then(Value::as_i64).ok_or_else(|| missing("created_at"))?;
    Ok((
        key,
        AccessRecord {
            tier,
            last_access,
            access_count,
            size,
            created_at,
        },
    ))
}

/// row shape for the `tier_blobs` table (hot-tier content, keyed by path).
fn blob_row(key: &str, data: &[u8]) -> Row {
    let mut row = Row::new();
    row.insert("key".to_string(), Value::Text(key.to_string()));
    row.insert("data".to_string(), Value::Blob(data.to_vec()));
    row
}

/// the tiered blob engine. `warm_bucket` and `cold_bucket` may be the same
/// physical bucket (aliasing); callers relying on that must still treat tier
/// metadata, not bucket identity, as authoritative. hot-tier content lives in
/// the `tier_blobs` table of the injected row store, and every path's
/// placement/access stats live in `tiered_access_metadata` — named apart from
/// `metadata::MetadataStore`'s own `files`/`blobs` tables so the two stores
/// can share one concrete `RowStore` without colliding.
pub struct TierEngine {
    row_store: Arc<dyn RowStore>,
    warm_bucket: Arc<dyn BucketDriver>,
    cold_bucket: Arc<dyn BucketDriver>,
    config: TieringConfig,
    clock: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl TierEngine {
    pub fn new(
        row_store: Arc<dyn RowStore>,
        warm_bucket: Arc<dyn BucketDriver>,
        cold_bucket: Arc<dyn BucketDriver>,
        config: TieringConfig,
        clock: Arc<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        TierEngine {
            row_store,
            warm_bucket,
            cold_bucket,
            config,
            clock,
        }
    }

    /// bucket aliasing means warm == cold sometimes; dedup physical writes.
    fn buckets_alias(&self) -> bool {
        Arc::ptr_eq(&self.warm_bucket, &self.cold_bucket)
    }

    fn bucket_for(&self, tier: Tier) -> &Arc<dyn BucketDriver> {
        match tier {
            Tier::Warm => &self.warm_bucket,
            Tier::Cold => &self.cold_bucket,
            Tier::Hot => unreachable!("hot tier has no bucket"),
        }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn choose_tier(&self, size: u64, requested: Option<Tier>) -> Tier {
        if let Some(t) = requested {
            return t;
        }
        if size <= self.config.hot_max_size {
            Tier::Hot
        } else {
            Tier::Warm
        }
    }

    fn metadata_for(&self, tier: Tier, now: i64, access_count: u64, created_at: i64) -> ObjectMetadata {
        let mut m = ObjectMetadata::new();
        m.insert("x-tier".to_string(), tier.as_str().to_string());
        m.insert("x-last-access".to_string(), now.to_string());
        m.insert("x-access-count".to_string(), access_count.to_string());
        m.insert("x-created-at".to_string(), created_at.to_string());
        m
    }

    async fn put_hot(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let row = blob_row(key, &data);
        self.row_store
            .execute(
                "INSERT INTO tier_blobs (key, data) VALUES (?, ?)",
                &[row["key"].clone(), row["data"].clone()],
            )
            .await?;
        Ok(())
    }

    async fn get_hot(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let rows = self
            .row_store
            .query("SELECT * FROM tier_blobs WHERE key = ?", &[Value::Text(key.to_string())])
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("data"))
            .and_then(Value::as_blob)
            .map(|b| b.to_vec()))
    }

    async fn delete_hot(&self, key: &str) -> Result<()> {
        self.row_store
            .execute("DELETE FROM tier_blobs WHERE key = ?", &[Value::Text(key.to_string())])
            .await?;
        Ok(())
    }

    async fn get_access(&self, key: &str) -> Result<Option<AccessRecord>> {
        let rows = self
            .row_store
            .query(
                "SELECT * FROM tiered_access_metadata WHERE key = ?",
                &[Value::Text(key.to_string())],
            )
            .await?;
        rows.first().map(|r| row_to_access(r).map(|(_, record)| record)).transpose()
    }

    async fn put_access(&self, key: &str, record: &AccessRecord) -> Result<()> {
        let row = access_row(
            key,
            record.tier,
            record.last_access,
            record.access_count,
            record.size,
            record.created_at,
        );
        const COLS: &[&str] = &["key", "tier", "last_access", "access_count", "size", "created_at"];
        let params: Vec<Value> = COLS.iter().map(|c| row[*c].clone()).collect();
        let sql = format!(
            "INSERT INTO tiered_access_metadata ({}) VALUES ({})",
            COLS.join(", "),
            vec!["?"; COLS.len()].join(", ")
        );
        self.row_store.execute(&sql, &params).await?;
        Ok(())
    }

    async fn delete_access(&self, key: &str) -> Result<()> {
        self.row_store
            .execute("DELETE FROM tiered_access_metadata WHERE key = ?", &[Value::Text(key.to_string())])
            .await?;
        Ok(())
    }

    async fn all_access(&self) -> Result<Vec<(String, AccessRecord)>> {
        let rows = self.row_store.query("SELECT * FROM tiered_access_metadata", &[]).await?;
        rows.iter().map(row_to_access).collect()
    }

    /// write fresh content at `path`, selecting a tier by size unless overridden.
    pub async fn put(&self, path: &str, data: Vec<u8>, requested: Option<Tier>) -> Result<TierResult> {
        let size = data.len() as u64;
        let tier = self.choose_tier(size, requested);
        let now = self.now();

        match tier {
            Tier::Hot => {
                self.put_hot(path, data).await?;
            }
            Tier::Warm | Tier::Cold => {
                let meta = self.metadata_for(tier, now, 0, now);
                self.bucket_for(tier).put(path, data, meta).await?;
            }
        }

        self.put_access(
            path,
            &AccessRecord {
                tier,
                last_access: now,
                access_count: 0,
                size,
                created_at: now,
            },
        )
        .await?;

        Ok(TierResult {
            tier,
            migrated: false,
            previous_tier: None,
            data: None,
            size,
        })
    }

    /// probe hot then warm then cold; on hit, bump access stats and consider
    /// promotion per policy.
    pub async fn get(&self, path: &str) -> Result<Option<TierResult>> {
        let Some(record) = self.get_access(path).await? else {
            return Ok(None);
        };
        let tier = record.tier;

        let data = match tier {
            Tier::Hot => self.get_hot(path).await?,
            Tier::Warm | Tier::Cold => self.bucket_for(tier).get(path).await?.map(|obj| obj.data),
        };

        let Some(data) = data else {
            return Ok(None);
        };

        let now = self.now();
        let access_count = record.access_count + 1;
        let age_days = (now - record.created_at) as f64 / 86_400_000.0;
        let created_at = record.created_at;
        let size = record.size;

        let should_promote = self.config.auto_promote
            && tier != Tier::Hot
            && (age_days < self.config.hot_max_age_days as f64
                || (access_count > 5 && age_days < self.config.warm_max_age_days as f64));

        if should_promote {
            let target = match tier {
                Tier::Cold => Tier::Warm,
                Tier::Warm => Tier::Hot,
                Tier::Hot => Tier::Hot,
            };
            self.migrate(path, data.clone(), tier, target, access_count, created_at, size)
                .await?;
            debug!(path, from = tier.as_str(), to = target.as_str(), "tier promotion");
            return Ok(Some(TierResult {
                tier: target,
                migrated: true,
                previous_tier: Some(tier),
                data: Some(data),
                size,
            }));
        }

        // not promoting: bump access stats, and for bucket tiers re-put with
        // refreshed metadata in place.
        self.put_access(
            path,
            &AccessRecord {
                tier,
                last_access: now,
                access_count,
                size,
                created_at,
            },
        )
        .await?;
        if tier != Tier::Hot {
            let meta = self.metadata_for(tier, now, access_count, created_at);
            self.bucket_for(tier).put(path, data.clone(), meta).await?;
        }

        Ok(Some(TierResult {
            tier,
            migrated: false,
            previous_tier: None,
            data: Some(data),
            size,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    async fn migrate(
        &self,
        path: &str,
        data: Vec<u8>,
        from: Tier,
        to: Tier,
        access_count: u64,
        created_at: i64,
        size: u64,
    ) -> Result<()> {
        let now = self.now();

        match to {
            Tier::Hot => {
                self.put_hot(path, data).await?;
            }
            Tier::Warm | Tier::Cold => {
                let meta = self.metadata_for(to, now, access_count, created_at);
                self.bucket_for(to).put(path, data, meta).await?;
            }
        }

        if from != Tier::Hot && (from != to || !self.buckets_alias()) {
            self.bucket_for(from).delete(path).await?;
        } else if from == Tier::Hot {
            self.delete_hot(path).await?;
        }

        self.put_access(
            path,
            &AccessRecord {
                tier: to,
                last_access: now,
                access_count,
                size,
                created_at,
            },
        )
        .await?;

        Ok(())
    }

    pub async fn get_range(&self, path: &str, start: u64, end: Option<u64>) -> Result<Option<Vec<u8>>> {
        let Some(record) = self.get_access(path).await? else {
            return Ok(None);
        };
        let tier = record.tier;

        let result = match tier {
            Tier::Hot => self.get_hot(path).await?.map(|data| {
                let start = start as usize;
                let end = end.map(|e| e as usize).unwrap_or(data.len()).min(data.len());
                data[start.min(end)..end].to_vec()
            }),
            Tier::Warm | Tier::Cold => self.bucket_for(tier).get_range(path, start, end).await?,
        };

        if result.is_some() {
            let now = self.now();
            self.put_access(
                path,
                &AccessRecord {
                    tier,
                    last_access: now,
                    access_count: record.access_count + 1,
                    size: record.size,
                    created_at: record.created_at,
                },
            )
            .await?;
        }

        Ok(result)
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get_access(path).await?.is_some())
    }

    pub async fn head(&self, path: &str) -> Result<Option<(Tier, u64)>> {
        Ok(self.get_access(path).await?.map(|r| (r.tier, r.size)))
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let Some(record) = self.get_access(path).await? else {
            return Ok(());
        };
        match record.tier {
            Tier::Hot => {
                self.delete_hot(path).await?;
            }
            Tier::Warm => {
                self.warm_bucket.delete(path).await?;
            }
            Tier::Cold => {
                self.cold_bucket.delete(path).await?;
            }
        }
        self.delete_access(path).await?;
        Ok(())
    }

    pub async fn delete_many(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            self.delete(path).await?;
        }
        Ok(())
    }

    /// manual migration; no-op if already at or past the target tier.
    pub async fn promote(&self, path: &str, target: Tier) -> Result<TierResult> {
        self.manual_migrate(path, target, true).await
    }

    pub async fn demote(&self, path: &str, target: Tier) -> Result<TierResult> {
        self.manual_migrate(path, target, false).await
    }

    async fn manual_migrate(&self, path: &str, target: Tier, promoting: bool) -> Result<TierResult> {
        let record = self
            .get_access(path)
            .await?
            .ok_or_else(|| Error::BlobNotFound(path.to_string()))?;
        let current = record.tier;

        let rank = |t: Tier| match t {
            Tier::Hot => 2,
            Tier::Warm => 1,
            Tier::Cold => 0,
        };

        let already_there = if promoting {
            rank(current) >= rank(target)
        } else {
            rank(current) <= rank(target)
        };

        if already_there {
            return Ok(TierResult {
                tier: current,
                migrated: false,
                previous_tier: None,
                data: None,
                size: record.size,
            });
        }

        let data = match current {
            Tier::Hot => self.get_hot(path).await?,
            Tier::Warm | Tier::Cold => self.bucket_for(current).get(path).await?.map(|o| o.data),
        }
        .ok_or_else(|| Error::BlobNotFound(path.to_string()))?;

        self.migrate(path, data.clone(), current, target, record.access_count, record.created_at, record.size)
            .await?;

        Ok(TierResult {
            tier: target,
            migrated: true,
            previous_tier: Some(current),
            data: Some(data),
            size: record.size,
        })
    }

    pub async fn get_stats(&self) -> Result<HashMap<Tier, TierStats>> {
        let mut stats: HashMap<Tier, TierStats> = HashMap::new();
        for (_, record) in self.all_access().await? {
            let entry = stats.entry(record.tier).or_default();
            entry.count += 1;
            entry.total_size += record.size;
        }
        Ok(stats)
    }

    pub async fn list_by_tier(&self, tier: Tier, options: ListOptions) -> Result<Vec<String>> {
        match tier {
            Tier::Hot => {
                let prefix = options.prefix.unwrap_or_default();
                let mut keys: Vec<String> = self
                    .all_access()
                    .await?
                    .into_iter()
                    .filter(|(_, r)| r.tier == Tier::Hot)
                    .map(|(k, _)| k)
                    .filter(|k| k.starts_with(&prefix))
                    .collect();
                keys.sort();
                if let Some(limit) = options.limit {
                    keys.truncate(limit);
                }
                Ok(keys)
            }
            Tier::Warm | Tier::Cold => {
                let result = self.bucket_for(tier).list(options).await?;
                Ok(result.objects.into_iter().map(|o| o.key).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBucket;
    use crate::storage::MemoryRowStore;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn clock(start: i64) -> (Arc<AtomicI64>, Arc<dyn Fn() -> i64 + Send + Sync>) {
        let counter = Arc::new(AtomicI64::new(start));
        let c = counter.clone();
        (counter, Arc::new(move || c.load(Ordering::SeqCst)))
    }

    fn engine_with_clock(config: TieringConfig) -> (TierEngine, Arc<AtomicI64>) {
        let (counter, clock) = clock(0);
        let engine = TierEngine::new(
            Arc::new(MemoryRowStore::new()),
            Arc::new(MemoryBucket::new()),
            Arc::new(MemoryBucket::new()),
            config,
            clock,
        );
        (engine, counter)
    }

    #[tokio::test]
    async fn test_small_write_goes_hot() {
        let (engine, _c) = engine_with_clock(TieringConfig::default());
        let result = engine.put("/a", vec![0u8; 10], None).await.unwrap();
        assert_eq!(result.tier, Tier::Hot);
    }

    #[tokio::test]
    async fn test_large_write_goes_warm() {
        let (engine, _c) = engine_with_clock(TieringConfig::default());
        let big = vec![0u8; 2 * 1024 * 1024];
        let result = engine.put("/big", big, None).await.unwrap();
        assert_eq!(result.tier, Tier::Warm);
    }

    #[tokio::test]
    async fn test_tier_promotion_after_six_accesses() {
        let mut config = TieringConfig::default();
        config.hot_max_age_days = 0; // force the access-count promotion path
        let (engine, counter) = engine_with_clock(config);

        engine.put("/f", b"content".to_vec(), Some(Tier::Warm)).await.unwrap();
        counter.store(1, Ordering::SeqCst); // age > 0 so the age branch doesn't also fire

        for i in 0..6 {
            let result = engine.get("/f").await.unwrap().unwrap();
            if i < 5 {
                assert_eq!(result.tier, Tier::Warm, "access {i}");
            } else {
                assert_eq!(result.tier, Tier::Hot, "access {i}");
                assert!(result.migrated);
                assert_eq!(result.previous_tier, Some(Tier::Warm));
            }
        }
    }

    #[tokio::test]
    async fn test_manual_promote_demote() {
        let (engine, _c) = engine_with_clock(TieringConfig::default());
        engine.put("/f", b"x".repeat(10), Some(Tier::Cold)).await.unwrap();

        let promoted = engine.promote("/f", Tier::Warm).await.unwrap();
        assert_eq!(promoted.tier, Tier::Warm);
        assert!(promoted.migrated);

        // already there: no-op
        let noop = engine.promote("/f", Tier::Warm).await.unwrap();
        assert!(!noop.migrated);

        let demoted = engine.demote("/f", Tier::Cold).await.unwrap();
        assert_eq!(demoted.tier, Tier::Cold);
        assert!(demoted.migrated);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_none() {
        let (engine, _c) = engine_with_clock(TieringConfig::default());
        engine.put("/f", b"x".to_vec(), None).await.unwrap();
        engine.delete("/f").await.unwrap();
        assert!(engine.get("/f").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_by_tier() {
        let (engine, _c) = engine_with_clock(TieringConfig::default());
        engine.put("/a", vec![0u8; 10], Some(Tier::Hot)).await.unwrap();
        engine.put("/b", vec![0u8; 20], Some(Tier::Warm)).await.unwrap();
        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats[&Tier::Hot].count, 1);
        assert_eq!(stats[&Tier::Warm].total_size, 20);
    }

    #[tokio::test]
    async fn test_aliased_bucket_probe_dedup() {
        let shared = Arc::new(MemoryBucket::new());
        let (_counter, clock) = clock(0);
        let engine = TierEngine::new(
            Arc::new(MemoryRowStore::new()),
            shared.clone(),
            shared,
            TieringConfig::default(),
            clock,
        );
        engine.put("/f", b"content".to_vec(), Some(Tier::Warm)).await.unwrap();
        let promoted = engine.promote("/f", Tier::Cold).await;
        assert!(promoted.is_ok());
    }

    #[tokio::test]
    async fn test_exists_and_delete_many() {
        let (engine, _c) = engine_with_clock(TieringConfig::default());
        engine.put("/a", b"x".to_vec(), None).await.unwrap();
        assert!(engine.exists("/a").await.unwrap());
        engine.delete_many(&["/a".to_string()]).await.unwrap();
        assert!(!engine.exists("/a").await.unwrap());
    }
}
