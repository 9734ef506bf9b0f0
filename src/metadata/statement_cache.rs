//! bounded LRU over prepared SQL statements, with a
//! dialect-specific finalize hook run on eviction.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

/// a prepared statement handle. opaque beyond the SQL text it was prepared
/// from — the concrete backend's driver owns whatever native handle this
/// wraps in a real deployment.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub sql: String,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub created: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// bounded LRU keyed by SQL text. evicting an entry invokes `finalize` so the
/// dialect-specific backend can release its native prepared-statement handle.
pub struct PreparedStatementCache {
    entries: Mutex<LruCache<String, Arc<PreparedStatement>>>,
    stats: Mutex<CacheStats>,
    finalize: Box<dyn Fn(&PreparedStatement) + Send + Sync>,
}

impl PreparedStatementCache {
    pub fn new(capacity: usize, finalize: impl Fn(&PreparedStatement) + Send + Sync + 'static) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        PreparedStatementCache {
            entries: Mutex::new(LruCache::new(cap)),
            stats: Mutex::new(CacheStats::default()),
            finalize: Box::new(finalize),
        }
    }

    /// fetch a cached prepared statement for `sql`, or prepare (and cache) a
    /// fresh one, evicting the least-recently-used entry if at capacity.
    pub fn get_or_prepare(&self, sql: &str) -> Arc<PreparedStatement> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(stmt) = entries.get(sql) {
            self.stats.lock().unwrap().hits += 1;
            return stmt.clone();
        }

        self.stats.lock().unwrap().misses += 1;
        let stmt = Arc::new(PreparedStatement { sql: sql.to_string() });
        self.stats.lock().unwrap().created += 1;

        if entries.len() == entries.cap().get() && !entries.contains(sql) {
            if let Some((_, evicted)) = entries.pop_lru() {
                (self.finalize)(&evicted);
                self.stats.lock().unwrap().evictions += 1;
            }
        }

        entries.put(sql.to_string(), stmt.clone());
        stmt
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().unwrap().cap().get()
    }
}
