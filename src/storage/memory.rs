//! in-memory reference backends for the three external-storage traits. used by
//! this crate's own tests; integrators writing a real backend can diff against
//! these for expected semantics.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    BucketDriver, BucketObject, CasStorage, HeadResult, ListEntry, ListOptions, ListResult,
    ObjectMetadata, PutResult, Row, RowStore, Value,
};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct MemoryCasStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCasStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CasStorage for MemoryCasStorage {
    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(path).cloned())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }
}

struct StoredObject {
    data: Vec<u8>,
    custom_metadata: ObjectMetadata,
}

/// a single in-memory bucket. the tier engine may point several `BucketDriver`
/// handles at the same `MemoryBucket` (cloned `Arc`) to model bucket aliasing.
#[derive(Default)]
pub struct MemoryBucket {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BucketDriver for MemoryBucket {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        custom_metadata: ObjectMetadata,
    ) -> Result<PutResult> {
        let size = data.len() as u64;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                custom_metadata,
            },
        );
        Ok(PutResult {
            etag: format!("{:x}", size ^ 0x5bd1e995),
            size,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<BucketObject>> {
        Ok(self.objects.lock().unwrap().get(key).map(|obj| BucketObject {
            data: obj.data.clone(),
            custom_metadata: obj.custom_metadata.clone(),
        }))
    }

    async fn get_range(&self, key: &str, start: u64, end: Option<u64>) -> Result<Option<Vec<u8>>> {
        let objects = self.objects.lock().unwrap();
        let Some(obj) = objects.get(key) else {
            return Ok(None);
        };
        let start = start as usize;
        let end = end.map(|e| e as usize).unwrap_or(obj.data.len()).min(obj.data.len());
        if start > end {
            return Err(Error::RangeOutOfBounds {
                offset: start as u64,
                length: 0,
                size: obj.data.len() as u64,
            });
        }
        Ok(Some(obj.data[start..end].to_vec()))
    }

    async fn head(&self, key: &str) -> Result<Option<HeadResult>> {
        Ok(self.objects.lock().unwrap().get(key).map(|obj| HeadResult {
            custom_metadata: obj.custom_metadata.clone(),
            size: obj.data.len() as u64,
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, options: ListOptions) -> Result<ListResult> {
        let objects = self.objects.lock().unwrap();
        let mut keys: Vec<&String> = objects.keys().collect();
        keys.sort();

        let filtered: Vec<&String> = keys
            .into_iter()
            .filter(|k| {
                options
                    .prefix
                    .as_ref()
                    .map(|p| k.starts_with(p.as_str()))
                    .unwrap_or(true)
            })
            .collect();

        let start = options
            .cursor
            .as_ref()
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let limit = options.limit.unwrap_or(usize::MAX);

        let page: Vec<ListEntry> = filtered
            .iter()
            .skip(start)
            .take(limit)
            .map(|k| ListEntry {
                key: (**k).clone(),
                size: objects[k.as_str()].data.len() as u64,
            })
            .collect();

        let truncated = start + page.len() < filtered.len();
        let cursor = if truncated {
            Some((start + page.len()).to_string())
        } else {
            None
        };

        Ok(ListResult {
            objects: page,
            truncated,
            cursor,
        })
    }
}

/// a small SQL-shaped dialect this store actually interprets: `SELECT *
/// FROM <table> [WHERE <col> = ?]`, `INSERT INTO <table> (<cols>) VALUES
/// (?, ?, ...)`, `UPDATE <table> SET <col> = ?, ... WHERE <col> = ?`, and
/// `DELETE FROM <table> WHERE <col> = ?`. `INSERT` treats the first listed
/// column as the row's key and upserts on it, matching how every caller in
/// this crate lists an id/key column first.
fn parse_insert(sql: &str) -> Option<(&str, Vec<&str>)> {
    let rest = sql.strip_prefix("INSERT INTO ")?;
    let open = rest.find('(')?;
    let table = rest[..open].trim();
    let close = open + rest[open..].find(')')?;
    let cols: Vec<&str> = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if table.is_empty() || cols.is_empty() {
        return None;
    }
    Some((table, cols))
}

fn parse_update(sql: &str) -> Option<(&str, Vec<&str>, &str)> {
    let rest = sql.strip_prefix("UPDATE ")?;
    let set_idx = rest.find(" SET ")?;
    let table = rest[..set_idx].trim();
    let after_set = &rest[set_idx + 5..];
    let where_idx = after_set.find(" WHERE ")?;
    let cols: Vec<&str> = after_set[..where_idx]
        .split(',')
        .map(|assign| assign.split('=').next().unwrap_or("").trim())
        .filter(|c| !c.is_empty())
        .collect();
    let key_col = after_set[where_idx + 7..].split('=').next()?.trim();
    if table.is_empty() || cols.is_empty() || key_col.is_empty() {
        return None;
    }
    Some((table, cols, key_col))
}

fn parse_delete(sql: &str) -> Option<(&str, &str)> {
    let rest = sql.strip_prefix("DELETE FROM ")?;
    let where_idx = rest.find(" WHERE ")?;
    let table = rest[..where_idx].trim();
    let key_col = rest[where_idx + 7..].split('=').next()?.trim();
    if table.is_empty() || key_col.is_empty() {
        return None;
    }
    Some((table, key_col))
}

fn parse_select(sql: &str) -> Option<(&str, Option<&str>)> {
    let rest = sql.strip_prefix("SELECT * FROM ")?;
    match rest.find(" WHERE ") {
        Some(where_idx) => {
            let table = rest[..where_idx].trim();
            let key_col = rest[where_idx + 7..].split('=').next()?.trim();
            if table.is_empty() || key_col.is_empty() {
                return None;
            }
            Some((table, Some(key_col)))
        }
        None => {
            let table = rest.trim();
            if table.is_empty() {
                return None;
            }
            Some((table, None))
        }
    }
}

/// a minimal in-memory row store. tables are keyed by name and interpret the
/// dialect above; `table`/`insert_row`/`replace_table`/`delete_where` remain
/// as a direct, SQL-free escape hatch for tests and integrators who want table
/// semantics without building statement text.
#[derive(Default)]
pub struct MemoryRowStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    savepoints: Mutex<HashMap<String, HashMap<String, Vec<Row>>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// direct access for callers that want table semantics without going
    /// through SQL text (used by tests).
    pub fn table(&self, name: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn insert_row(&self, table: &str, row: Row) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn replace_table(&self, table: &str, rows: Vec<Row>) {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
    }

    pub fn delete_where(&self, table: &str, predicate: impl Fn(&Row) -> bool) -> u64 {
        let mut tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get_mut(table) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|r| !predicate(r));
        (before - rows.len()) as u64
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let trimmed = sql.trim();
        let (table, where_col) =
            parse_select(trimmed).ok_or_else(|| Error::Storage(format!("unsupported query: {sql}")))?;
        let rows = self.table(table);
        match where_col {
            Some(col) => {
                let value = params
                    .first()
                    .ok_or_else(|| Error::Storage(format!("missing WHERE parameter for: {sql}")))?;
                Ok(rows.into_iter().filter(|r| r.get(col) == Some(value)).collect())
            }
            None => Ok(rows),
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let trimmed = sql.trim();

        if let Some((table, cols)) = parse_insert(trimmed) {
            if cols.len() != params.len() {
                return Err(Error::Storage(format!(
                    "column/parameter count mismatch for: {sql}"
                )));
            }
            let key_col = cols[0];
            let key_value = params[0].clone();
            let mut row = Row::new();
            for (col, value) in cols.iter().zip(params.iter()) {
                row.insert((*col).to_string(), value.clone());
            }
            let mut tables = self.tables.lock().unwrap();
            let rows = tables.entry(table.to_string()).or_default();
            match rows.iter_mut().find(|r| r.get(key_col) == Some(&key_value)) {
                Some(existing) => *existing = row,
                None => rows.push(row),
            }
            return Ok(1);
        }

        if let Some((table, cols, key_col)) = parse_update(trimmed) {
            if params.len() != cols.len() + 1 {
                return Err(Error::Storage(format!(
                    "column/parameter count mismatch for: {sql}"
                )));
            }
            let key_value = &params[cols.len()];
            let mut tables = self.tables.lock().unwrap();
            let Some(rows) = tables.get_mut(table) else {
                return Ok(0);
            };
            let mut affected = 0u64;
            for row in rows.iter_mut() {
                if row.get(key_col) == Some(key_value) {
                    for (col, value) in cols.iter().zip(params.iter()) {
                        row.insert((*col).to_string(), value.clone());
                    }
                    affected += 1;
                }
            }
            return Ok(affected);
        }

        if let Some((table, key_col)) = parse_delete(trimmed) {
            let key_value = params
                .first()
                .ok_or_else(|| Error::Storage(format!("missing WHERE parameter for: {sql}")))?;
            let mut tables = self.tables.lock().unwrap();
            let Some(rows) = tables.get_mut(table) else {
                return Ok(0);
            };
            let before = rows.len();
            rows.retain(|r| r.get(key_col) != Some(key_value));
            return Ok((before - rows.len()) as u64);
        }

        if trimmed.starts_with("PRAGMA ") {
            return Ok(0);
        }

        Err(Error::Storage(format!("unsupported statement: {sql}")))
    }

    async fn savepoint(&self, name: &str) -> Result<()> {
        let snapshot = self.tables.lock().unwrap().clone();
        self.savepoints
            .lock()
            .unwrap()
            .insert(name.to_string(), snapshot);
        Ok(())
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        self.savepoints.lock().unwrap().remove(name);
        Ok(())
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        if let Some(snapshot) = self.savepoints.lock().unwrap().remove(name) {
            *self.tables.lock().unwrap() = snapshot;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cas_storage_roundtrip() {
        let storage = MemoryCasStorage::new();
        storage.write("objects/ab/cd", b"hello".to_vec()).await.unwrap();
        assert!(storage.exists("objects/ab/cd").await.unwrap());
        assert_eq!(
            storage.get("objects/ab/cd").await.unwrap(),
            Some(b"hello".to_vec())
        );
        storage.delete("objects/ab/cd").await.unwrap();
        assert!(!storage.exists("objects/ab/cd").await.unwrap());
    }

    #[tokio::test]
    async fn test_cas_delete_missing_is_noop() {
        let storage = MemoryCasStorage::new();
        storage.delete("objects/missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_bucket_put_get_head() {
        let bucket = MemoryBucket::new();
        let mut meta = ObjectMetadata::new();
        meta.insert("x-tier".to_string(), "warm".to_string());

        bucket.put("k1", b"payload".to_vec(), meta.clone()).await.unwrap();

        let got = bucket.get("k1").await.unwrap().unwrap();
        assert_eq!(got.data, b"payload");
        assert_eq!(got.custom_metadata, meta);

        let head = bucket.head("k1").await.unwrap().unwrap();
        assert_eq!(head.size, 7);
    }

    #[tokio::test]
    async fn test_bucket_range() {
        let bucket = MemoryBucket::new();
        bucket.put("k1", b"0123456789".to_vec(), ObjectMetadata::new()).await.unwrap();
        let range = bucket.get_range("k1", 2, Some(5)).await.unwrap().unwrap();
        assert_eq!(range, b"234");
    }

    #[tokio::test]
    async fn test_bucket_list_prefix_and_cursor() {
        let bucket = MemoryBucket::new();
        for i in 0..5 {
            bucket
                .put(&format!("p/{i}"), vec![0u8; i], ObjectMetadata::new())
                .await
                .unwrap();
        }
        bucket.put("other", vec![], ObjectMetadata::new()).await.unwrap();

        let result = bucket
            .list(ListOptions {
                prefix: Some("p/".to_string()),
                limit: Some(2),
                cursor: None,
            })
            .await
            .unwrap();
        assert_eq!(result.objects.len(), 2);
        assert!(result.truncated);

        let next = bucket
            .list(ListOptions {
                prefix: Some("p/".to_string()),
                limit: Some(10),
                cursor: result.cursor,
            })
            .await
            .unwrap();
        assert_eq!(next.objects.len(), 3);
        assert!(!next.truncated);
    }

    #[tokio::test]
    async fn test_row_store_savepoint_rollback() {
        let store = MemoryRowStore::new();
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Integer(1));
        store.insert_row("files", row);

        store.savepoint("sp_1").await.unwrap();
        let mut row2 = Row::new();
        row2.insert("id".to_string(), Value::Integer(2));
        store.insert_row("files", row2);
        assert_eq!(store.table("files").len(), 2);

        store.rollback_to_savepoint("sp_1").await.unwrap();
        assert_eq!(store.table("files").len(), 1);
    }
}
