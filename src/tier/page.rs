//! 2 MiB page chunking for large blobs in the hot tier.
//!
//! the billing model underneath the embedded row store charges per row
//! operation regardless of payload size up to its page cap, so a large blob
//! kept hot is split into contiguous chunks and written as one row per chunk
//! rather than paying for a single oversized row.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::{Row, RowStore, Value};

/// page size cap.
pub const PAGE_SIZE: usize = 2 * 1024 * 1024;

/// placement of a page row: `warm` while resident in the embedded store,
/// `cold` once evicted to the external bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTier {
    Warm,
    Cold,
}

impl PageTier {
    pub fn as_str(self) -> &'static str {
        match self {
            PageTier::Warm => "warm",
            PageTier::Cold => "cold",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "warm" => Some(PageTier::Warm),
            "cold" => Some(PageTier::Cold),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct PageRow {
    blob_id: String,
    page_index: u64,
    data: Vec<u8>,
    tier: PageTier,
    last_access_at: i64,
    access_count: u64,
}

const PAGE_COLUMNS: &[&str] = &[
    "key",
    "blob_id",
    "page_index",
    "data",
    "tier",
    "last_access_at",
    "access_count",
];

fn page_to_row(key: &str, page: &PageRow) -> Row {
    let mut row = Row::new();
    row.insert("key".to_string(), Value::Text(key.to_string()));
    row.insert("blob_id".to_string(), Value::Text(page.blob_id.clone()));
    row.insert("page_index".to_string(), Value::Integer(page.page_index as i64));
    row.insert("data".to_string(), Value::Blob(page.data.clone()));
    row.insert("tier".to_string(), Value::Text(page.tier.as_str().to_string()));
    row.insert("last_access_at".to_string(), Value::Integer(page.last_access_at));
    row.insert("access_count".to_string(), Value::Integer(page.access_count as i64));
    row
}

fn row_to_page(row: &Row) -> Result<(String, PageRow)> {
    let missing = |col: &str| Error::Storage(format!("missing or invalid column {col} in page_metadata row"));
    let key = row.get("key").and_then(Value::as_str).ok_or_else(|| missing("key"))?.to_string();
    let blob_id = row.get("blob_id").and_then(Value::as_str).ok_or_else(|| missing("blob_id"))?.to_string();
    let page_index = row.get("page_index").and_then(Value::as_i64).ok_or_else(|| missing("page_index"))? as u64;
    let data = row.get("data").and_then(Value::as_blob).ok_or_else(|| missing("data"))?.to_vec();
    let tier_str = row.get("tier").and_then(Value::as_str).ok_or_else(|| missing("tier"))?;
    let tier = PageTier::from_str(tier_str).ok_or_else(|| Error::Storage(format!("unknown page tier: {tier_str}")))?;
    let last_access_at = row.get("last_access_at").and_then(Value::as_i64).ok_or_else(|| missing("last_access_at"))?;
    let access_count = row.get("access_count").and_then(Value::as_i64).ok_or_else(|| missing("access_count"))? as u64;

    Ok((
        key,
        PageRow {
            blob_id,
            page_index,
            data,
            tier,
            last_access_at,
            access_count,
        },
    ))
}

/// `__page__<blob_id>:<chunk_index>`.
pub fn page_key(blob_id: &str, chunk_index: u64) -> String {
    format!("__page__{blob_id}:{chunk_index}")
}

/// a blob's pages live in the `page_metadata` table of the injected row
/// store, one row per chunk. warm pages carry their bytes in the `data`
/// column; eviction retags a row `cold` and then deletes it, handing the
/// bytes to the cold bucket in between (see [`crate::tier::eviction`]).
pub struct PageStore {
    row_store: Arc<dyn RowStore>,
    clock: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl PageStore {
    pub fn new(row_store: Arc<dyn RowStore>, clock: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        PageStore { row_store, clock }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    async fn get_page(&self, key: &str) -> Result<Option<PageRow>> {
        let rows = self
            .row_store
            .query("SELECT * FROM page_metadata WHERE key = ?", &[Value::Text(key.to_string())])
            .await?;
        rows.first().map(|r| row_to_page(r).map(|(_, page)| page)).transpose()
    }

    async fn put_page(&self, key: &str, page: &PageRow) -> Result<()> {
        let row = page_to_row(key, page);
        let params: Vec<Value> = PAGE_COLUMNS.iter().map(|c| row[*c].clone()).collect();
        let sql = format!(
            "INSERT INTO page_metadata ({}) VALUES ({})",
            PAGE_COLUMNS.join(", "),
            vec!["?"; PAGE_COLUMNS.len()].join(", ")
        );
        self.row_store.execute(&sql, &params).await?;
        Ok(())
    }

    async fn delete_page(&self, key: &str) -> Result<()> {
        self.row_store
            .execute("DELETE FROM page_metadata WHERE key = ?", &[Value::Text(key.to_string())])
            .await?;
        Ok(())
    }

    async fn all_pages(&self) -> Result<Vec<(String, PageRow)>> {
        let rows = self.row_store.query("SELECT * FROM page_metadata", &[]).await?;
        rows.iter().map(row_to_page).collect()
    }

    /// split `data` into contiguous ≤ [`PAGE_SIZE`] chunks, writing each as a
    /// distinct row; returns the ordered page keys.
    pub async fn write_pages(&self, blob_id: &str, data: &[u8]) -> Result<Vec<String>> {
        let now = self.now();

        if data.is_empty() {
            // a zero-length blob still gets one (empty) page so its key list
            // is never spuriously absent.
            let key = page_key(blob_id, 0);
            self.put_page(
                &key,
                &PageRow {
                    blob_id: blob_id.to_string(),
                    page_index: 0,
                    data: Vec::new(),
                    tier: PageTier::Warm,
                    last_access_at: now,
                    access_count: 0,
                },
            )
            .await?;
            return Ok(vec![key]);
        }

        let mut keys = Vec::new();
        for (index, chunk) in data.chunks(PAGE_SIZE).enumerate() {
            let key = page_key(blob_id, index as u64);
            self.put_page(
                &key,
                &PageRow {
                    blob_id: blob_id.to_string(),
                    page_index: index as u64,
                    data: chunk.to_vec(),
                    tier: PageTier::Warm,
                    last_access_at: now,
                    access_count: 0,
                },
            )
            .await?;
            keys.push(key);
        }

        Ok(keys)
    }

    async fn touch(&self, key: &str) -> Result<()> {
        let now = self.now();
        if let Some(mut page) = self.get_page(key).await? {
            page.access_count += 1;
            page.last_access_at = now;
            // loading a page back retags it resident.
            page.tier = PageTier::Warm;
            self.put_page(key, &page).await?;
        }
        Ok(())
    }

    async fn page_size(&self, key: &str) -> Result<Option<usize>> {
        Ok(self.get_page(key).await?.map(|p| p.data.len()))
    }

    async fn page_data(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_page(key).await?.map(|p| p.data))
    }

    /// read every page in `keys`, in order, and concatenate.
    pub async fn read_pages(&self, _blob_id: &str, keys: &[String]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for key in keys {
            let data = self
                .page_data(key)
                .await?
                .ok_or_else(|| Error::MissingPageChunk(key.clone()))?;
            self.touch(key).await?;
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    /// total size of a blob, recovered by summing its page sizes.
    pub async fn blob_size(&self, keys: &[String]) -> Result<u64> {
        let mut total = 0u64;
        for key in keys {
            if let Some(size) = self.page_size(key).await? {
                total += size as u64;
            }
        }
        Ok(total)
    }

    /// read only the chunks covering `[offset, offset+length)`.
    pub async fn read_range(
        &self,
        blob_id: &str,
        keys: &[String],
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        let total = self.blob_size(keys).await?;
        if length == 0 {
            if offset > total {
                return Err(Error::RangeOutOfBounds {
                    offset,
                    length,
                    size: total,
                });
            }
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(length);
        if offset >= total || end > total {
            return Err(Error::RangeOutOfBounds {
                offset,
                length,
                size: total,
            });
        }

        let mut out = Vec::with_capacity(length as usize);
        let mut cursor: u64 = 0;
        for key in keys {
            let Some(size) = self.page_size(key).await? else {
                return Err(Error::MissingPageChunk(key.clone()));
            };
            let page_start = cursor;
            let page_end = cursor + size as u64;
            cursor = page_end;

            if page_end <= offset || page_start >= end {
                continue;
            }

            let data = self
                .page_data(key)
                .await?
                .ok_or_else(|| Error::MissingPageChunk(key.clone()))?;
            self.touch(key).await?;

            let slice_start = offset.saturating_sub(page_start) as usize;
            let slice_end = (end.min(page_end) - page_start) as usize;
            out.extend_from_slice(&data[slice_start..slice_end]);
        }

        let _ = blob_id;
        Ok(out)
    }

    /// read-modify-write: only chunks touched by `[offset, offset+data.len())`
    /// are written back.
    pub async fn update_range(
        &self,
        _blob_id: &str,
        keys: &[String],
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset + data.len() as u64;
        let mut cursor: u64 = 0;

        for key in keys {
            let Some(size) = self.page_size(key).await? else {
                return Err(Error::MissingPageChunk(key.clone()));
            };
            let page_start = cursor;
            let page_end = cursor + size as u64;
            cursor = page_end;

            if page_end <= offset || page_start >= end {
                continue;
            }

            let mut page = self.get_page(key).await?.expect("page row present");
            let write_start = offset.saturating_sub(page_start) as usize;
            let write_len = (end.min(page_end) - page_start.max(offset)) as usize;
            let src_start = page_start.saturating_sub(offset) as usize;
            page.data[write_start..write_start + write_len]
                .copy_from_slice(&data[src_start..src_start + write_len]);
            page.last_access_at = self.now();
            self.put_page(key, &page).await?;
        }

        Ok(())
    }

    pub async fn delete_pages(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete_page(key).await?;
        }
        Ok(())
    }

    /// pages currently resident (tier = warm), oldest-accessed first. used by
    /// the eviction manager.
    pub(crate) async fn resident_pages_by_age(&self) -> Result<Vec<(String, i64)>> {
        let mut resident: Vec<(String, i64)> = self
            .all_pages()
            .await?
            .into_iter()
            .filter(|(_, p)| p.tier == PageTier::Warm)
            .map(|(k, p)| (k, p.last_access_at))
            .collect();
        resident.sort_by_key(|(_, last_access)| *last_access);
        Ok(resident)
    }

    pub(crate) async fn resident_count(&self) -> Result<usize> {
        Ok(self
            .all_pages()
            .await?
            .into_iter()
            .filter(|(_, p)| p.tier == PageTier::Warm)
            .count())
    }

    pub(crate) async fn page_meta(&self, key: &str) -> Result<Option<(String, u64)>> {
        Ok(self.get_page(key).await?.map(|p| (p.blob_id, p.page_index)))
    }

    /// non-destructive read of a resident page's bytes, for the eviction
    /// manager's read-then-write-then-delete sequence.
    pub(crate) async fn peek_data(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.page_data(key).await
    }

    pub(crate) async fn retag_cold(&self, key: &str) -> Result<()> {
        if let Some(mut page) = self.get_page(key).await? {
            page.tier = PageTier::Cold;
            self.put_page(key, &page).await?;
        }
        Ok(())
    }

    pub(crate) async fn remove_row(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.page_data(key).await?;
        self.delete_page(key).await?;
        Ok(data)
    }

    pub async fn tier_of(&self, key: &str) -> Result<Option<PageTier>> {
        Ok(self.get_page(key).await?.map(|p| p.tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRowStore;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn store() -> PageStore {
        let counter = Arc::new(AtomicI64::new(0));
        PageStore::new(
            Arc::new(MemoryRowStore::new()),
            Arc::new(move || counter.load(Ordering::SeqCst)),
        )
    }

    #[tokio::test]
    async fn test_write_read_roundtrip_single_page() {
        let store = store();
        let data = b"small content".to_vec();
        let keys = store.write_pages("blob-a", &data).await.unwrap();
        assert_eq!(keys.len(), 1);
        let read_back = store.read_pages("blob-a", &keys).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_write_splits_into_multiple_pages() {
        let store = store();
        let data = vec![7u8; PAGE_SIZE * 2 + 100];
        let keys = store.write_pages("blob-b", &data).await.unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(store.blob_size(&keys).await.unwrap(), data.len() as u64);
        let read_back = store.read_pages("blob-b", &keys).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_range_covering_whole_blob_equals_full_blob() {
        let store = store();
        let data = vec![3u8; PAGE_SIZE + 50];
        let keys = store.write_pages("blob-c", &data).await.unwrap();
        let range = store
            .read_range("blob-c", &keys, 0, data.len() as u64)
            .await
            .unwrap();
        assert_eq!(range, data);
    }

    #[tokio::test]
    async fn test_range_within_single_page() {
        let store = store();
        let mut data = vec![0u8; PAGE_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let keys = store.write_pages("blob-d", &data).await.unwrap();
        let range = store.read_range("blob-d", &keys, 10, 20).await.unwrap();
        assert_eq!(range, data[10..30]);
    }

    #[tokio::test]
    async fn test_range_spanning_two_pages() {
        let store = store();
        let mut data = vec![0u8; PAGE_SIZE * 2];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        let keys = store.write_pages("blob-e", &data).await.unwrap();
        let start = PAGE_SIZE - 5;
        let len = 20;
        let range = store
            .read_range("blob-e", &keys, start as u64, len as u64)
            .await
            .unwrap();
        assert_eq!(range, data[start..start + len]);
    }

    #[tokio::test]
    async fn test_range_zero_length_is_empty() {
        let store = store();
        let keys = store.write_pages("blob-f", b"content").await.unwrap();
        let range = store.read_range("blob-f", &keys, 0, 0).await.unwrap();
        assert!(range.is_empty());
    }

    #[tokio::test]
    async fn test_range_out_of_bounds_rejected() {
        let store = store();
        let keys = store.write_pages("blob-g", b"short").await.unwrap();
        assert!(matches!(
            store.read_range("blob-g", &keys, 0, 100).await,
            Err(Error::RangeOutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_range_writes_back_only_touched_chunks() {
        let store = store();
        let data = vec![0u8; PAGE_SIZE * 2];
        let keys = store.write_pages("blob-h", &data).await.unwrap();

        let patch = vec![9u8; 10];
        store
            .update_range("blob-h", &keys, PAGE_SIZE as u64 - 5, &patch)
            .await
            .unwrap();

        let read_back = store.read_pages("blob-h", &keys).await.unwrap();
        assert_eq!(&read_back[PAGE_SIZE - 5..PAGE_SIZE + 5], &patch[..]);
        assert_eq!(read_back[0], 0);
    }

    #[tokio::test]
    async fn test_delete_pages() {
        let store = store();
        let keys = store.write_pages("blob-i", b"bye").await.unwrap();
        store.delete_pages(&keys).await.unwrap();
        assert!(matches!(
            store.read_pages("blob-i", &keys).await,
            Err(Error::MissingPageChunk(_))
        ));
    }
}
