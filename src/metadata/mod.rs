//! relational metadata model mapping POSIX paths to content-addressed blobs
//!: entries, blobs, page metadata, and access-tracking rows, plus
//! the prepared-statement cache that fronts them.

pub mod statement_cache;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::storage::{Row, RowStore, Value};
use crate::tier::Tier;
use crate::util::{normalize_path, split_path};

/// current schema version this store writes; bumped by [`MetadataStore::migrate`].
pub const SCHEMA_VERSION: u32 = 1;

/// column order `create_entry`/`update_entry` bind `files` rows against.
const ENTRY_COLUMNS: &[&str] = &[
    "id",
    "path",
    "name",
    "parent_id",
    "entry_type",
    "mode",
    "uid",
    "gid",
    "size",
    "blob_id",
    "link_target",
    "nlink",
    "atime",
    "mtime",
    "ctime",
    "birthtime",
];

/// `blobs` columns `register_blob` binds against, in order.
const BLOB_COLUMNS: &[&str] = &["id", "size", "tier", "checksum", "ref_count", "created_at"];

/// entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::File => "file",
            EntryType::Directory => "directory",
            EntryType::Symlink => "symlink",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(EntryType::File),
            "directory" => Ok(EntryType::Directory),
            "symlink" => Ok(EntryType::Symlink),
            other => Err(Error::Storage(format!("unknown entry_type: {other}"))),
        }
    }
}

/// a `files` row.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: u64,
    pub path: String,
    pub name: String,
    pub parent_id: Option<u64>,
    pub entry_type: EntryType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blob_id: Option<String>,
    pub link_target: Option<String>,
    pub nlink: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
}

/// fields a caller may update via [`MetadataStore::update_entry`]; `None`
/// leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub size: Option<u64>,
    pub blob_id: Option<Option<String>>,
    pub link_target: Option<Option<String>>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub nlink: Option<u32>,
    pub atime: Option<i64>,
    pub mtime: Option<i64>,
    pub ctime: Option<i64>,
}

fn apply_patch(entry: &mut Entry, patch: &EntryPatch) {
    if let Some(size) = patch.size {
        entry.size = size;
    }
    if let Some(blob_id) = patch.blob_id.clone() {
        entry.blob_id = blob_id;
    }
    if let Some(link_target) = patch.link_target.clone() {
        entry.link_target = link_target;
    }
    if let Some(mode) = patch.mode {
        entry.mode = mode;
    }
    if let Some(uid) = patch.uid {
        entry.uid = uid;
    }
    if let Some(gid) = patch.gid {
        entry.gid = gid;
    }
    if let Some(nlink) = patch.nlink {
        entry.nlink = nlink;
    }
    if let Some(atime) = patch.atime {
        entry.atime = atime;
    }
    if let Some(mtime) = patch.mtime {
        entry.mtime = mtime;
    }
    if let Some(ctime) = patch.ctime {
        entry.ctime = ctime;
    }
}

/// parameters for [`MetadataStore::create_entry`].
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub path: String,
    pub entry_type: EntryType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blob_id: Option<String>,
    pub link_target: Option<String>,
}

/// a `blobs` row.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    pub id: String,
    pub size: u64,
    pub tier: Tier,
    pub checksum: String,
    pub ref_count: u64,
    pub created_at: i64,
}

fn entry_to_row(e: &Entry) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), Value::Integer(e.id as i64));
    row.insert("path".to_string(), Value::Text(e.path.clone()));
    row.insert("name".to_string(), Value::Text(e.name.clone()));
    row.insert(
        "parent_id".to_string(),
        e.parent_id.map(|p| Value::Integer(p as i64)).unwrap_or(Value::Null),
    );
    row.insert("entry_type".to_string(), Value::Text(e.entry_type.as_str().to_string()));
    row.insert("mode".to_string(), Value::Integer(e.mode as i64));
    row.insert("uid".to_string(), Value::Integer(e.uid as i64));
    row.insert("gid".to_string(), Value::Integer(e.gid as i64));
    row.insert("size".to_string(), Value::Integer(e.size as i64));
    row.insert(
        "blob_id".to_string(),
        e.blob_id.clone().map(Value::Text).unwrap_or(Value::Null),
    );
    row.insert(
        "link_target".to_string(),
        e.link_target.clone().map(Value::Text).unwrap_or(Value::Null),
    );
    row.insert("nlink".to_string(), Value::Integer(e.nlink as i64));
    row.insert("atime".to_string(), Value::Integer(e.atime));
    row.insert("mtime".to_string(), Value::Integer(e.mtime));
    row.insert("ctime".to_string(), Value::Integer(e.ctime));
    row.insert("birthtime".to_string(), Value::Integer(e.birthtime));
    row
}

fn row_to_entry(row: &Row) -> Result<Entry> {
    let missing = |col: &str| Error::Storage(format!("missing or invalid column {col} in files row"));
    let get_i64 = |col: &str| row.get(col).and_then(Value::as_i64).ok_or_else(|| missing(col));
    let get_str = |col: &str| {
        row.get(col)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| missing(col))
    };

    let parent_id = match row.get("parent_id") {
        Some(Value::Integer(p)) => Some(*p as u64),
        _ => None,
    };
    let blob_id = match row.get("blob_id") {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    };
    let link_target = match row.get("link_target") {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    };

    Ok(Entry {
        id: get_i64("id")? as u64,
        path: get_str("path")?,
        name: get_str("name")?,
        parent_id,
        entry_type: EntryType::from_str(&get_str("entry_type")?)?,
        mode: get_i64("mode")? as u32,
        uid: get_i64("uid")? as u32,
        gid: get_i64("gid")? as u32,
        size: get_i64("size")? as u64,
        blob_id,
        link_target,
        nlink: get_i64("nlink")? as u32,
        atime: get_i64("atime")?,
        mtime: get_i64("mtime")?,
        ctime: get_i64("ctime")?,
        birthtime: get_i64("birthtime")?,
    })
}

fn blob_to_row(b: &BlobRecord) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), Value::Text(b.id.clone()));
    row.insert("size".to_string(), Value::Integer(b.size as i64));
    row.insert("tier".to_string(), Value::Text(b.tier.as_str().to_string()));
    row.insert("checksum".to_string(), Value::Text(b.checksum.clone()));
    row.insert("ref_count".to_string(), Value::Integer(b.ref_count as i64));
    row.insert("created_at".to_string(), Value::Integer(b.created_at));
    row
}

fn row_to_blob(row: &Row) -> Result<BlobRecord> {
    let missing = |col: &str| Error::Storage(format!("missing or invalid column {col} in blobs row"));
    let get_i64 = |col: &str| row.get(col).and_then(Value::as_i64).ok_or_else(|| missing(col));
    let get_str = |col: &str| {
        row.get(col)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| missing(col))
    };

    let tier_str = get_str("tier")?;
    let tier = Tier::from_str(&tier_str).ok_or_else(|| Error::Storage(format!("unknown tier: {tier_str}")))?;

    Ok(BlobRecord {
        id: get_str("id")?,
        size: get_i64("size")? as u64,
        tier,
        checksum: get_str("checksum")?,
        ref_count: get_i64("ref_count")? as u64,
        created_at: get_i64("created_at")?,
    })
}

/// builds `col1 = ?, col2 = ?, ...` for an `UPDATE ... SET` clause.
fn set_clause(cols: &[&str]) -> String {
    cols.iter().map(|c| format!("{c} = ?")).collect::<Vec<_>>().join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// the metadata store: `files` and `blobs` live in the injected [`RowStore`],
/// read back via parameterized `query` and written via parameterized
/// `execute` — not a local cache fronted by best-effort SQL. the one
/// exception is the root directory, which this store's constructor cannot
/// persist (it is not `async`), so it lives behind a small `Mutex<Option<Entry>>`
/// instead of a `files` row.
pub struct MetadataStore {
    row_store: Arc<dyn RowStore>,
    root: Mutex<Option<Entry>>,
    next_id: AtomicU64,
    clock: Arc<dyn Fn() -> i64 + Send + Sync>,
}

const ROOT_ID: u64 = 0;

impl MetadataStore {
    pub fn new(row_store: Arc<dyn RowStore>, clock: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        let now = clock();
        let root = Entry {
            id: ROOT_ID,
            path: "/".to_string(),
            name: String::new(),
            parent_id: None,
            entry_type: EntryType::Directory,
            mode: 0o755,
            uid: 0,
            gid: 0,
            size: 0,
            blob_id: None,
            link_target: None,
            nlink: 1,
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
        };

        MetadataStore {
            row_store,
            root: Mutex::new(Some(root)),
            next_id: AtomicU64::new(ROOT_ID + 1),
            clock,
        }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// apply the schema version ladder. a small explicit sequence rather than
    /// a migration-framework dependency (see DESIGN.md) — there are exactly
    /// four tables and one version bump so far.
    pub async fn migrate(&self) -> Result<()> {
        self.row_store.execute("PRAGMA user_version = 1", &[]).await?;
        Ok(())
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Option<Entry>> {
        let normalized = normalize_path(path)?;
        if normalized == "/" {
            return Ok(self.root.lock().unwrap().clone());
        }
        let rows = self
            .row_store
            .query("SELECT * FROM files WHERE path = ?", &[Value::Text(normalized)])
            .await?;
        rows.first().map(row_to_entry).transpose()
    }

    pub async fn get_by_id(&self, id: u64) -> Result<Option<Entry>> {
        if id == ROOT_ID {
            return Ok(self.root.lock().unwrap().clone());
        }
        let rows = self
            .row_store
            .query("SELECT * FROM files WHERE id = ?", &[Value::Integer(id as i64)])
            .await?;
        rows.first().map(row_to_entry).transpose()
    }

    pub async fn get_children(&self, parent_id: u64) -> Result<Vec<Entry>> {
        let rows = self
            .row_store
            .query(
                "SELECT * FROM files WHERE parent_id = ?",
                &[Value::Integer(parent_id as i64)],
            )
            .await?;
        let mut children: Vec<Entry> = rows.iter().map(row_to_entry).collect::<Result<Vec<_>>>()?;
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    /// create a new entry. fails `ENOENT` if the parent directory is missing,
    /// `EEXIST` if the path is already taken by a live entry.
    pub async fn create_entry(&self, new: NewEntry) -> Result<Entry> {
        let path = normalize_path(&new.path)?;
        let (parent_path, name) = split_path(&path);

        if self.get_by_path(&path).await?.is_some() {
            return Err(Error::Exist(path));
        }

        let parent = self
            .get_by_path(&parent_path)
            .await?
            .ok_or_else(|| Error::NoEnt(path.clone()))?;
        if parent.entry_type != EntryType::Directory {
            return Err(Error::NotDir(parent_path));
        }

        let now = self.now();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = Entry {
            id,
            path: path.clone(),
            name,
            parent_id: Some(parent.id),
            entry_type: new.entry_type,
            mode: new.mode,
            uid: new.uid,
            gid: new.gid,
            size: new.size,
            blob_id: new.blob_id,
            link_target: new.link_target,
            nlink: 1,
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
        };

        let row = entry_to_row(&entry);
        let params: Vec<Value> = ENTRY_COLUMNS
            .iter()
            .map(|c| row.get(*c).cloned().unwrap_or(Value::Null))
            .collect();
        let sql = format!(
            "INSERT INTO files ({}) VALUES ({})",
            ENTRY_COLUMNS.join(", "),
            placeholders(ENTRY_COLUMNS.len())
        );
        self.row_store.execute(&sql, &params).await?;

        Ok(entry)
    }

    pub async fn update_entry(&self, id: u64, patch: EntryPatch) -> Result<Entry> {
        if id == ROOT_ID {
            let mut guard = self.root.lock().unwrap();
            let entry = guard.as_mut().ok_or_else(|| Error::NoEnt(id.to_string()))?;
            apply_patch(entry, &patch);
            return Ok(entry.clone());
        }

        let mut entry = self.get_by_id(id).await?.ok_or_else(|| Error::NoEnt(id.to_string()))?;
        apply_patch(&mut entry, &patch);

        let row = entry_to_row(&entry);
        const SET_COLUMNS: &[&str] = &[
            "size",
            "blob_id",
            "link_target",
            "mode",
            "uid",
            "gid",
            "nlink",
            "atime",
            "mtime",
            "ctime",
        ];
        let mut params: Vec<Value> = SET_COLUMNS
            .iter()
            .map(|c| row.get(*c).cloned().unwrap_or(Value::Null))
            .collect();
        params.push(Value::Integer(id as i64));
        let sql = format!("UPDATE files SET {} WHERE id = ?", set_clause(SET_COLUMNS));
        self.row_store.execute(&sql, &params).await?;

        Ok(entry)
    }

    pub async fn delete_entry(&self, id: u64) -> Result<()> {
        if id == ROOT_ID {
            let mut guard = self.root.lock().unwrap();
            return guard.take().map(|_| ()).ok_or_else(|| Error::NoEnt(id.to_string()));
        }

        let affected = self
            .row_store
            .execute("DELETE FROM files WHERE id = ?", &[Value::Integer(id as i64)])
            .await?;
        if affected == 0 {
            return Err(Error::NoEnt(id.to_string()));
        }
        Ok(())
    }

    /// register a freshly-written blob, or bump `ref_count` if its content
    /// hash already exists.
    pub async fn register_blob(&self, id: &str, size: u64, tier: Tier, checksum: &str) -> Result<BlobRecord> {
        if let Some(mut existing) = self.get_blob(id).await? {
            existing.ref_count += 1;
            self.row_store
                .execute(
                    "UPDATE blobs SET ref_count = ? WHERE id = ?",
                    &[Value::Integer(existing.ref_count as i64), Value::Text(id.to_string())],
                )
                .await?;
            return Ok(existing);
        }

        let record = BlobRecord {
            id: id.to_string(),
            size,
            tier,
            checksum: checksum.to_string(),
            ref_count: 1,
            created_at: self.now(),
        };
        let row = blob_to_row(&record);
        let params: Vec<Value> = BLOB_COLUMNS
            .iter()
            .map(|c| row.get(*c).cloned().unwrap_or(Value::Null))
            .collect();
        let sql = format!(
            "INSERT INTO blobs ({}) VALUES ({})",
            BLOB_COLUMNS.join(", "),
            placeholders(BLOB_COLUMNS.len())
        );
        self.row_store.execute(&sql, &params).await?;
        Ok(record)
    }

    pub async fn get_blob(&self, id: &str) -> Result<Option<BlobRecord>> {
        let rows = self
            .row_store
            .query("SELECT * FROM blobs WHERE id = ?", &[Value::Text(id.to_string())])
            .await?;
        rows.first().map(row_to_blob).transpose()
    }

    pub async fn increment_blob_ref_count(&self, id: &str) -> Result<BlobRecord> {
        let mut record = self
            .get_blob(id)
            .await?
            .ok_or_else(|| Error::BlobNotFound(id.to_string()))?;
        record.ref_count += 1;
        self.row_store
            .execute(
                "UPDATE blobs SET ref_count = ? WHERE id = ?",
                &[Value::Integer(record.ref_count as i64), Value::Text(id.to_string())],
            )
            .await?;
        Ok(record)
    }

    /// decrement a blob's `ref_count`; deletes the row and returns `true` once
    /// it reaches zero.
    pub async fn decrement_blob_ref_count(&self, id: &str) -> Result<bool> {
        let Some(mut record) = self.get_blob(id).await? else {
            return Ok(false);
        };
        record.ref_count = record.ref_count.saturating_sub(1);
        if record.ref_count == 0 {
            self.row_store
                .execute("DELETE FROM blobs WHERE id = ?", &[Value::Text(id.to_string())])
                .await?;
            Ok(true)
        } else {
            self.row_store
                .execute(
                    "UPDATE blobs SET ref_count = ? WHERE id = ?",
                    &[Value::Integer(record.ref_count as i64), Value::Text(id.to_string())],
                )
                .await?;
            Ok(false)
        }
    }

    pub async fn delete_blob(&self, id: &str) -> Result<()> {
        self.row_store
            .execute("DELETE FROM blobs WHERE id = ?", &[Value::Text(id.to_string())])
            .await?;
        Ok(())
    }

    pub fn root_id(&self) -> u64 {
        ROOT_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    use crate::storage::MemoryRowStore;

    fn store() -> MetadataStore {
        let counter = Arc::new(AtomicI64::new(1000));
        MetadataStore::new(
            Arc::new(MemoryRowStore::new()),
            Arc::new(move || counter.load(Ordering::SeqCst)),
        )
    }

    #[tokio::test]
    async fn test_root_exists() {
        let store = store();
        let root = store.get_by_path("/").await.unwrap().unwrap();
        assert_eq!(root.entry_type, EntryType::Directory);
        assert_eq!(root.id, store.root_id());
    }

    #[tokio::test]
    async fn test_create_entry_under_root() {
        let store = store();
        let entry = store
            .create_entry(NewEntry {
                path: "/file.txt".to_string(),
                entry_type: EntryType::File,
                mode: 0o644,
                uid: 0,
                gid: 0,
                size: 5,
                blob_id: Some("blob-abc".to_string()),
                link_target: None,
            })
            .await
            .unwrap();
        assert_eq!(entry.parent_id, Some(store.root_id()));
        assert_eq!(entry.name, "file.txt");

        let fetched = store.get_by_path("/file.txt").await.unwrap().unwrap();
        assert_eq!(fetched.id, entry.id);
    }

    #[tokio::test]
    async fn test_create_entry_missing_parent_fails_enoent() {
        let store = store();
        let result = store
            .create_entry(NewEntry {
                path: "/missing/file.txt".to_string(),
                entry_type: EntryType::File,
                mode: 0o644,
                uid: 0,
                gid: 0,
                size: 0,
                blob_id: None,
                link_target: None,
            })
            .await;
        assert!(matches!(result, Err(Error::NoEnt(_))));
    }

    #[tokio::test]
    async fn test_create_entry_duplicate_path_fails_eexist() {
        let store = store();
        let new = NewEntry {
            path: "/a".to_string(),
            entry_type: EntryType::File,
            mode: 0o644,
            uid: 0,
            gid: 0,
            size: 0,
            blob_id: None,
            link_target: None,
        };
        store.create_entry(new.clone()).await.unwrap();
        assert!(matches!(store.create_entry(new).await, Err(Error::Exist(_))));
    }

    #[tokio::test]
    async fn test_get_children() {
        let store = store();
        for name in ["b", "a", "c"] {
            store
                .create_entry(NewEntry {
                    path: format!("/{name}"),
                    entry_type: EntryType::File,
                    mode: 0o644,
                    uid: 0,
                    gid: 0,
                    size: 0,
                    blob_id: None,
                    link_target: None,
                })
                .await
                .unwrap();
        }
        let children = store.get_children(store.root_id()).await.unwrap();
        let names: Vec<&str> = children.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_entry() {
        let store = store();
        let entry = store
            .create_entry(NewEntry {
                path: "/f".to_string(),
                entry_type: EntryType::File,
                mode: 0o644,
                uid: 0,
                gid: 0,
                size: 1,
                blob_id: None,
                link_target: None,
            })
            .await
            .unwrap();

        let updated = store
            .update_entry(
                entry.id,
                EntryPatch {
                    size: Some(42),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.size, 42);

        store.delete_entry(entry.id).await.unwrap();
        assert!(store.get_by_path("/f").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blob_ref_counting_and_dedup() {
        let store = store();
        let first = store.register_blob("blob-x", 10, Tier::Hot, "deadbeef").await.unwrap();
        assert_eq!(first.ref_count, 1);

        let second = store.register_blob("blob-x", 10, Tier::Hot, "deadbeef").await.unwrap();
        assert_eq!(second.ref_count, 2);

        let deleted = store.decrement_blob_ref_count("blob-x").await.unwrap();
        assert!(!deleted);
        assert_eq!(store.get_blob("blob-x").await.unwrap().unwrap().ref_count, 1);

        let deleted = store.decrement_blob_ref_count("blob-x").await.unwrap();
        assert!(deleted);
        assert!(store.get_blob("blob-x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decrement_missing_blob_is_noop() {
        let store = store();
        assert!(!store.decrement_blob_ref_count("blob-missing").await.unwrap());
    }
}
