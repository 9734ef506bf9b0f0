//! external storage collaborators: the CAS storage driver, the bucket
//! driver, and the embedded row store. the engine depends only on these traits;
//! the actor runtime wires in whatever concrete backend it has attached.
//!
//! each trait also ships an in-memory reference implementation, used by this
//! crate's own tests and as a starting point for integrators prototyping
//! against the engine before plumbing in a real backend.

mod memory;

pub use memory::{MemoryBucket, MemoryCasStorage, MemoryRowStore};

use async_trait::async_trait;

use crate::error::Result;

/// the raw key-value surface the CAS writes compressed objects through.
///
/// # Examples
///
/// ```
/// # use actorfs::storage::{CasStorage, MemoryCasStorage};
/// # async fn example() -> actorfs::error::Result<()> {
/// let storage = MemoryCasStorage::new();
/// storage.write("objects/ab/cdef", b"compressed bytes".to_vec()).await?;
/// assert!(storage.exists("objects/ab/cdef").await?);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait CasStorage: Send + Sync {
    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn delete(&self, path: &str) -> Result<()>;
}

/// custom metadata carried alongside a bucket object.
pub type ObjectMetadata = std::collections::HashMap<String, String>;

/// result of a successful bucket write.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub etag: String,
    pub size: u64,
}

/// a bucket object as returned by `get`/`get_range`.
#[derive(Debug, Clone)]
pub struct BucketObject {
    pub data: Vec<u8>,
    pub custom_metadata: ObjectMetadata,
}

/// metadata-only view, as returned by `head`.
#[derive(Debug, Clone)]
pub struct HeadResult {
    pub custom_metadata: ObjectMetadata,
    pub size: u64,
}

/// one entry from a `list` call.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListResult {
    pub objects: Vec<ListEntry>,
    pub truncated: bool,
    pub cursor: Option<String>,
}

/// external large-object bucket.
#[async_trait]
pub trait BucketDriver: Send + Sync {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        custom_metadata: ObjectMetadata,
    ) -> Result<PutResult>;

    async fn get(&self, key: &str) -> Result<Option<BucketObject>>;

    async fn get_range(&self, key: &str, start: u64, end: Option<u64>) -> Result<Option<Vec<u8>>>;

    async fn head(&self, key: &str) -> Result<Option<HeadResult>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    async fn list(&self, options: ListOptions) -> Result<ListResult>;
}

/// a single row, represented generically as a column-name → value map. the
/// embedded row store is abstract enough that callers define their own typed
/// projections over it; this crate projects into the `metadata` module's row
/// structs.
pub type Row = std::collections::HashMap<String, Value>;

/// the small value universe the embedded store's columns take on.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// embedded row store: a minimal SQL-shaped
/// surface with savepoint-scoped transactions.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// execute `sql` with positional `params`, returning every matching row.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// execute `sql` for its side effect (insert/update/delete/ddl); returns rows
    /// affected.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// open a named savepoint. callers generate collision-free names with
    /// [`crate::util::generate_savepoint_name`].
    async fn savepoint(&self, name: &str) -> Result<()>;

    async fn release_savepoint(&self, name: &str) -> Result<()>;

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()>;
}
