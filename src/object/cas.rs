//! content-addressable store operations: putObject/getObject/hasObject/deleteObject.

use crate::error::{Error, Result};
use crate::hash::{compute_hash, Algorithm, Hash};
use crate::storage::CasStorage;
use crate::zlib::{self, Strategy};

use super::{frame, parse, ObjectType};

/// default zlib level used by `put_object`.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 6;

/// a content-addressable object store over a pluggable [`CasStorage`] backend.
///
/// # Examples
///
/// ```
/// # use actorfs::object::{Cas, ObjectType};
/// # use actorfs::storage::MemoryCasStorage;
/// # use std::sync::Arc;
/// # async fn example() -> actorfs::error::Result<()> {
/// let cas = Cas::new(Arc::new(MemoryCasStorage::new()));
/// let hash = cas.put_object(b"hello", ObjectType::Blob).await?;
/// let (ty, content) = cas.get_object(&hash).await?.expect("present");
/// assert_eq!(content, b"hello");
/// assert_eq!(ty, ObjectType::Blob);
/// # Ok(())
/// # }
/// ```
pub struct Cas {
    storage: std::sync::Arc<dyn CasStorage>,
    algorithm: Algorithm,
    compression_level: i32,
}

impl Cas {
    pub fn new(storage: std::sync::Arc<dyn CasStorage>) -> Self {
        Cas {
            storage,
            // SHA-1 is the default for git interop.
            algorithm: Algorithm::Sha1,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    fn object_path(hash: &Hash) -> String {
        let (dir, rest) = hash.to_path_components();
        format!("objects/{dir}/{rest}")
    }

    /// write `content` under `object_type`, deduplicating on content hash.
    pub async fn put_object(&self, content: &[u8], object_type: ObjectType) -> Result<Hash> {
        let framed = frame(object_type, content);
        let hash = compute_hash(self.algorithm, &framed);
        let path = Self::object_path(&hash);

        if self.storage.exists(&path).await? {
            return Ok(hash);
        }

        let compressed = zlib::compress(&framed, self.compression_level, Strategy::Default, 8)?;
        self.storage.write(&path, compressed).await?;
        Ok(hash)
    }

    /// read an object back, or `None` if absent. corrupted objects raise.
    pub async fn get_object(&self, hash: &Hash) -> Result<Option<(ObjectType, Vec<u8>)>> {
        let path = Self::object_path(hash);
        let Some(compressed) = self.storage.get(&path).await? else {
            return Ok(None);
        };

        let framed = zlib::decompress(&compressed)?;
        let parsed = parse(&framed).map_err(|_| Error::CorruptedObject(hash.clone()))?;
        Ok(Some((parsed.object_type, parsed.content.to_vec())))
    }

    pub async fn has_object(&self, hash: &Hash) -> Result<bool> {
        self.storage.exists(&Self::object_path(hash)).await
    }

    /// idempotent: no error if the object is already absent.
    pub async fn delete_object(&self, hash: &Hash) -> Result<()> {
        self.storage.delete(&Self::object_path(hash)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCasStorage;
    use std::sync::Arc;

    fn cas() -> Cas {
        Cas::new(Arc::new(MemoryCasStorage::new()))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cas = cas();
        let hash = cas.put_object(b"hello", ObjectType::Blob).await.unwrap();
        let (ty, content) = cas.get_object(&hash).await.unwrap().unwrap();
        assert_eq!(ty, ObjectType::Blob);
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_dedup_identical_content() {
        let cas = cas();
        let h1 = cas.put_object(b"duplicate", ObjectType::Blob).await.unwrap();
        let h2 = cas.put_object(b"duplicate", ObjectType::Blob).await.unwrap();
        assert_eq!(h1, h2);
        assert!(cas.has_object(&h1).await.unwrap());
    }

    #[tokio::test]
    async fn test_git_parity_empty_blob() {
        let cas = cas();
        let hash = cas.put_object(b"", ObjectType::Blob).await.unwrap();
        assert_eq!(hash.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[tokio::test]
    async fn test_git_parity_hello_blob() {
        let cas = cas();
        let hash = cas.put_object(b"hello", ObjectType::Blob).await.unwrap();
        assert_eq!(hash.to_hex(), "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0");
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let cas = cas();
        let fake = compute_hash(Algorithm::Sha1, b"never written");
        assert!(cas.get_object(&fake).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cas = cas();
        let hash = cas.put_object(b"content", ObjectType::Blob).await.unwrap();
        cas.delete_object(&hash).await.unwrap();
        cas.delete_object(&hash).await.unwrap();
        assert!(!cas.has_object(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_tree_and_commit_types_roundtrip() {
        let cas = cas();
        let tree_hash = cas.put_object(b"tree bytes", ObjectType::Tree).await.unwrap();
        let (ty, content) = cas.get_object(&tree_hash).await.unwrap().unwrap();
        assert_eq!(ty, ObjectType::Tree);
        assert_eq!(content, b"tree bytes");
    }

    #[tokio::test]
    async fn test_alternate_algorithm() {
        let cas = Cas::new(Arc::new(MemoryCasStorage::new())).with_algorithm(Algorithm::Sha256);
        let hash = cas.put_object(b"hello", ObjectType::Blob).await.unwrap();
        assert_eq!(hash.algorithm(), Algorithm::Sha256);
        assert_eq!(hash.to_hex().len(), 64);
    }
}
