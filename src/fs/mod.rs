//! POSIX-shaped file layer: binds the metadata store to the
//! tiered blob engine and exposes the usual filesystem verbs over normalized
//! paths.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::hash::{compute_hash, Algorithm};
use crate::metadata::{Entry, EntryPatch, EntryType, MetadataStore, NewEntry};
use crate::tier::{Tier, TierEngine};
use crate::util::{blob_id_from_digest, normalize_path, split_path};

/// symlink chains longer than this are rejected with `ELoop`.
const MAX_SYMLINK_HOPS: u32 = 40;

/// mode bits distinguishing entry kinds within `st_mode`, matching POSIX's
/// `S_IFREG`/`S_IFDIR`/`S_IFLNK`.
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

fn type_bits(entry_type: EntryType) -> u32 {
    match entry_type {
        EntryType::File => S_IFREG,
        EntryType::Directory => S_IFDIR,
        EntryType::Symlink => S_IFLNK,
    }
}

/// exclusive-creation semantics for [`FsLayer::write_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFlag {
    /// truncate-or-create; overwrites an existing file (the default).
    Truncate,
    /// fail with `EEXIST` if the path already exists.
    CreateExclusive,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub mode: Option<u32>,
    pub flag: Option<WriteFlag>,
    pub tier: Option<Tier>,
}

#[derive(Debug, Clone)]
pub struct WriteResult {
    pub bytes_written: u64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Default)]
pub struct MkdirOptions {
    pub recursive: bool,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct RmdirOptions {
    pub recursive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReaddirOptions {
    pub with_file_types: bool,
    pub recursive: bool,
}

/// a directory entry. `entry_type` is only populated when
/// [`ReaddirOptions::with_file_types`] was set — callers that don't ask for
/// kinds don't pay for the extra round trip this reference layer would
/// otherwise do per child.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: Option<EntryType>,
}

/// POSIX `stat(2)`-shaped view of an entry.
#[derive(Debug, Clone)]
pub struct Stat {
    pub entry_type: EntryType,
    pub mode: u32,
    pub size: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
    pub blocks: u64,
}

impl Stat {
    fn from_entry(entry: &Entry) -> Self {
        Stat {
            entry_type: entry.entry_type,
            mode: type_bits(entry.entry_type) | (entry.mode & 0o7777),
            size: entry.size,
            nlink: entry.nlink,
            uid: entry.uid,
            gid: entry.gid,
            atime: entry.atime,
            mtime: entry.mtime,
            ctime: entry.ctime,
            birthtime: entry.birthtime,
            blocks: entry.size.div_ceil(512),
        }
    }
}

/// the POSIX surface: `writeFile`/`readFile`/`unlink`/`rename`/`copyFile`/
/// `mkdir`/`rmdir`/`readdir`/`stat`/`lstat`/`exists`/`chmod`/`chown`/`utimes`/
/// `symlink`/`link`/`readlink`/`realpath`/`open`/`appendFile`/`access`, plus
/// tiering delegation.
pub struct FsLayer {
    metadata: Arc<MetadataStore>,
    tier: Arc<TierEngine>,
    clock: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl FsLayer {
    pub fn new(metadata: Arc<MetadataStore>, tier: Arc<TierEngine>, clock: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        FsLayer { metadata, tier, clock }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    async fn require_entry(&self, path: &str) -> Result<Entry> {
        self.metadata
            .get_by_path(path)
            .await?
            .ok_or_else(|| Error::NoEnt(path.to_string()))
    }

    /// drop a reference to `blob_id`; if it reaches zero, retire the blob
    /// from the tier engine too.
    async fn deref_blob(&self, blob_id: &str) -> Result<()> {
        if self.metadata.decrement_blob_ref_count(blob_id).await? {
            self.tier.delete(blob_id).await?;
        }
        Ok(())
    }

    /// write fresh content at `path`.
    pub async fn write_file(&self, path: &str, data: Vec<u8>, options: WriteOptions) -> Result<WriteResult> {
        let path = normalize_path(path)?;
        let (parent_path, _name) = split_path(&path);

        let parent = self
            .require_entry(&parent_path)
            .await
            .map_err(|_| Error::NoEnt(path.clone()))?;
        if parent.entry_type != EntryType::Directory {
            return Err(Error::NotDir(parent_path));
        }

        let existing = self.metadata.get_by_path(&path).await?;
        if matches!(options.flag, Some(WriteFlag::CreateExclusive)) && existing.is_some() {
            return Err(Error::Exist(path));
        }
        if let Some(existing) = &existing {
            if existing.entry_type == EntryType::Directory {
                return Err(Error::IsDir(path));
            }
        }

        let digest = compute_hash(Algorithm::Sha256, &data);
        let blob_id = blob_id_from_digest(digest.as_bytes());
        let size = data.len() as u64;
        let checksum = digest.to_hex();

        let tier_result = if self.metadata.get_blob(&blob_id).await?.is_some() {
            self.metadata.increment_blob_ref_count(&blob_id).await?;
            self.tier.head(&blob_id).await?.map(|(t, _)| t).unwrap_or(Tier::Hot)
        } else {
            let result = self.tier.put(&blob_id, data, options.tier).await?;
            self.metadata.register_blob(&blob_id, size, result.tier, &checksum).await?;
            result.tier
        };

        let now = self.now();
        match existing {
            Some(entry) => {
                if let Some(old_blob) = &entry.blob_id {
                    if old_blob != &blob_id {
                        self.deref_blob(old_blob).await?;
                    } else {
                        // same content written again: undo the extra ref we
                        // just took above, since the entry already held one.
                        self.metadata.decrement_blob_ref_count(&blob_id).await?;
                    }
                }
                self.metadata
                    .update_entry(
                        entry.id,
                        EntryPatch {
                            size: Some(size),
                            blob_id: Some(Some(blob_id)),
                            mtime: Some(now),
                            ctime: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            None => {
                self.metadata
                    .create_entry(NewEntry {
                        path: path.clone(),
                        entry_type: EntryType::File,
                        mode: options.mode.unwrap_or(0o644),
                        uid: 0,
                        gid: 0,
                        size,
                        blob_id: Some(blob_id),
                        link_target: None,
                    })
                    .await?;
            }
        }

        Ok(WriteResult {
            bytes_written: size,
            tier: tier_result,
        })
    }

    /// resolve a path to its terminal (non-symlink) entry, following one
    /// symlink hop at a time up to [`MAX_SYMLINK_HOPS`].
    async fn resolve_logical(&self, path: &str) -> Result<Entry> {
        let mut current = normalize_path(path)?;
        for _ in 0..MAX_SYMLINK_HOPS {
            let entry = self.require_entry(&current).await?;
            if entry.entry_type != EntryType::Symlink {
                return Ok(entry);
            }
            let target = entry.link_target.clone().unwrap_or_default();
            current = if target.starts_with('/') {
                normalize_path(&target)?
            } else {
                let (parent, _) = split_path(&current);
                normalize_path(&format!("{}/{}", parent.trim_end_matches('/'), target))?
            };
        }
        Err(Error::Loop(path.to_string()))
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.resolve_logical(path).await?;
        if entry.entry_type == EntryType::Directory {
            return Err(Error::IsDir(path.to_string()));
        }
        let Some(blob_id) = entry.blob_id else {
            return Ok(Vec::new());
        };
        let result = self
            .tier
            .get(&blob_id)
            .await?
            .ok_or_else(|| Error::BlobNotFound(blob_id))?;
        Ok(result.data.unwrap_or_default())
    }

    pub async fn unlink(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        if entry.entry_type == EntryType::Directory {
            return Err(Error::IsDir(path));
        }
        if let Some(blob_id) = &entry.blob_id {
            self.deref_blob(blob_id).await?;
        }
        self.metadata.delete_entry(entry.id).await?;
        Ok(())
    }

    /// move `old` to `new`, overwriting a non-directory (or empty-directory)
    /// destination. timestamps on the moved entry reset
    /// the way a fresh [`MetadataStore::create_entry`] always does — this
    /// reference layer re-homes content by re-creating the row rather than
    /// mutating a path column in place.
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_path = normalize_path(old)?;
        let new_path = normalize_path(new)?;
        let old_entry = self.require_entry(&old_path).await?;

        let (new_parent_path, _) = split_path(&new_path);
        let new_parent = self
            .metadata
            .get_by_path(&new_parent_path)
            .await?
            .ok_or_else(|| Error::NoEnt(new_path.clone()))?;
        if new_parent.entry_type != EntryType::Directory {
            return Err(Error::NotDir(new_parent_path));
        }

        if let Some(dest) = self.metadata.get_by_path(&new_path).await? {
            if dest.entry_type == EntryType::Directory {
                if !self.metadata.get_children(dest.id).await?.is_empty() {
                    return Err(Error::NotEmpty(new_path));
                }
            } else if let Some(blob_id) = &dest.blob_id {
                self.deref_blob(blob_id).await?;
            }
            self.metadata.delete_entry(dest.id).await?;
        }

        self.metadata.delete_entry(old_entry.id).await?;
        self.metadata
            .create_entry(NewEntry {
                path: new_path,
                entry_type: old_entry.entry_type,
                mode: old_entry.mode,
                uid: old_entry.uid,
                gid: old_entry.gid,
                size: old_entry.size,
                blob_id: old_entry.blob_id,
                link_target: old_entry.link_target,
            })
            .await?;
        Ok(())
    }

    pub async fn copy_file(&self, src: &str, dest: &str) -> Result<WriteResult> {
        let data = self.read_file(src).await?;
        self.write_file(dest, data, WriteOptions::default()).await
    }

    pub async fn mkdir(&self, path: &str, options: MkdirOptions) -> Result<Entry> {
        let path = normalize_path(path)?;
        let mode = options.mode.unwrap_or(0o755);

        if options.recursive {
            let mut built = String::new();
            let mut last = None;
            for segment in path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()) {
                built.push('/');
                built.push_str(segment);
                match self.metadata.get_by_path(&built).await? {
                    Some(existing) => {
                        if existing.entry_type != EntryType::Directory {
                            return Err(Error::NotDir(built.clone()));
                        }
                        last = Some(existing);
                    }
                    None => {
                        last = Some(
                            self.metadata
                                .create_entry(NewEntry {
                                    path: built.clone(),
                                    entry_type: EntryType::Directory,
                                    mode,
                                    uid: 0,
                                    gid: 0,
                                    size: 0,
                                    blob_id: None,
                                    link_target: None,
                                })
                                .await?,
                        );
                    }
                }
            }
            return last.ok_or_else(|| Error::Invalid("mkdir of root".to_string()));
        }

        let (parent_path, _) = split_path(&path);
        let parent = self
            .metadata
            .get_by_path(&parent_path)
            .await?
            .ok_or_else(|| Error::NoEnt(path.clone()))?;
        if parent.entry_type != EntryType::Directory {
            return Err(Error::NotDir(parent_path));
        }
        if self.metadata.get_by_path(&path).await?.is_some() {
            return Err(Error::Exist(path));
        }

        self.metadata
            .create_entry(NewEntry {
                path,
                entry_type: EntryType::Directory,
                mode,
                uid: 0,
                gid: 0,
                size: 0,
                blob_id: None,
                link_target: None,
            })
            .await
    }

    pub async fn rmdir(&self, path: &str, options: RmdirOptions) -> Result<()> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        if entry.entry_type != EntryType::Directory {
            return Err(Error::NotDir(path));
        }

        let children = self.metadata.get_children(entry.id).await?;
        if !children.is_empty() {
            if !options.recursive {
                return Err(Error::NotEmpty(path));
            }
            for child in children {
                if child.entry_type == EntryType::Directory {
                    Box::pin(self.rmdir(&child.path, RmdirOptions { recursive: true })).await?;
                } else {
                    if let Some(blob_id) = &child.blob_id {
                        self.deref_blob(blob_id).await?;
                    }
                    self.metadata.delete_entry(child.id).await?;
                }
            }
        }

        self.metadata.delete_entry(entry.id).await?;
        Ok(())
    }

    pub async fn readdir(&self, path: &str, options: ReaddirOptions) -> Result<Vec<DirEntry>> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        if entry.entry_type != EntryType::Directory {
            return Err(Error::NotDir(path));
        }

        let mut out = Vec::new();
        self.readdir_into(entry.id, options.recursive, options.with_file_types, &mut out)
            .await?;
        Ok(out)
    }

    fn readdir_into<'a>(
        &'a self,
        dir_id: u64,
        recursive: bool,
        with_file_types: bool,
        out: &'a mut Vec<DirEntry>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            for child in self.metadata.get_children(dir_id).await? {
                out.push(DirEntry {
                    name: child.name.clone(),
                    entry_type: with_file_types.then_some(child.entry_type),
                });
                if recursive && child.entry_type == EntryType::Directory {
                    self.readdir_into(child.id, true, with_file_types, out).await?;
                }
            }
            Ok(())
        })
    }

    pub async fn stat(&self, path: &str) -> Result<Stat> {
        let entry = self.resolve_logical(path).await?;
        Ok(Stat::from_entry(&entry))
    }

    pub async fn lstat(&self, path: &str) -> Result<Stat> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        Ok(Stat::from_entry(&entry))
    }

    pub async fn exists(&self, path: &str) -> bool {
        match normalize_path(path) {
            Ok(p) => matches!(self.metadata.get_by_path(&p).await, Ok(Some(_))),
            Err(_) => false,
        }
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        let now = self.now();
        self.metadata
            .update_entry(
                entry.id,
                EntryPatch {
                    mode: Some(mode),
                    ctime: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        let now = self.now();
        self.metadata
            .update_entry(
                entry.id,
                EntryPatch {
                    uid: Some(uid),
                    gid: Some(gid),
                    ctime: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    pub async fn utimes(&self, path: &str, atime: i64, mtime: i64) -> Result<()> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        self.metadata
            .update_entry(
                entry.id,
                EntryPatch {
                    atime: Some(atime),
                    mtime: Some(mtime),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    pub async fn symlink(&self, target: &str, path: &str) -> Result<Entry> {
        let path = normalize_path(path)?;
        if self.metadata.get_by_path(&path).await?.is_some() {
            return Err(Error::Exist(path));
        }
        self.metadata
            .create_entry(NewEntry {
                path,
                entry_type: EntryType::Symlink,
                mode: 0o777,
                uid: 0,
                gid: 0,
                size: 0,
                blob_id: None,
                link_target: Some(target.to_string()),
            })
            .await
    }

    /// hard link: `new` shares `existing`'s `blob_id`; both entries' `nlink`
    /// is bumped and the blob's ref count incremented.
    pub async fn link(&self, existing: &str, new: &str) -> Result<Entry> {
        let existing_path = normalize_path(existing)?;
        let existing_entry = self.require_entry(&existing_path).await?;
        if existing_entry.entry_type != EntryType::File {
            return Err(Error::Invalid(format!("{existing_path} is not a regular file")));
        }
        let new_path = normalize_path(new)?;
        if self.metadata.get_by_path(&new_path).await?.is_some() {
            return Err(Error::Exist(new_path));
        }

        if let Some(blob_id) = &existing_entry.blob_id {
            self.metadata.increment_blob_ref_count(blob_id).await?;
        }

        let new_nlink = existing_entry.nlink + 1;
        self.metadata
            .update_entry(
                existing_entry.id,
                EntryPatch {
                    nlink: Some(new_nlink),
                    ..Default::default()
                },
            )
            .await?;

        let created = self
            .metadata
            .create_entry(NewEntry {
                path: new_path,
                entry_type: EntryType::File,
                mode: existing_entry.mode,
                uid: existing_entry.uid,
                gid: existing_entry.gid,
                size: existing_entry.size,
                blob_id: existing_entry.blob_id.clone(),
                link_target: None,
            })
            .await?;

        self.metadata
            .update_entry(
                created.id,
                EntryPatch {
                    nlink: Some(new_nlink),
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn readlink(&self, path: &str) -> Result<String> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        if entry.entry_type != EntryType::Symlink {
            return Err(Error::Invalid(format!("{path} is not a symlink")));
        }
        entry.link_target.ok_or_else(|| Error::Invalid(format!("{path} has no link target")))
    }

    pub async fn realpath(&self, path: &str) -> Result<String> {
        let mut current = normalize_path(path)?;
        for _ in 0..MAX_SYMLINK_HOPS {
            let entry = self.require_entry(&current).await?;
            if entry.entry_type != EntryType::Symlink {
                return Ok(current);
            }
            let target = entry.link_target.unwrap_or_default();
            current = if target.starts_with('/') {
                normalize_path(&target)?
            } else {
                let (parent, _) = split_path(&current);
                normalize_path(&format!("{}/{}", parent.trim_end_matches('/'), target))?
            };
        }
        Err(Error::Loop(path.to_string()))
    }

    pub async fn append_file(&self, path: &str, data: &[u8]) -> Result<WriteResult> {
        let mut buffer = match self.read_file(path).await {
            Ok(existing) => existing,
            Err(Error::NoEnt(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        buffer.extend_from_slice(data);
        self.write_file(path, buffer, WriteOptions::default()).await
    }

    pub async fn access(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.metadata
            .get_by_path(&path)
            .await?
            .map(|_| ())
            .ok_or_else(|| Error::NoEnt(path))
    }

    pub async fn get_tier(&self, path: &str) -> Result<Tier> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        let blob_id = entry.blob_id.ok_or_else(|| Error::Invalid(format!("{path} has no blob")))?;
        let (tier, _size) = self.tier.head(&blob_id).await?.ok_or_else(|| Error::BlobNotFound(blob_id))?;
        Ok(tier)
    }

    /// promote/demote rewrite the blob in place under its existing id; the
    /// entry's `blob_id` does not change.
    pub async fn promote(&self, path: &str, target: Tier) -> Result<Tier> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        let blob_id = entry.blob_id.ok_or_else(|| Error::Invalid(format!("{path} has no blob")))?;
        Ok(self.tier.promote(&blob_id, target).await?.tier)
    }

    pub async fn demote(&self, path: &str, target: Tier) -> Result<Tier> {
        let path = normalize_path(path)?;
        let entry = self.require_entry(&path).await?;
        let blob_id = entry.blob_id.ok_or_else(|| Error::Invalid(format!("{path} has no blob")))?;
        Ok(self.tier.demote(&blob_id, target).await?.tier)
    }
}

/// an in-memory file handle: materializes the file's
/// current contents, mutated in place, and flushed back via `writeFile` on
/// `close`/`sync`.
pub struct FileHandle {
    fs: Arc<FsLayer>,
    path: String,
    buffer: Mutex<Vec<u8>>,
    position: Mutex<u64>,
}

impl FileHandle {
    /// open `path`, creating an empty buffer if `create` is set and the file
    /// is missing.
    pub async fn open(fs: Arc<FsLayer>, path: &str, create: bool, truncate: bool) -> Result<Self> {
        let path = normalize_path(path)?;
        let buffer = if truncate {
            Vec::new()
        } else {
            match fs.read_file(&path).await {
                Ok(data) => data,
                Err(Error::NoEnt(_)) if create => Vec::new(),
                Err(e) => return Err(e),
            }
        };
        Ok(FileHandle {
            fs,
            path,
            buffer: Mutex::new(buffer),
            position: Mutex::new(0),
        })
    }

    pub fn read(&self, len: usize) -> Vec<u8> {
        let buffer = self.buffer.lock().unwrap();
        let mut position = self.position.lock().unwrap();
        let start = (*position as usize).min(buffer.len());
        let end = (start + len).min(buffer.len());
        *position = end as u64;
        buffer[start..end].to_vec()
    }

    pub fn write(&self, data: &[u8]) -> usize {
        let mut buffer = self.buffer.lock().unwrap();
        let mut position = self.position.lock().unwrap();
        let start = *position as usize;
        if start + data.len() > buffer.len() {
            buffer.resize(start + data.len(), 0);
        }
        buffer[start..start + data.len()].copy_from_slice(data);
        *position = (start + data.len()) as u64;
        data.len()
    }

    pub fn seek(&self, position: u64) {
        *self.position.lock().unwrap() = position;
    }

    pub fn truncate(&self, len: usize) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.resize(len, 0);
        let mut position = self.position.lock().unwrap();
        if *position > len as u64 {
            *position = len as u64;
        }
    }

    pub async fn sync(&self) -> Result<WriteResult> {
        let data = self.buffer.lock().unwrap().clone();
        self.fs.write_file(&self.path, data, WriteOptions::default()).await
    }

    pub async fn close(&self) -> Result<WriteResult> {
        self.sync().await
    }

    pub async fn stat(&self) -> Result<Stat> {
        self.fs.lstat(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TieringConfig;
    use crate::storage::{MemoryBucket, MemoryRowStore};
    use std::sync::atomic::{AtomicI64, Ordering};

    fn layer() -> (Arc<FsLayer>, Arc<AtomicI64>) {
        let counter = Arc::new(AtomicI64::new(1000));
        let c = counter.clone();
        let clock: Arc<dyn Fn() -> i64 + Send + Sync> = Arc::new(move || c.load(Ordering::SeqCst));
        let metadata = Arc::new(MetadataStore::new(Arc::new(MemoryRowStore::new()), clock.clone()));
        let tier = Arc::new(TierEngine::new(
            Arc::new(MemoryRowStore::new()),
            Arc::new(MemoryBucket::new()),
            Arc::new(MemoryBucket::new()),
            TieringConfig::default(),
            clock.clone(),
        ));
        (Arc::new(FsLayer::new(metadata, tier, clock)), counter)
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (fs, _c) = layer();
        fs.write_file("/a.txt", b"hello".to_vec(), WriteOptions::default()).await.unwrap();
        let data = fs.read_file("/a.txt").await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_write_missing_parent_fails_enoent() {
        let (fs, _c) = layer();
        let result = fs.write_file("/missing/a.txt", b"x".to_vec(), WriteOptions::default()).await;
        assert!(matches!(result, Err(Error::NoEnt(_))));
    }

    #[tokio::test]
    async fn test_write_exclusive_flag_rejects_existing() {
        let (fs, _c) = layer();
        fs.write_file("/a.txt", b"one".to_vec(), WriteOptions::default()).await.unwrap();
        let result = fs
            .write_file(
                "/a.txt",
                b"two".to_vec(),
                WriteOptions {
                    flag: Some(WriteFlag::CreateExclusive),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Exist(_))));
    }

    #[tokio::test]
    async fn test_overwrite_derefs_old_blob() {
        let (fs, _c) = layer();
        fs.write_file("/a.txt", b"one".to_vec(), WriteOptions::default()).await.unwrap();
        let old_blob = fs.require_entry("/a.txt").await.unwrap().blob_id.unwrap();
        fs.write_file("/a.txt", b"two".to_vec(), WriteOptions::default()).await.unwrap();
        assert!(fs.metadata.get_blob(&old_blob).await.unwrap().is_none());
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_read_directory_fails_eisdir() {
        let (fs, _c) = layer();
        fs.mkdir("/d", MkdirOptions::default()).await.unwrap();
        assert!(matches!(fs.read_file("/d").await, Err(Error::IsDir(_))));
    }

    #[tokio::test]
    async fn test_unlink_decrements_refcount() {
        let (fs, _c) = layer();
        fs.write_file("/a.txt", b"content".to_vec(), WriteOptions::default()).await.unwrap();
        let blob_id = fs.require_entry("/a.txt").await.unwrap().blob_id.unwrap();
        fs.unlink("/a.txt").await.unwrap();
        assert!(fs.metadata.get_blob(&blob_id).await.unwrap().is_none());
        assert!(!fs.exists("/a.txt").await);
    }

    #[tokio::test]
    async fn test_mkdir_recursive_creates_ancestors() {
        let (fs, _c) = layer();
        fs.mkdir("/a/b/c", MkdirOptions { recursive: true, mode: None }).await.unwrap();
        assert!(fs.exists("/a").await);
        assert!(fs.exists("/a/b").await);
        assert!(fs.exists("/a/b/c").await);
    }

    #[tokio::test]
    async fn test_mkdir_non_recursive_missing_parent_fails() {
        let (fs, _c) = layer();
        assert!(matches!(
            fs.mkdir("/a/b", MkdirOptions::default()).await,
            Err(Error::NoEnt(_))
        ));
    }

    #[tokio::test]
    async fn test_rmdir_non_recursive_rejects_non_empty() {
        let (fs, _c) = layer();
        fs.mkdir("/d", MkdirOptions::default()).await.unwrap();
        fs.write_file("/d/f", b"x".to_vec(), WriteOptions::default()).await.unwrap();
        assert!(matches!(
            fs.rmdir("/d", RmdirOptions::default()).await,
            Err(Error::NotEmpty(_))
        ));
    }

    #[tokio::test]
    async fn test_rmdir_recursive_deletes_children() {
        let (fs, _c) = layer();
        fs.mkdir("/d", MkdirOptions::default()).await.unwrap();
        fs.write_file("/d/f", b"x".to_vec(), WriteOptions::default()).await.unwrap();
        fs.rmdir("/d", RmdirOptions { recursive: true }).await.unwrap();
        assert!(!fs.exists("/d").await);
        assert!(!fs.exists("/d/f").await);
    }

    #[tokio::test]
    async fn test_readdir_lists_children_sorted() {
        let (fs, _c) = layer();
        fs.mkdir("/d", MkdirOptions::default()).await.unwrap();
        fs.write_file("/d/b", b"x".to_vec(), WriteOptions::default()).await.unwrap();
        fs.write_file("/d/a", b"x".to_vec(), WriteOptions::default()).await.unwrap();
        let entries = fs.readdir("/d", ReaddirOptions::default()).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(entries.iter().all(|e| e.entry_type.is_none()));
    }

    #[tokio::test]
    async fn test_readdir_with_file_types_populates_kind() {
        let (fs, _c) = layer();
        fs.mkdir("/d", MkdirOptions::default()).await.unwrap();
        fs.write_file("/d/f", b"x".to_vec(), WriteOptions::default()).await.unwrap();
        let entries = fs
            .readdir("/d", ReaddirOptions { with_file_types: true, recursive: false })
            .await
            .unwrap();
        assert_eq!(entries[0].entry_type, Some(EntryType::File));
    }

    #[tokio::test]
    async fn test_rename_overwrites_destination() {
        let (fs, _c) = layer();
        fs.write_file("/a", b"a-content".to_vec(), WriteOptions::default()).await.unwrap();
        fs.write_file("/b", b"b-content".to_vec(), WriteOptions::default()).await.unwrap();
        fs.rename("/a", "/b").await.unwrap();
        assert!(!fs.exists("/a").await);
        assert_eq!(fs.read_file("/b").await.unwrap(), b"a-content");
    }

    #[tokio::test]
    async fn test_copy_file() {
        let (fs, _c) = layer();
        fs.write_file("/a", b"payload".to_vec(), WriteOptions::default()).await.unwrap();
        fs.copy_file("/a", "/b").await.unwrap();
        assert_eq!(fs.read_file("/b").await.unwrap(), b"payload");
        assert!(fs.exists("/a").await);
    }

    #[tokio::test]
    async fn test_stat_reports_type_and_size() {
        let (fs, _c) = layer();
        fs.write_file("/a", b"12345".to_vec(), WriteOptions::default()).await.unwrap();
        let stat = fs.stat("/a").await.unwrap();
        assert_eq!(stat.entry_type, EntryType::File);
        assert_eq!(stat.size, 5);
        assert_eq!(stat.mode & S_IFREG, S_IFREG);
        assert_eq!(stat.blocks, 1);
    }

    #[tokio::test]
    async fn test_symlink_readlink_and_follow() {
        let (fs, _c) = layer();
        fs.write_file("/target", b"real content".to_vec(), WriteOptions::default()).await.unwrap();
        fs.symlink("/target", "/link").await.unwrap();
        assert_eq!(fs.readlink("/link").await.unwrap(), "/target");
        assert_eq!(fs.read_file("/link").await.unwrap(), b"real content");
        assert_eq!(fs.realpath("/link").await.unwrap(), "/target");
    }

    #[tokio::test]
    async fn test_symlink_cycle_fails_eloop() {
        let (fs, _c) = layer();
        fs.symlink("/b", "/a").await.unwrap();
        fs.symlink("/a", "/b").await.unwrap();
        assert!(matches!(fs.read_file("/a").await, Err(Error::Loop(_))));
    }

    #[tokio::test]
    async fn test_hardlink_shares_blob_and_bumps_nlink() {
        let (fs, _c) = layer();
        fs.write_file("/a", b"shared".to_vec(), WriteOptions::default()).await.unwrap();
        fs.link("/a", "/b").await.unwrap();

        let a = fs.require_entry("/a").await.unwrap();
        let b = fs.require_entry("/b").await.unwrap();
        assert_eq!(a.blob_id, b.blob_id);
        assert_eq!(a.nlink, 2);
        assert_eq!(b.nlink, 2);

        fs.unlink("/a").await.unwrap();
        assert_eq!(fs.read_file("/b").await.unwrap(), b"shared");
    }

    #[tokio::test]
    async fn test_append_file_creates_when_missing() {
        let (fs, _c) = layer();
        fs.append_file("/log", b"first").await.unwrap();
        fs.append_file("/log", b"second").await.unwrap();
        assert_eq!(fs.read_file("/log").await.unwrap(), b"firstsecond");
    }

    #[tokio::test]
    async fn test_access_reports_enoent() {
        let (fs, _c) = layer();
        assert!(matches!(fs.access("/missing").await, Err(Error::NoEnt(_))));
        fs.write_file("/present", b"x".to_vec(), WriteOptions::default()).await.unwrap();
        assert!(fs.access("/present").await.is_ok());
    }

    #[tokio::test]
    async fn test_chmod_chown_utimes() {
        let (fs, _c) = layer();
        fs.write_file("/a", b"x".to_vec(), WriteOptions::default()).await.unwrap();
        fs.chmod("/a", 0o600).await.unwrap();
        fs.chown("/a", 42, 42).await.unwrap();
        fs.utimes("/a", 1, 2).await.unwrap();
        let stat = fs.lstat("/a").await.unwrap();
        assert_eq!(stat.mode & 0o7777, 0o600);
        assert_eq!(stat.uid, 42);
        assert_eq!(stat.atime, 1);
        assert_eq!(stat.mtime, 2);
    }

    #[tokio::test]
    async fn test_get_tier_promote_demote() {
        let (fs, _c) = layer();
        fs.write_file("/a", b"x".to_vec(), WriteOptions::default()).await.unwrap();
        assert_eq!(fs.get_tier("/a").await.unwrap(), Tier::Hot);
        fs.promote("/a", Tier::Warm).await.unwrap();
        assert_eq!(fs.get_tier("/a").await.unwrap(), Tier::Warm);
    }

    #[tokio::test]
    async fn test_file_handle_write_read_and_close() {
        let (fs, _c) = layer();
        let handle = FileHandle::open(fs.clone(), "/h", true, true).await.unwrap();
        handle.write(b"hello world");
        handle.seek(0);
        assert_eq!(handle.read(5), b"hello");
        handle.close().await.unwrap();
        assert_eq!(fs.read_file("/h").await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_file_handle_truncate() {
        let (fs, _c) = layer();
        fs.write_file("/h", b"0123456789".to_vec(), WriteOptions::default()).await.unwrap();
        let handle = FileHandle::open(fs.clone(), "/h", false, false).await.unwrap();
        handle.truncate(4);
        handle.sync().await.unwrap();
        assert_eq!(fs.read_file("/h").await.unwrap(), b"0123");
    }
}
