//! copy-on-write branch overlay and durable branch metadata.
//!
//! the overlay sits logically above the file layer: when a branch is active,
//! writes land here first and only reach the metadata store on `commit`.
//! parent-chain resolution and content writes are injected collaborators so
//! this module stays agnostic of whatever CAS/metadata wiring the caller uses.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::BucketDriver;
use crate::util::normalize_path;

/// hash value denoting a logical deletion.
pub const TOMBSTONE_HASH: &str = "";

/// an owned-block record: `{hash, size, is_owned, modified_at}`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockInfo {
    pub hash: String,
    pub size: u64,
    pub is_owned: bool,
    pub modified_at: i64,
}

impl BlockInfo {
    pub fn is_tombstone(&self) -> bool {
        self.hash == TOMBSTONE_HASH
    }
}

/// looks up a block in the parent branch chain. the wired-up variant walks
/// branch metadata and the owning branch's overlay; the in-memory reference
/// below composes overlays directly.
#[async_trait]
pub trait ParentResolver: Send + Sync {
    async fn resolve_parent_block(&self, path: &str, branch_id: &str) -> Result<Option<BlockInfo>>;
}

/// writes fresh content and returns its hash. the wired-up variant sinks
/// into the CAS; tests use an in-memory stand-in.
#[async_trait]
pub trait ContentWriter: Send + Sync {
    async fn write_content(&self, path: &str, data: &[u8]) -> Result<String>;
}

/// persists one dirty `(path, block)` pair at commit time.
#[async_trait]
pub trait DirtyBlockSink: Send + Sync {
    async fn persist_block(&self, branch_id: &str, path: &str, block: &BlockInfo) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct InterceptResult {
    pub hash: String,
    pub bytes_written: u64,
    pub copied_from_parent: bool,
    pub path: String,
    pub previous_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommitResult {
    pub branch_id: String,
    pub path_count: usize,
    pub paths: Vec<String>,
    pub total_bytes: u64,
    pub committed_at: i64,
}

/// per-active-branch transient state. mutated only by the
/// branch's own handler — never shared across branches.
pub struct BranchOverlay {
    branch_id: String,
    owned_blocks: Mutex<HashMap<String, BlockInfo>>,
    dirty_paths: Mutex<HashSet<String>>,
    previous_hashes: Mutex<HashMap<String, String>>,
    parent_resolver: Arc<dyn ParentResolver>,
    writer: Arc<dyn ContentWriter>,
    sink: Arc<dyn DirtyBlockSink>,
    clock: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl BranchOverlay {
    pub fn new(
        branch_id: impl Into<String>,
        parent_resolver: Arc<dyn ParentResolver>,
        writer: Arc<dyn ContentWriter>,
        sink: Arc<dyn DirtyBlockSink>,
        clock: Arc<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        BranchOverlay {
            branch_id: branch_id.into(),
            owned_blocks: Mutex::new(HashMap::new()),
            dirty_paths: Mutex::new(HashSet::new()),
            previous_hashes: Mutex::new(HashMap::new()),
            parent_resolver,
            writer,
            sink,
            clock,
        }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// intercept a write before it reaches the metadata store.
    pub async fn intercept_write(&self, path: &str, data: &[u8]) -> Result<InterceptResult> {
        let path = normalize_path(path)?;

        let existing_owned = self.owned_blocks.lock().unwrap().get(&path).cloned();
        let mut copied_from_parent = false;
        let mut previous_hash = None;

        if let Some(owned) = &existing_owned {
            previous_hash = Some(owned.hash.clone());
        } else if let Some(parent_block) = self.parent_resolver.resolve_parent_block(&path, &self.branch_id).await? {
            copied_from_parent = true;
            previous_hash = Some(parent_block.hash.clone());
            self.previous_hashes.lock().unwrap().insert(path.clone(), parent_block.hash);
        }

        let hash = self.writer.write_content(&path, data).await?;
        let now = self.now();
        let block = BlockInfo {
            hash: hash.clone(),
            size: data.len() as u64,
            is_owned: true,
            modified_at: now,
        };

        self.owned_blocks.lock().unwrap().insert(path.clone(), block);
        self.dirty_paths.lock().unwrap().insert(path.clone());

        Ok(InterceptResult {
            hash,
            bytes_written: data.len() as u64,
            copied_from_parent,
            path,
            previous_hash,
        })
    }

    /// mark `path` logically deleted. returns
    /// `false` if the path is neither owned nor inherited.
    pub async fn mark_deleted(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;

        let pre_delete_hash = {
            let owned = self.owned_blocks.lock().unwrap();
            match owned.get(&path) {
                Some(block) => Some(block.hash.clone()),
                None => None,
            }
        };

        let pre_delete_hash = match pre_delete_hash {
            Some(hash) => Some(hash),
            None => self
                .parent_resolver
                .resolve_parent_block(&path, &self.branch_id)
                .await?
                .map(|b| b.hash),
        };

        let Some(hash) = pre_delete_hash else {
            return Ok(false);
        };

        self.previous_hashes.lock().unwrap().insert(path.clone(), hash);
        self.owned_blocks.lock().unwrap().insert(
            path.clone(),
            BlockInfo {
                hash: TOMBSTONE_HASH.to_string(),
                size: 0,
                is_owned: true,
                modified_at: self.now(),
            },
        );
        self.dirty_paths.lock().unwrap().insert(path);
        Ok(true)
    }

    /// resolve `path`'s current block: owned first (tombstones included),
    /// else walk the parent chain.
    pub async fn get_block_info(&self, path: &str) -> Result<Option<BlockInfo>> {
        let path = normalize_path(path)?;
        if let Some(owned) = self.owned_blocks.lock().unwrap().get(&path).cloned() {
            return Ok(Some(owned));
        }
        self.parent_resolver.resolve_parent_block(&path, &self.branch_id).await
    }

    /// persist every dirty path via the injected sink, then clear
    /// `dirty_paths`/`previous_hashes`; owned blocks remain.
    pub async fn commit(&self) -> Result<CommitResult> {
        let dirty: Vec<String> = self.dirty_paths.lock().unwrap().iter().cloned().collect();
        let mut total_bytes = 0u64;

        for path in &dirty {
            let block = self
                .owned_blocks
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::Invalid(format!("dirty path {path} has no owned block")))?;
            total_bytes += block.size;
            self.sink.persist_block(&self.branch_id, path, &block).await?;
        }

        self.dirty_paths.lock().unwrap().clear();
        self.previous_hashes.lock().unwrap().clear();

        Ok(CommitResult {
            branch_id: self.branch_id.clone(),
            path_count: dirty.len(),
            paths: dirty,
            total_bytes,
            committed_at: self.now(),
        })
    }

    /// undo a single dirty path: falls back to the
    /// parent's version if one existed, otherwise removes the owned entry
    /// entirely. returns `true` if anything was discarded.
    pub fn discard_path(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        if !self.dirty_paths.lock().unwrap().remove(&path) {
            return Ok(false);
        }

        let previous = self.previous_hashes.lock().unwrap().remove(&path);
        match previous {
            Some(_) => {
                self.owned_blocks.lock().unwrap().remove(&path);
            }
            None => {
                self.owned_blocks.lock().unwrap().remove(&path);
            }
        }
        Ok(true)
    }

    /// discard every dirty path; returns the count discarded.
    pub fn discard_all(&self) -> usize {
        let dirty: Vec<String> = self.dirty_paths.lock().unwrap().drain().collect();
        let mut previous_hashes = self.previous_hashes.lock().unwrap();
        let mut owned = self.owned_blocks.lock().unwrap();
        for path in &dirty {
            previous_hashes.remove(path);
            owned.remove(path);
        }
        dirty.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty_paths.lock().unwrap().len()
    }
}

/// durable branch record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub parent_branch: Option<String>,
    pub fork_point: Option<String>,
    pub head_commit: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_default: bool,
    pub is_protected: bool,
    pub is_archived: bool,
    pub commit_count: u64,
}

/// record written to cold storage on archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedBranch {
    pub branch: Branch,
    pub reason: String,
    pub actor: String,
    pub archived_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub include_archived: bool,
    pub parent_branch: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// durable branch registry, with archival to a bucket.
pub struct BranchMetadataStore {
    branches: Mutex<HashMap<String, Branch>>,
    archive_bucket: Arc<dyn BucketDriver>,
    clock: Arc<dyn Fn() -> i64 + Send + Sync>,
}

const MAIN_BRANCH: &str = "main";

impl BranchMetadataStore {
    /// auto-creates `main` as the default, protected branch.
    pub fn new(archive_bucket: Arc<dyn BucketDriver>, clock: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        let now = clock();
        let main = Branch {
            name: MAIN_BRANCH.to_string(),
            parent_branch: None,
            fork_point: None,
            head_commit: None,
            created_at: now,
            updated_at: now,
            is_default: true,
            is_protected: true,
            is_archived: false,
            commit_count: 0,
        };
        let mut branches = HashMap::new();
        branches.insert(main.name.clone(), main);
        BranchMetadataStore {
            branches: Mutex::new(branches),
            archive_bucket,
            clock,
        }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn create(&self, name: &str, parent_branch: Option<String>, fork_point: Option<String>) -> Result<Branch> {
        let mut branches = self.branches.lock().unwrap();
        if branches.contains_key(name) {
            return Err(Error::BranchExists(name.to_string()));
        }
        let now = self.now();
        let branch = Branch {
            name: name.to_string(),
            parent_branch,
            fork_point,
            head_commit: None,
            created_at: now,
            updated_at: now,
            is_default: false,
            is_protected: false,
            is_archived: false,
            commit_count: 0,
        };
        branches.insert(name.to_string(), branch.clone());
        Ok(branch)
    }

    pub fn get(&self, name: &str) -> Option<Branch> {
        self.branches.lock().unwrap().get(name).cloned()
    }

    pub fn update(&self, name: &str, head_commit: Option<String>, bump_commit_count: bool) -> Result<Branch> {
        let mut branches = self.branches.lock().unwrap();
        let branch = branches.get_mut(name).ok_or_else(|| Error::BranchNotFound(name.to_string()))?;
        if let Some(head) = head_commit {
            branch.head_commit = Some(head);
        }
        if bump_commit_count {
            branch.commit_count += 1;
        }
        branch.updated_at = self.now();
        Ok(branch.clone())
    }

    /// rejects the default or protected branch.
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut branches = self.branches.lock().unwrap();
        let branch = branches.get(name).ok_or_else(|| Error::BranchNotFound(name.to_string()))?;
        if branch.is_default || branch.is_protected {
            return Err(Error::BranchProtected(name.to_string()));
        }
        branches.remove(name);
        Ok(())
    }

    pub fn list(&self, options: ListOptions) -> Vec<Branch> {
        let branches = self.branches.lock().unwrap();
        let mut out: Vec<Branch> = branches
            .values()
            .filter(|b| options.include_archived || !b.is_archived)
            .filter(|b| match &options.parent_branch {
                Some(p) => b.parent_branch.as_deref() == Some(p.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));

        if let Some(offset) = options.offset {
            out = out.into_iter().skip(offset).collect();
        }
        if let Some(limit) = options.limit {
            out.truncate(limit);
        }
        out
    }

    /// rename a branch, atomically rewriting children whose `parent_branch`
    /// equals the old name.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<Branch> {
        let mut branches = self.branches.lock().unwrap();
        if branches.contains_key(new_name) {
            return Err(Error::BranchExists(new_name.to_string()));
        }
        let mut branch = branches.remove(old_name).ok_or_else(|| Error::BranchNotFound(old_name.to_string()))?;
        branch.name = new_name.to_string();
        branch.updated_at = self.now();
        branches.insert(new_name.to_string(), branch.clone());

        for child in branches.values_mut() {
            if child.parent_branch.as_deref() == Some(old_name) {
                child.parent_branch = Some(new_name.to_string());
            }
        }

        Ok(branch)
    }

    pub fn get_default(&self) -> Option<Branch> {
        self.branches.lock().unwrap().values().find(|b| b.is_default).cloned()
    }

    /// sets `name` as default, atomically unsetting the prior default
    ///.
    pub fn set_default(&self, name: &str) -> Result<Branch> {
        let mut branches = self.branches.lock().unwrap();
        if !branches.contains_key(name) {
            return Err(Error::BranchNotFound(name.to_string()));
        }
        for branch in branches.values_mut() {
            branch.is_default = branch.name == name;
        }
        Ok(branches.get(name).unwrap().clone())
    }

    /// archive a branch to cold storage under `branches/archived/<name>.json`,
    /// retaining the archival reason and actor.
    pub async fn archive(&self, name: &str, reason: &str, actor: &str) -> Result<()> {
        let branch = {
            let mut branches = self.branches.lock().unwrap();
            let branch = branches.get_mut(name).ok_or_else(|| Error::BranchNotFound(name.to_string()))?;
            branch.is_archived = true;
            branch.clone()
        };

        let record = ArchivedBranch {
            branch,
            reason: reason.to_string(),
            actor: actor.to_string(),
            archived_at: self.now(),
        };
        let serialized = serde_json::to_vec(&record).map_err(|e| Error::Invalid(format!("archive serialize: {e}")))?;
        let key = format!("branches/archived/{name}.json");
        self.archive_bucket.put(&key, serialized, Default::default()).await?;
        Ok(())
    }
}
