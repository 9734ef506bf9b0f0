//! actorfs - a tiered, content-addressable virtual filesystem engine
//!
//! a POSIX-shaped file layer backed by a content-addressable store and a
//! hot/warm/cold blob engine, with git-like copy-on-write branching layered
//! on top.
//!
//! # Core concepts
//!
//! - **Blob**: content-addressed file data, placed across hot (embedded row
//!   store), warm (bucket), and cold (bucket, possibly bucket-aliased with
//!   warm) tiers by size and access pattern.
//! - **Entry**: a file, directory, or symlink row in the metadata store,
//!   addressed by path and referencing a blob by id.
//! - **Branch**: a named, copy-on-write overlay over the metadata store,
//!   with its own owned blocks until committed.
//!
//! # Example usage
//!
//! ```no_run
//! use actorfs::config::Config;
//! use actorfs::fs::FsLayer;
//!
//! // construction of `FsLayer` is left to the embedding application, which
//! // supplies a `MetadataStore` and `TierEngine` wired to concrete storage
//! // backends (see `storage::memory` for an in-memory reference wiring).
//! let _ = Config::default();
//! ```

pub mod branch;
pub mod config;
pub mod error;
pub mod fs;
pub mod hash;
pub mod metadata;
pub mod object;
pub mod pattern;
pub mod storage;
pub mod tier;
pub mod util;
pub mod watch;
mod zlib;

pub use config::Config;
pub use error::{Error, Result};
pub use fs::{FileHandle, FsLayer};
pub use hash::{compute_hash, Algorithm, Hash};
pub use metadata::{Entry, EntryType, MetadataStore};
pub use tier::{Tier, TierEngine};
