use std::path::PathBuf;

use crate::hash::Hash;

/// error type for all actorfs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --- filesystem ---
    #[error("no such file or directory: {0}")]
    NoEnt(String),

    #[error("file exists: {0}")]
    Exist(String),

    #[error("is a directory: {0}")]
    IsDir(String),

    #[error("not a directory: {0}")]
    NotDir(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("permission denied: {0}")]
    Access(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("too many levels of symbolic links: {0}")]
    Loop(String),

    // --- CAS / git-object framing ---
    #[error("empty data")]
    EmptyData,

    #[error("missing null byte in object header")]
    MissingNullByte,

    #[error("missing space in object header")]
    MissingSpace,

    #[error("invalid object type: {0}")]
    InvalidType(String),

    #[error("invalid object size: {0}")]
    InvalidSize(String),

    #[error("declared size {declared} does not match content length {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("corrupted object {0}")]
    CorruptedObject(Hash),

    // --- compression ---
    #[error("invalid compression level: {0}")]
    InvalidLevel(i32),

    #[error("invalid memory level: {0}")]
    InvalidMemLevel(i32),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("invalid zlib header")]
    InvalidZlibHeader,

    #[error("invalid zlib checksum")]
    InvalidChecksum,

    #[error("truncated compressed data")]
    TruncatedData,

    #[error("corrupted compressed data: {0}")]
    CorruptedData(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    // --- paging / eviction ---
    #[error("range [{offset}, {offset}+{length}) out of bounds for blob of size {size}")]
    RangeOutOfBounds { offset: u64, length: u64, size: u64 },

    #[error("missing page chunk: {0}")]
    MissingPageChunk(String),

    // --- branching ---
    #[error("branch already exists: {0}")]
    BranchExists(String),

    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("cannot delete default or protected branch: {0}")]
    BranchProtected(String),

    // --- metadata / blob store ---
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    // --- identifier sanitization ---
    #[error("identifier sanitizes to empty string")]
    EmptyIdentifier,

    // --- collaborator surfaces: CAS/bucket/row-store drivers ---
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage driver error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
