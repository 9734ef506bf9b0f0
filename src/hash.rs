//! content hashing: multi-algorithm digests, fanout paths, and an
//! optional bounded cache for repeated small-object hashing.

use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{Error, Result};

/// hash algorithms this store can produce object identifiers with. `Sha1` is the
/// default, kept for parity with git's own object naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    /// length of the hex-encoded digest for this algorithm.
    pub const fn hex_len(self) -> usize {
        match self {
            Algorithm::Sha1 => 40,
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    fn from_hex_len(len: usize) -> Option<Algorithm> {
        match len {
            40 => Some(Algorithm::Sha1),
            64 => Some(Algorithm::Sha256),
            96 => Some(Algorithm::Sha384),
            128 => Some(Algorithm::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

/// a content hash: the digest bytes plus the algorithm that produced them.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl Hash {
    pub fn new(algorithm: Algorithm, bytes: Vec<u8>) -> Self {
        Hash { algorithm, bytes }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// parse a hash from its hex string, inferring the algorithm from its length.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let algorithm = Algorithm::from_hex_len(hex_str.len())
            .ok_or_else(|| Error::InvalidHash(hex_str.to_string()))?;
        let bytes =
            hex::decode(hex_str).map_err(|_| Error::InvalidHash(hex_str.to_string()))?;
        Ok(Hash { algorithm, bytes })
    }

    /// two-level fanout path components: `(first two hex chars, remaining hex chars)`.
    /// used to keep any single storage directory from holding too many entries.
    pub fn to_path_components(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[0..2].to_string(), hex[2..].to_string())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}:{})", self.algorithm, self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// compute a one-shot digest of `data` under `algorithm`.
pub fn compute_hash(algorithm: Algorithm, data: &[u8]) -> Hash {
    let bytes = match algorithm {
        Algorithm::Sha1 => Sha1::digest(data).to_vec(),
        Algorithm::Sha256 => Sha256::digest(data).to_vec(),
        Algorithm::Sha384 => Sha384::digest(data).to_vec(),
        Algorithm::Sha512 => Sha512::digest(data).to_vec(),
    };
    Hash::new(algorithm, bytes)
}

enum HasherState {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

/// streaming digest, for hashing content incrementally without buffering it whole.
pub struct StreamingHasher {
    algorithm: Algorithm,
    state: HasherState,
    bytes_processed: u64,
}

impl StreamingHasher {
    pub fn new(algorithm: Algorithm) -> Self {
        let state = match algorithm {
            Algorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            Algorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            Algorithm::Sha384 => HasherState::Sha384(Sha384::new()),
            Algorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        StreamingHasher {
            algorithm,
            state,
            bytes_processed: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.state {
            HasherState::Sha1(h) => h.update(chunk),
            HasherState::Sha256(h) => h.update(chunk),
            HasherState::Sha384(h) => h.update(chunk),
            HasherState::Sha512(h) => h.update(chunk),
        }
        self.bytes_processed += chunk.len() as u64;
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    pub fn finalize(self) -> Hash {
        let bytes = match self.state {
            HasherState::Sha1(h) => h.finalize().to_vec(),
            HasherState::Sha256(h) => h.finalize().to_vec(),
            HasherState::Sha384(h) => h.finalize().to_vec(),
            HasherState::Sha512(h) => h.finalize().to_vec(),
        };
        Hash::new(self.algorithm, bytes)
    }
}

/// bounded LRU cache mapping a short fingerprint of an input to its already-computed
/// hashes, keyed further by algorithm. disabled by default: most objects are hashed
/// once, and the fingerprint (first 1 KiB + length) only pays off for small, repeatedly
/// rehashed inputs such as directory listings hashed under several algorithms.
pub struct HashCache {
    entries: LruCache<Fingerprint, Vec<(Algorithm, Hash)>>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct Fingerprint(Vec<u8>, u64);

impl HashCache {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        HashCache {
            entries: LruCache::new(cap),
        }
    }

    fn fingerprint(data: &[u8]) -> Fingerprint {
        let prefix_len = data.len().min(1024);
        Fingerprint(data[..prefix_len].to_vec(), data.len() as u64)
    }

    /// compute (or recall) the hash of `data` under `algorithm`.
    pub fn compute(&mut self, algorithm: Algorithm, data: &[u8]) -> Hash {
        let fp = Self::fingerprint(data);
        if let Some(hashes) = self.entries.get(&fp) {
            if let Some((_, h)) = hashes.iter().find(|(a, _)| *a == algorithm) {
                return h.clone();
            }
        }

        let hash = compute_hash(algorithm, data);
        match self.entries.get_mut(&fp) {
            Some(hashes) => hashes.push((algorithm, hash.clone())),
            None => {
                self.entries.put(fp, vec![(algorithm, hash.clone())]);
            }
        }
        hash
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
