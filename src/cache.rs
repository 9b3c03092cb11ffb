//! Directory-backed cache for expensive per-image and per-pair artifacts.
//!
//! Keys are deterministic strings derived from image identities and the
//! active thresholds, so a run with the same inputs addresses the same
//! entries. The cache never fails the pipeline: a missing, unreadable or
//! undecodable entry is a miss, and a failed write is skipped. Written by
//! the single reconstruction worker only.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Content-addressed storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create cache directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load a cached value. Any failure degrades to a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => return None,
        };
        match bincode::deserialize_from(BufReader::new(file)) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(err) => {
                warn!(key, %err, "unreadable cache entry, recomputing");
                None
            }
        }
    }

    /// Persist a value. Failures are logged and skipped.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) {
        let path = self.path_for(key);
        let file = match File::create(&path) {
            Ok(f) => f,
            Err(err) => {
                warn!(key, %err, "cannot create cache entry, skipping persist");
                return;
            }
        };
        if let Err(err) = bincode::serialize_into(BufWriter::new(file), value) {
            warn!(key, %err, "cache write failed, skipping persist");
            let _ = fs::remove_file(&path);
        }
    }

    /// Whether an entry exists on disk (it may still fail to decode).
    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.root.join(format!("{sanitized}.bin"))
    }
}
