//! Persisted fingerprint -> cache entry mapping

use crate::error::{Result, RetraceError};
use crate::table::codec::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Metadata for one cached computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Payload location, `None` when the work produced no table
    pub file: Option<String>,
    /// Milliseconds since the Unix epoch when the entry was computed
    #[serde(rename = "creation")]
    pub created_at: i64,
    /// Wall-clock time of the original computation
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    /// Payload is GeoJSON rather than tabular
    #[serde(rename = "geo")]
    pub is_geospatial: bool,
}

impl CacheEntry {
    /// True when the entry is older than `ttl_ms` at `now_ms`.
    /// A TTL beyond `i64::MAX` milliseconds never expires.
    pub fn is_expired(&self, ttl_ms: u64, now_ms: i64) -> bool {
        match i64::try_from(ttl_ms) {
            Ok(ttl_ms) => now_ms.saturating_sub(self.created_at) > ttl_ms,
            Err(_) => false,
        }
    }
}

/// Storage for cache entries, keyed by fingerprint.
///
/// At most one entry exists per fingerprint; `put` replaces atomically.
pub trait CacheIndex: Send + Sync {
    fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;

    fn put(&self, fingerprint: &str, entry: CacheEntry) -> Result<()>;

    fn remove(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;

    fn entries(&self) -> Result<BTreeMap<String, CacheEntry>>;
}

/// Cache index kept as a single JSON document.
///
/// Every write re-reads the document, applies the change and rewrites the
/// whole file. Writes from one process are serialized by an internal lock.
pub struct JsonIndexFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonIndexFile {
    /// Open the index at `path`, creating its directory if needed.
    ///
    /// A missing file is an empty index; it is created on first write.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RetraceError::Io {
                source: e,
                context: format!("Failed to create cache directory: {}", parent.display()),
            })?;
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<BTreeMap<String, CacheEntry>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| RetraceError::Io {
            source: e,
            context: format!("Failed to read cache index: {}", self.path.display()),
        })?;

        serde_json::from_str(&content).map_err(|e| RetraceError::CorruptCacheIndex {
            path: self.path.clone(),
            source: e,
        })
    }

    fn write_document(&self, document: &BTreeMap<String, CacheEntry>) -> Result<()> {
        let content = serde_json::to_vec_pretty(document).map_err(|e| RetraceError::Json {
            source: e,
            context: "Failed to serialize cache index".to_string(),
        })?;
        write_atomic(&self.path, &content)
    }

    fn modify<T>(&self, f: impl FnOnce(&mut BTreeMap<String, CacheEntry>) -> T) -> Result<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| RetraceError::Storage("Cache index lock poisoned".to_string()))?;

        let mut document = self.read_document()?;
        let out = f(&mut document);
        self.write_document(&document)?;
        Ok(out)
    }
}

impl CacheIndex for JsonIndexFile {
    fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        Ok(self.read_document()?.remove(fingerprint))
    }

    fn put(&self, fingerprint: &str, entry: CacheEntry) -> Result<()> {
        self.modify(|document| {
            document.insert(fingerprint.to_string(), entry);
        })
    }

    fn remove(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        self.modify(|document| document.remove(fingerprint))
    }

    fn entries(&self) -> Result<BTreeMap<String, CacheEntry>> {
        self.read_document()
    }
}
