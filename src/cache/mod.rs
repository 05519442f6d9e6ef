//! Fingerprinted computation cache
//!
//! Runs a named computation at most once per distinct (target, configuration,
//! logic) triple, persists the table it produced and replays it later.

mod fingerprint;
mod index;

pub use fingerprint::{fingerprint, CacheRequest};
pub use index::{CacheEntry, CacheIndex, JsonIndexFile};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::table::TableEngine;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// File name of the index document inside the cache directory
pub const INDEX_FILE: &str = "index.json";

/// Source of the current time in milliseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Per-call cache options
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Entries older than this are recomputed
    pub ttl: Option<Duration>,
    /// Recompute even when a fresh entry exists
    pub force: bool,
    /// Log hits and writes at info level
    pub verbose: bool,
}

impl CacheOptions {
    /// Defaults from the `[cache]` configuration section
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            ttl: config.default_ttl_secs.map(Duration::from_secs),
            force: false,
            verbose: config.verbose,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }
}

/// How a `run` call was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No entry existed; the work ran
    Miss,
    /// The entry was past its TTL or its payload was gone; the work ran
    Expired,
    /// The caller forced recomputation; the work ran
    Forced,
    /// The stored payload was replayed
    Hit,
}

impl CacheStatus {
    pub fn is_hit(self) -> bool {
        self == CacheStatus::Hit
    }
}

/// Outcome of one `run` call
#[derive(Debug, Clone)]
pub struct CacheReport {
    pub fingerprint: String,
    pub status: CacheStatus,
    /// Duration of the computation (the original one on a hit)
    pub duration_ms: u64,
    /// Payload file, if the computation produced a table
    pub file: Option<PathBuf>,
    /// Time the replay saved compared to running the work
    pub saved_ms: u64,
    /// Time spent running the work and writing the new entry
    pub spent_ms: u64,
}

/// Running totals across cache calls, aggregated by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub saved_ms: u64,
    pub spent_ms: u64,
}

impl CacheMetrics {
    pub fn record(&mut self, report: &CacheReport) {
        if report.status.is_hit() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        self.saved_ms += report.saved_ms;
        self.spent_ms += report.spent_ms;
    }
}

/// Computation cache over a [`CacheIndex`] and a payload directory
pub struct ComputationCache {
    dir: PathBuf,
    index: Arc<dyn CacheIndex>,
    clock: Arc<dyn Clock>,
}

impl ComputationCache {
    /// Open a cache rooted at `dir`, with a JSON index at `dir/index.json`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let index = JsonIndexFile::open(dir.join(INDEX_FILE))?;
        Ok(Self::with_index(dir, Arc::new(index)))
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::open(config.dir.clone())
    }

    /// Cache using a caller-supplied index
    pub fn with_index(dir: PathBuf, index: Arc<dyn CacheIndex>) -> Self {
        Self {
            dir,
            index,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for creation times and TTL checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &Arc<dyn CacheIndex> {
        &self.index
    }

    /// Replay the cached table for `request`, or run `work` and cache its output.
    ///
    /// `work` is expected to leave its result in `engine` as the table named
    /// `request.target`. If it leaves no such table the entry records no file
    /// and later hits are no-ops.
    pub async fn run<F, Fut>(
        &self,
        engine: &dyn TableEngine,
        request: &CacheRequest,
        options: &CacheOptions,
        work: F,
    ) -> Result<CacheReport>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let fingerprint = request.fingerprint()?;
        let existing = self.index.get(&fingerprint)?;

        let status = match existing {
            None => CacheStatus::Miss,
            Some(_) if options.force => CacheStatus::Forced,
            Some(entry) => {
                let expired = options
                    .ttl
                    .map(|ttl| {
                        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                        entry.is_expired(ttl_ms, self.clock.now_ms())
                    })
                    .unwrap_or(false);

                if expired {
                    CacheStatus::Expired
                } else if let Some(report) = self.replay(engine, request, &fingerprint, &entry, options)? {
                    return Ok(report);
                } else {
                    CacheStatus::Expired
                }
            }
        };

        tracing::debug!(
            "Cache {:?} for {} ({})",
            status,
            request.target,
            &fingerprint[..12]
        );
        self.compute(engine, request, fingerprint, status, options, work)
            .await
    }

    /// Load the stored payload. Returns `None` when the payload file is gone.
    fn replay(
        &self,
        engine: &dyn TableEngine,
        request: &CacheRequest,
        fingerprint: &str,
        entry: &CacheEntry,
        options: &CacheOptions,
    ) -> Result<Option<CacheReport>> {
        let start = Instant::now();

        let file = match &entry.file {
            None => None,
            Some(file) => {
                let path = PathBuf::from(file);
                if !path.exists() {
                    tracing::warn!(
                        "Cached payload {} for {} is missing, recomputing",
                        path.display(),
                        request.target
                    );
                    return Ok(None);
                }
                if entry.is_geospatial {
                    engine.load_geospatial(&request.target, &path)?;
                } else {
                    engine.load_tabular(&request.target, &path)?;
                }
                Some(path)
            }
        };

        let load_ms = start.elapsed().as_millis() as u64;
        let saved_ms = entry.duration_ms.saturating_sub(load_ms);

        if options.verbose {
            tracing::info!(
                "Found {} in cache, loaded in {}ms (saved {}ms)",
                request.target,
                load_ms,
                saved_ms
            );
        } else {
            tracing::debug!("Replayed {} from cache in {}ms", request.target, load_ms);
        }

        Ok(Some(CacheReport {
            fingerprint: fingerprint.to_string(),
            status: CacheStatus::Hit,
            duration_ms: entry.duration_ms,
            file,
            saved_ms,
            spent_ms: 0,
        }))
    }

    async fn compute<F, Fut>(
        &self,
        engine: &dyn TableEngine,
        request: &CacheRequest,
        fingerprint: String,
        status: CacheStatus,
        options: &CacheOptions,
        work: F,
    ) -> Result<CacheReport>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let start = Instant::now();
        work().await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (file, is_geospatial) = if engine.has_table(&request.target) {
            let is_geospatial = engine
                .column_types(&request.target)?
                .iter()
                .any(|c| c.ty == crate::table::ColumnType::Geometry);

            let path = self.payload_path(&fingerprint, is_geospatial);
            if is_geospatial {
                engine.store_geospatial(&request.target, &path)?;
            } else {
                engine.store_tabular(&request.target, &path)?;
            }
            (Some(path), is_geospatial)
        } else {
            (None, false)
        };

        let entry = CacheEntry {
            file: file.as_ref().map(|p| p.display().to_string()),
            created_at: self.clock.now_ms(),
            duration_ms,
            is_geospatial,
        };
        self.index.put(&fingerprint, entry)?;

        let spent_ms = start.elapsed().as_millis() as u64;
        if options.verbose {
            tracing::info!(
                "Cached {} in {}ms ({}ms computing)",
                request.target,
                spent_ms,
                duration_ms
            );
        } else {
            tracing::debug!("Cached {} ({:?})", request.target, status);
        }

        Ok(CacheReport {
            fingerprint,
            status,
            duration_ms,
            file,
            saved_ms: 0,
            spent_ms,
        })
    }

    fn payload_path(&self, fingerprint: &str, is_geospatial: bool) -> PathBuf {
        let extension = if is_geospatial { "geojson" } else { "tbl.zst" };
        self.dir.join(format!("{}.{}", fingerprint, extension))
    }
}
