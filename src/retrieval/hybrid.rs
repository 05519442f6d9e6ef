//! Hybrid search combining vector and keyword search

use crate::cache::{CacheOptions, CacheReport, ComputationCache};
use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::embedding::{ensure_embeddings, Embedder, EmbeddingPrep, EmbeddingTarget};
use crate::retrieval::{
    reciprocal_rank_fusion, CosineSearch, FusionConfig, FusionError, Hit, KeywordSearch,
    LexicalQuery, LexicalSearch, VectorQuery, VectorSearch,
};
use crate::table::{id_key, Column, ColumnType, RecordSet, TableEngine};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Score column filled from vector search hits
pub const SIMILARITY_COLUMN: &str = "similarity";

/// Score column filled from keyword search hits
pub const RELEVANCE_COLUMN: &str = "bm25";

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("At least one of vector or lexical search must be enabled")]
    NoMethodEnabled,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Embedding preparation failed: {0}")]
    EmbeddingError(String),

    #[error("Vector search failed: {0}")]
    VectorSearchError(String),

    #[error("Keyword search failed: {0}")]
    KeywordSearchError(String),

    #[error("Fusion failed: {0}")]
    FusionError(#[from] FusionError),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Search timed out after {0:?}")]
    Timeout(Duration),

    #[error("Search cancelled")]
    Cancelled,
}

/// Every recognized hybrid search option
#[derive(Debug, Clone)]
pub struct HybridOptions {
    /// Run dense vector search
    pub vector: bool,
    /// Run BM25 keyword search
    pub lexical: bool,
    /// RRF smoothing constant
    pub rrf_k: f64,
    /// With both methods enabled, each fetches result_count * multiplier hits
    pub search_multiplier: usize,
    /// Attach `similarity` / `bm25` columns for the enabled methods
    pub include_scores: bool,
    pub min_similarity: Option<f64>,
    pub min_score: Option<f64>,
    pub embeddings_column: String,
    /// Compute missing embeddings through the computation cache
    pub cache_embeddings: bool,
    pub embedding_batch_size: usize,
    /// Also store the result as this table
    pub output_table: Option<String>,
    /// Replace the source table with the result
    pub in_place: bool,
    /// Bound on embedding preparation plus fetching
    pub timeout: Option<Duration>,
    pub verbose: bool,
}

impl HybridOptions {
    pub fn from_config(retrieval: &RetrievalConfig, embedding: &EmbeddingConfig) -> Self {
        Self {
            vector: retrieval.vector,
            lexical: retrieval.lexical,
            rrf_k: retrieval.rrf_k,
            search_multiplier: retrieval.search_multiplier,
            include_scores: retrieval.include_scores,
            min_similarity: retrieval.min_similarity,
            min_score: retrieval.min_score,
            embeddings_column: retrieval.embeddings_column.clone(),
            cache_embeddings: retrieval.cache_embeddings,
            embedding_batch_size: embedding.batch_size,
            output_table: None,
            in_place: false,
            timeout: retrieval.timeout_secs.map(Duration::from_secs),
            verbose: false,
        }
    }

    /// Only keyword search
    pub fn lexical_only() -> Self {
        Self {
            vector: false,
            lexical: true,
            ..Self::default()
        }
    }

    /// Only vector search
    pub fn vector_only() -> Self {
        Self {
            vector: true,
            lexical: false,
            ..Self::default()
        }
    }
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default(), &EmbeddingConfig::default())
    }
}

/// A hybrid search over one collection
#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub table: String,
    pub query: String,
    pub id_column: String,
    pub text_column: String,
    pub result_count: usize,
    pub options: HybridOptions,
}

impl HybridQuery {
    pub fn new(
        table: impl Into<String>,
        query: impl Into<String>,
        id_column: impl Into<String>,
        text_column: impl Into<String>,
        result_count: usize,
    ) -> Self {
        Self {
            table: table.into(),
            query: query.into(),
            id_column: id_column.into(),
            text_column: text_column.into(),
            result_count,
            options: HybridOptions::default(),
        }
    }

    pub fn with_options(mut self, options: HybridOptions) -> Self {
        self.options = options;
        self
    }
}

/// Fused, materialized search result
#[derive(Debug, Clone)]
pub struct HybridResult {
    /// Surviving ids, best first, one per row of `records`
    pub ids: Vec<String>,
    /// Source rows in fused order, plus any requested score columns
    pub records: RecordSet,
    /// What embedding preparation did, when vector search ran
    pub embedding: Option<EmbeddingPrep>,
}

impl HybridResult {
    /// Cache report of the embedding preparation, if it went through the cache
    pub fn cache_report(&self) -> Option<&CacheReport> {
        match &self.embedding {
            Some(EmbeddingPrep::Cached(report)) => Some(report),
            _ => None,
        }
    }
}

type Fetched = (Option<Vec<Hit>>, Option<Vec<Hit>>);

/// Hybrid searcher combining vector and keyword adapters
pub struct HybridSearcher {
    engine: Arc<dyn TableEngine>,
    vector: Option<Arc<dyn VectorSearch>>,
    lexical: Option<Arc<dyn LexicalSearch>>,
    embedder: Option<Arc<dyn Embedder>>,
    cache: Option<Arc<ComputationCache>>,
}

impl HybridSearcher {
    /// Create a searcher with no adapters attached
    pub fn new(engine: Arc<dyn TableEngine>) -> Self {
        Self {
            engine,
            vector: None,
            lexical: None,
            embedder: None,
            cache: None,
        }
    }

    /// Searcher using [`CosineSearch`] and [`KeywordSearch`] over `engine`
    pub fn local(engine: Arc<dyn TableEngine>, embedder: Arc<dyn Embedder>) -> Self {
        let vector = Arc::new(CosineSearch::new(engine.clone(), embedder.clone()));
        let lexical = Arc::new(KeywordSearch::new(engine.clone()));
        Self::new(engine)
            .with_vector_search(vector, Some(embedder))
            .with_lexical_search(lexical)
    }

    /// Attach a vector adapter. With an embedder, missing embedding columns
    /// are computed before searching.
    pub fn with_vector_search(
        mut self,
        adapter: Arc<dyn VectorSearch>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        self.vector = Some(adapter);
        self.embedder = embedder;
        self
    }

    pub fn with_lexical_search(mut self, adapter: Arc<dyn LexicalSearch>) -> Self {
        self.lexical = Some(adapter);
        self
    }

    pub fn with_cache(mut self, cache: Arc<ComputationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Perform hybrid search
    pub async fn search(&self, query: &HybridQuery) -> Result<HybridResult, SearchError> {
        let fusion_config = self.validate(query)?;

        let start = Instant::now();
        let phases = self.prepare_and_fetch(query);
        let (embedding, (vector_hits, lexical_hits)) = match query.options.timeout {
            Some(limit) => tokio::time::timeout(limit, phases)
                .await
                .map_err(|_| SearchError::Timeout(limit))??,
            None => phases.await?,
        };
        tracing::debug!("Fetched hybrid candidates in {:?}", start.elapsed());

        let ranked = self.rank(&fusion_config, vector_hits.as_deref(), lexical_hits.as_deref());

        let (ids, records) = self.materialize(
            query,
            &ranked,
            vector_hits.as_deref(),
            lexical_hits.as_deref(),
        )?;

        if query.options.in_place {
            self.store(&query.table, &records)?;
        } else if let Some(output) = &query.options.output_table {
            self.store(output, &records)?;
        }

        tracing::debug!(
            "Hybrid search on {} returned {} rows in {:?}",
            query.table,
            ids.len(),
            start.elapsed()
        );

        Ok(HybridResult {
            ids,
            records,
            embedding,
        })
    }

    /// Like [`search`](Self::search), but gives up with `SearchError::Cancelled`
    /// as soon as `cancel` completes. In-flight adapter calls are dropped.
    pub async fn search_with_cancel<C>(
        &self,
        query: &HybridQuery,
        cancel: C,
    ) -> Result<HybridResult, SearchError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.search(query) => result,
            _ = cancel => {
                tracing::debug!("Hybrid search on {} cancelled", query.table);
                Err(SearchError::Cancelled)
            }
        }
    }

    /// Checks that need no I/O
    fn validate(&self, query: &HybridQuery) -> Result<FusionConfig, SearchError> {
        let options = &query.options;

        if !options.vector && !options.lexical {
            return Err(SearchError::NoMethodEnabled);
        }
        if options.vector && self.vector.is_none() {
            return Err(SearchError::InvalidQuery(
                "Vector search enabled but no vector adapter configured".to_string(),
            ));
        }
        if options.lexical && self.lexical.is_none() {
            return Err(SearchError::InvalidQuery(
                "Lexical search enabled but no lexical adapter configured".to_string(),
            ));
        }
        if query.query.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if options.search_multiplier == 0 {
            return Err(SearchError::InvalidQuery(
                "Search multiplier must be greater than 0".to_string(),
            ));
        }
        if !options.in_place && options.output_table.as_deref() == Some(query.table.as_str()) {
            return Err(SearchError::InvalidQuery(format!(
                "Output table {} is the source table; use in_place to replace it",
                query.table
            )));
        }

        Ok(FusionConfig::new(options.rrf_k)?)
    }

    async fn prepare_and_fetch(
        &self,
        query: &HybridQuery,
    ) -> Result<(Option<EmbeddingPrep>, Fetched), SearchError> {
        if !self.engine.has_table(&query.table) {
            return Err(SearchError::InvalidQuery(format!(
                "Table {} not found",
                query.table
            )));
        }

        let embedding = if query.options.vector {
            self.prepare_embeddings(query).await?
        } else {
            None
        };

        let fetched = self.fetch(query).await?;
        Ok((embedding, fetched))
    }

    async fn prepare_embeddings(
        &self,
        query: &HybridQuery,
    ) -> Result<Option<EmbeddingPrep>, SearchError> {
        let embedder = match &self.embedder {
            Some(embedder) => embedder,
            // The adapter owns its own representation
            None => return Ok(None),
        };

        let options = &query.options;
        let cache = if options.cache_embeddings {
            self.cache.as_deref()
        } else {
            None
        };
        let target = EmbeddingTarget {
            table: &query.table,
            text_column: &query.text_column,
            embeddings_column: &options.embeddings_column,
            batch_size: options.embedding_batch_size,
        };
        let cache_options = CacheOptions {
            verbose: options.verbose,
            ..CacheOptions::default()
        };

        ensure_embeddings(
            self.engine.as_ref(),
            embedder.as_ref(),
            cache,
            &target,
            &cache_options,
        )
        .await
        .map(Some)
        .map_err(|e| SearchError::EmbeddingError(e.to_string()))
    }

    /// Run the enabled adapters; both at once when both are enabled
    async fn fetch(&self, query: &HybridQuery) -> Result<Fetched, SearchError> {
        let options = &query.options;

        match (options.vector, options.lexical) {
            (true, true) => {
                let k = query.result_count.saturating_mul(options.search_multiplier);
                let (vector_hits, lexical_hits) = tokio::try_join!(
                    self.vector_hits(query, k),
                    self.lexical_hits(query, k)
                )?;
                Ok((Some(vector_hits), Some(lexical_hits)))
            }
            (true, false) => Ok((Some(self.vector_hits(query, query.result_count).await?), None)),
            (false, true) => Ok((None, Some(self.lexical_hits(query, query.result_count).await?))),
            (false, false) => Err(SearchError::NoMethodEnabled),
        }
    }

    async fn vector_hits(&self, query: &HybridQuery, k: usize) -> Result<Vec<Hit>, SearchError> {
        let adapter = self.vector.as_ref().ok_or_else(|| {
            SearchError::VectorSearchError("No vector adapter configured".to_string())
        })?;

        let request = VectorQuery {
            table: &query.table,
            query: &query.query,
            id_column: &query.id_column,
            embeddings_column: &query.options.embeddings_column,
            k,
            min_similarity: query.options.min_similarity,
        };

        adapter
            .vector_search(&request)
            .await
            .map_err(|e| SearchError::VectorSearchError(e.to_string()))
    }

    async fn lexical_hits(&self, query: &HybridQuery, k: usize) -> Result<Vec<Hit>, SearchError> {
        let adapter = self.lexical.as_ref().ok_or_else(|| {
            SearchError::KeywordSearchError("No lexical adapter configured".to_string())
        })?;

        let request = LexicalQuery {
            table: &query.table,
            query: &query.query,
            id_column: &query.id_column,
            text_column: &query.text_column,
            k,
            min_score: query.options.min_score,
        };

        adapter
            .lexical_search(&request)
            .await
            .map_err(|e| SearchError::KeywordSearchError(e.to_string()))
    }

    /// Full candidate order, best first. Fusion only runs when there are two
    /// lists to fuse; truncation happens after unknown ids are dropped.
    fn rank(
        &self,
        fusion_config: &FusionConfig,
        vector_hits: Option<&[Hit]>,
        lexical_hits: Option<&[Hit]>,
    ) -> Vec<String> {
        let ids = |hits: &[Hit]| -> Vec<String> { hits.iter().map(|h| h.id.clone()).collect() };

        match (vector_hits, lexical_hits) {
            (Some(vector_hits), Some(lexical_hits)) => {
                let lists = [ids(vector_hits), ids(lexical_hits)];
                reciprocal_rank_fusion(&lists, fusion_config)
                    .into_iter()
                    .map(|hit| hit.id)
                    .collect()
            }
            (Some(single), None) | (None, Some(single)) => ids(single),
            (None, None) => Vec::new(),
        }
    }

    /// Copy the first `result_count` ranked rows present in the source table
    /// into a new record set
    fn materialize(
        &self,
        query: &HybridQuery,
        ranked: &[String],
        vector_hits: Option<&[Hit]>,
        lexical_hits: Option<&[Hit]>,
    ) -> Result<(Vec<String>, RecordSet), SearchError> {
        let source = self
            .engine
            .table(&query.table)
            .map_err(|e| SearchError::StorageError(e.to_string()))?;
        let id_idx = source.column_index(&query.id_column).ok_or_else(|| {
            SearchError::InvalidQuery(format!(
                "Column {} not found in {}",
                query.id_column, query.table
            ))
        })?;

        let mut columns = source.columns().to_vec();
        let mut score_columns: Vec<(usize, HashMap<&str, Option<f64>>)> = Vec::new();
        if query.options.include_scores {
            for (name, hits) in [(SIMILARITY_COLUMN, vector_hits), (RELEVANCE_COLUMN, lexical_hits)] {
                if let Some(hits) = hits {
                    let idx = match columns.iter().position(|c| c.name == name) {
                        Some(idx) => idx,
                        None => {
                            columns.push(Column::new(name, ColumnType::Float));
                            columns.len() - 1
                        }
                    };
                    score_columns.push((idx, score_map(hits)));
                }
            }
        }

        let mut rows_by_id: HashMap<String, &Vec<Value>> = HashMap::new();
        for row in source.rows() {
            rows_by_id.entry(id_key(&row[id_idx])).or_insert(row);
        }

        let width = columns.len();
        let mut records = RecordSet::new(columns);
        let mut ids = Vec::with_capacity(query.result_count.min(ranked.len()));
        for id in ranked {
            if ids.len() == query.result_count {
                break;
            }
            let Some(row) = rows_by_id.get(id) else {
                tracing::warn!("Search returned id {} not present in {}", id, query.table);
                continue;
            };

            let mut row = (*row).clone();
            row.resize(width, Value::Null);
            for (idx, scores) in &score_columns {
                // Ids a method filtered out get null, not exclusion
                row[*idx] = scores
                    .get(id.as_str())
                    .copied()
                    .flatten()
                    .map(Value::from)
                    .unwrap_or(Value::Null);
            }

            records
                .push_row(row)
                .map_err(|e| SearchError::StorageError(e.to_string()))?;
            ids.push(id.clone());
        }

        Ok((ids, records))
    }

    fn store(&self, table: &str, records: &RecordSet) -> Result<(), SearchError> {
        self.engine
            .put_table(table, records.clone())
            .map_err(|e| SearchError::StorageError(e.to_string()))
    }
}

/// First score seen per id
fn score_map(hits: &[Hit]) -> HashMap<&str, Option<f64>> {
    let mut scores = HashMap::with_capacity(hits.len());
    for hit in hits {
        scores.entry(hit.id.as_str()).or_insert(hit.score);
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MemoryEngine;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Adapter replaying a fixed ranked list
    struct FixedHits {
        hits: Vec<Hit>,
        calls: AtomicUsize,
        delay: Option<Duration>,
        fail: bool,
        finished: AtomicBool,
    }

    impl FixedHits {
        fn new(hits: &[(&str, f64)]) -> Self {
            Self {
                hits: hits.iter().map(|(id, s)| Hit::new(*id, Some(*s))).collect(),
                calls: AtomicUsize::new(0),
                delay: None,
                fail: false,
                finished: AtomicBool::new(false),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[])
            }
        }

        fn slow(hits: &[(&str, f64)], delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new(hits)
            }
        }

        async fn respond(&self, k: usize) -> anyhow::Result<Vec<Hit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("adapter unavailable");
            }
            self.finished.store(true, Ordering::SeqCst);
            Ok(self.hits.iter().take(k).cloned().collect())
        }
    }

    #[async_trait]
    impl VectorSearch for FixedHits {
        async fn vector_search(&self, query: &VectorQuery<'_>) -> anyhow::Result<Vec<Hit>> {
            self.respond(query.k).await
        }
    }

    #[async_trait]
    impl LexicalSearch for FixedHits {
        async fn lexical_search(&self, query: &LexicalQuery<'_>) -> anyhow::Result<Vec<Hit>> {
            self.respond(query.k).await
        }
    }

    fn engine() -> Arc<MemoryEngine> {
        let engine = Arc::new(MemoryEngine::new());
        let rows = ["a", "b", "c", "d"]
            .iter()
            .map(|id| vec![json!(id), json!(format!("text of {}", id))])
            .collect();
        engine
            .put_table(
                "docs",
                RecordSet::with_rows(
                    vec![
                        Column::new("id", ColumnType::Text),
                        Column::new("body", ColumnType::Text),
                    ],
                    rows,
                )
                .unwrap(),
            )
            .unwrap();
        engine
    }

    fn searcher(
        engine: Arc<MemoryEngine>,
        vector: Arc<FixedHits>,
        lexical: Arc<FixedHits>,
    ) -> HybridSearcher {
        HybridSearcher::new(engine)
            .with_vector_search(vector, None)
            .with_lexical_search(lexical)
    }

    fn query(options: HybridOptions) -> HybridQuery {
        HybridQuery::new("docs", "text", "id", "body", 3).with_options(options)
    }

    #[tokio::test]
    async fn test_fuses_both_lists() {
        let vector = Arc::new(FixedHits::new(&[("a", 0.9), ("b", 0.8), ("c", 0.7)]));
        let lexical = Arc::new(FixedHits::new(&[("b", 7.0), ("c", 5.0), ("a", 1.0)]));
        let searcher = searcher(engine(), vector.clone(), lexical.clone());

        let result = searcher.search(&query(HybridOptions::default())).await.unwrap();

        assert_eq!(result.ids, vec!["b", "c", "a"]);
        assert_eq!(result.records.rows()[0][0], json!("b"));
        assert_eq!(result.records.columns().len(), 2);
        assert_eq!(vector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(lexical.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_truncates_to_result_count() {
        let vector = Arc::new(FixedHits::new(&[("a", 0.9), ("b", 0.8)]));
        let lexical = Arc::new(FixedHits::new(&[("c", 3.0), ("d", 2.0)]));
        let searcher = searcher(engine(), vector, lexical);

        let mut q = query(HybridOptions::default());
        q.result_count = 2;
        let result = searcher.search(&q).await.unwrap();
        assert_eq!(result.ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_no_method_enabled_fails_before_adapters() {
        let vector = Arc::new(FixedHits::new(&[("a", 0.9)]));
        let lexical = Arc::new(FixedHits::new(&[("a", 1.0)]));
        let searcher = searcher(engine(), vector.clone(), lexical.clone());

        let options = HybridOptions {
            vector: false,
            lexical: false,
            ..HybridOptions::default()
        };
        let err = searcher.search(&query(options)).await.unwrap_err();

        assert!(matches!(err, SearchError::NoMethodEnabled));
        assert_eq!(vector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(lexical.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_method_skips_fusion() {
        let vector = Arc::new(FixedHits::new(&[("a", 0.9)]));
        let lexical = Arc::new(FixedHits::new(&[("d", 9.0), ("a", 4.0), ("c", 1.0)]));
        let searcher = searcher(engine(), vector.clone(), lexical);

        let result = searcher
            .search(&query(HybridOptions::lexical_only()))
            .await
            .unwrap();

        assert_eq!(result.ids, vec!["d", "a", "c"]);
        assert_eq!(vector.calls.load(Ordering::SeqCst), 0);
        assert!(result.embedding.is_none());
    }

    #[tokio::test]
    async fn test_adapter_failure_fails_search() {
        let vector = Arc::new(FixedHits::failing());
        let lexical = Arc::new(FixedHits::new(&[("a", 1.0)]));
        let searcher = searcher(engine(), vector, lexical);

        let err = searcher.search(&query(HybridOptions::default())).await.unwrap_err();
        assert!(matches!(err, SearchError::VectorSearchError(_)));
    }

    #[tokio::test]
    async fn test_failure_drops_slow_sibling() {
        let vector = Arc::new(FixedHits::failing());
        let lexical = Arc::new(FixedHits::slow(&[("a", 1.0)], Duration::from_secs(30)));
        let searcher = searcher(engine(), vector, lexical.clone());

        let started = Instant::now();
        let err = searcher.search(&query(HybridOptions::default())).await.unwrap_err();

        assert!(matches!(err, SearchError::VectorSearchError(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!lexical.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_scores_reattached_with_nulls() {
        // "c" was cut from the vector list by its own threshold
        let vector = Arc::new(FixedHits::new(&[("a", 0.9), ("b", 0.8)]));
        let lexical = Arc::new(FixedHits::new(&[("c", 7.5), ("a", 2.0)]));
        let searcher = searcher(engine(), vector, lexical);

        let options = HybridOptions {
            include_scores: true,
            ..HybridOptions::default()
        };
        let result = searcher.search(&query(options)).await.unwrap();

        let records = &result.records;
        let sim = records.column_index(SIMILARITY_COLUMN).unwrap();
        let bm25 = records.column_index(RELEVANCE_COLUMN).unwrap();
        assert_eq!(result.ids, vec!["a", "c", "b"]);

        assert_eq!(records.rows()[0][sim], json!(0.9));
        assert_eq!(records.rows()[0][bm25], json!(2.0));
        assert_eq!(records.rows()[1][sim], Value::Null);
        assert_eq!(records.rows()[1][bm25], json!(7.5));
        assert_eq!(records.rows()[2][bm25], Value::Null);
    }

    #[tokio::test]
    async fn test_zero_results_keep_shape() {
        let vector = Arc::new(FixedHits::new(&[]));
        let lexical = Arc::new(FixedHits::new(&[]));
        let searcher = searcher(engine(), vector, lexical);

        let options = HybridOptions {
            include_scores: true,
            ..HybridOptions::default()
        };
        let result = searcher.search(&query(options)).await.unwrap();

        assert!(result.ids.is_empty());
        assert!(result.records.is_empty());
        let names: Vec<&str> = result.records.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "body", SIMILARITY_COLUMN, RELEVANCE_COLUMN]);
    }

    #[tokio::test]
    async fn test_source_untouched_unless_in_place() {
        let engine = engine();
        let vector = Arc::new(FixedHits::new(&[("b", 0.9)]));
        let lexical = Arc::new(FixedHits::new(&[("b", 1.0)]));
        let searcher = searcher(engine.clone(), vector, lexical);

        let options = HybridOptions {
            output_table: Some("docs_hits".to_string()),
            ..HybridOptions::default()
        };
        searcher.search(&query(options)).await.unwrap();
        assert_eq!(engine.table("docs").unwrap().len(), 4);
        assert_eq!(engine.table("docs_hits").unwrap().len(), 1);

        let options = HybridOptions {
            in_place: true,
            include_scores: true,
            ..HybridOptions::default()
        };
        searcher.search(&query(options.clone())).await.unwrap();
        assert_eq!(engine.table("docs").unwrap().len(), 1);

        // Score columns already present are overwritten, not duplicated
        searcher.search(&query(options)).await.unwrap();
        assert_eq!(engine.table("docs").unwrap().columns().len(), 4);
    }

    #[tokio::test]
    async fn test_output_table_must_differ() {
        let vector = Arc::new(FixedHits::new(&[("a", 0.9)]));
        let lexical = Arc::new(FixedHits::new(&[("a", 1.0)]));
        let searcher = searcher(engine(), vector, lexical);

        let options = HybridOptions {
            output_table: Some("docs".to_string()),
            ..HybridOptions::default()
        };
        assert!(matches!(
            searcher.search(&query(options)).await,
            Err(SearchError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_ids_skipped() {
        let vector = Arc::new(FixedHits::new(&[("zzz", 0.9), ("a", 0.5)]));
        let searcher = HybridSearcher::new(engine()).with_vector_search(vector, None);

        let result = searcher
            .search(&query(HybridOptions::vector_only()))
            .await
            .unwrap();
        assert_eq!(result.ids, vec!["a"]);
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_ids_do_not_shrink_result() {
        let vector = Arc::new(FixedHits::new(&[("zzz", 0.9), ("a", 0.5)]));
        let lexical = Arc::new(FixedHits::new(&[("zzz", 3.0), ("a", 1.0)]));
        let searcher = searcher(engine(), vector, lexical);

        let options = HybridOptions {
            search_multiplier: 2,
            ..HybridOptions::default()
        };
        let mut q = query(options);
        q.result_count = 1;

        let result = searcher.search(&q).await.unwrap();
        assert_eq!(result.ids, vec!["a"]);
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let vector = Arc::new(FixedHits::slow(&[("a", 0.9)], Duration::from_secs(30)));
        let lexical = Arc::new(FixedHits::new(&[("a", 1.0)]));
        let searcher = searcher(engine(), vector, lexical);

        let options = HybridOptions {
            timeout: Some(Duration::from_millis(50)),
            ..HybridOptions::default()
        };
        assert!(matches!(
            searcher.search(&query(options)).await,
            Err(SearchError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel() {
        let vector = Arc::new(FixedHits::slow(&[("a", 0.9)], Duration::from_secs(30)));
        let lexical = Arc::new(FixedHits::slow(&[("a", 1.0)], Duration::from_secs(30)));
        let searcher = searcher(engine(), vector.clone(), lexical);

        let result = searcher
            .search_with_cancel(
                &query(HybridOptions::default()),
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await;

        assert!(matches!(result, Err(SearchError::Cancelled)));
        assert_eq!(vector.calls.load(Ordering::SeqCst), 1);
        assert!(!vector.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_adapter() {
        let searcher = HybridSearcher::new(engine());
        assert!(matches!(
            searcher.search(&query(HybridOptions::lexical_only())).await,
            Err(SearchError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_options_follow_config() {
        let retrieval = RetrievalConfig {
            lexical: false,
            rrf_k: 10.0,
            timeout_secs: Some(3),
            ..RetrievalConfig::default()
        };
        let options = HybridOptions::from_config(&retrieval, &EmbeddingConfig::default());

        assert!(options.vector);
        assert!(!options.lexical);
        assert_eq!(options.rrf_k, 10.0);
        assert_eq!(options.timeout, Some(Duration::from_secs(3)));
        assert_eq!(options.embedding_batch_size, 32);
    }
}
