//! Hybrid Retrieval
//!
//! Dense vector search and BM25 keyword search run as independent adapters;
//! `HybridSearcher` fans out to them and merges their rankings with
//! Reciprocal Rank Fusion.

mod fusion;
mod hybrid;
mod keyword_index;
mod vector;

pub use fusion::{fuse, reciprocal_rank_fusion, FusedHit, FusionConfig, FusionError, DEFAULT_RRF_K};
pub use hybrid::{
    HybridOptions, HybridQuery, HybridResult, HybridSearcher, SearchError, RELEVANCE_COLUMN,
    SIMILARITY_COLUMN,
};
pub use keyword_index::{KeywordIndex, KeywordIndexError, KeywordSearch, KeywordSearchResult};
pub use vector::{cosine_similarity, CosineSearch};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One entry of a ranked list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Document id, as produced by [`crate::table::id_key`]
    pub id: String,
    /// Method-specific score (similarity or relevance), if the method has one
    pub score: Option<f64>,
}

impl Hit {
    pub fn new(id: impl Into<String>, score: Option<f64>) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Dense similarity search request
#[derive(Debug, Clone)]
pub struct VectorQuery<'a> {
    pub table: &'a str,
    pub query: &'a str,
    pub id_column: &'a str,
    pub embeddings_column: &'a str,
    pub k: usize,
    /// Hits below this similarity are dropped
    pub min_similarity: Option<f64>,
}

/// BM25 keyword search request
#[derive(Debug, Clone)]
pub struct LexicalQuery<'a> {
    pub table: &'a str,
    pub query: &'a str,
    pub id_column: &'a str,
    pub text_column: &'a str,
    pub k: usize,
    /// Hits below this relevance are dropped
    pub min_score: Option<f64>,
}

/// Vector similarity adapter; returns hits best first
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn vector_search(&self, query: &VectorQuery<'_>) -> anyhow::Result<Vec<Hit>>;
}

/// Keyword relevance adapter; returns hits best first
#[async_trait]
pub trait LexicalSearch: Send + Sync {
    async fn lexical_search(&self, query: &LexicalQuery<'_>) -> anyhow::Result<Vec<Hit>>;
}
