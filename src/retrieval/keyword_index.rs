/// Tantivy keyword index for BM25 search over a collection's text column
use crate::retrieval::{Hit, LexicalQuery, LexicalSearch};
use crate::table::{id_key, TableEngine};
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value as _, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

/// Indexing memory budget for a single writer thread
const WRITER_MEMORY_BUDGET: usize = 50_000_000;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

/// One BM25 match
#[derive(Debug, Clone)]
pub struct KeywordSearchResult {
    /// Document id
    pub id: String,
    /// BM25 relevance score
    pub score: f32,
}

/// Read-only, in-memory Tantivy index over (id, text) pairs
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
}

impl KeywordIndex {
    /// Build an index from `(id, text)` pairs
    pub fn build(
        documents: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, KeywordIndexError> {
        let mut schema_builder = Schema::builder();

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);

        let schema = schema_builder.build();
        let index = Index::create_in_ram(schema);

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_MEMORY_BUDGET)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        for (id, text) in documents {
            writer
                .add_document(doc!(
                    id_field => id,
                    text_field => text,
                ))
                .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        }

        writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e: TantivyError| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            id_field,
            text_field,
        })
    }

    /// BM25 search over the text field, best first.
    ///
    /// Query syntax errors are tolerated: the parsable part of the query is used.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (query, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("Ignored {} query parse errors", errors.len());
        }

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let id = retrieved_doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid ID field".to_string())
                })?
                .to_string();

            results.push(KeywordSearchResult { id, score });
        }

        Ok(results)
    }

    /// Get the number of documents in the index
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lexical adapter backed by per-collection [`KeywordIndex`]es.
///
/// An index is rebuilt only when the collection's id/text content changes.
pub struct KeywordSearch {
    engine: Arc<dyn TableEngine>,
    indexes: Mutex<HashMap<String, (String, Arc<KeywordIndex>)>>,
}

impl KeywordSearch {
    pub fn new(engine: Arc<dyn TableEngine>) -> Self {
        Self {
            engine,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    async fn index_for(&self, query: &LexicalQuery<'_>) -> anyhow::Result<Arc<KeywordIndex>> {
        let table = self.engine.table(query.table)?;

        let id_idx = table
            .column_index(query.id_column)
            .ok_or_else(|| anyhow!("Column {} not found in {}", query.id_column, query.table))?;
        let text_idx = table
            .column_index(query.text_column)
            .ok_or_else(|| anyhow!("Column {} not found in {}", query.text_column, query.table))?;

        let documents: Vec<(String, String)> = table
            .rows()
            .iter()
            .map(|row| {
                let text = match &row[text_idx] {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (id_key(&row[id_idx]), text)
            })
            .collect();

        let key = format!("{}\0{}\0{}", query.table, query.id_column, query.text_column);
        let content = content_fingerprint(&documents);

        {
            let indexes = self
                .indexes
                .lock()
                .map_err(|_| anyhow!("Keyword index cache lock poisoned"))?;
            if let Some((fingerprint, index)) = indexes.get(&key) {
                if *fingerprint == content {
                    return Ok(index.clone());
                }
            }
        }

        tracing::debug!(
            "Building keyword index for {}.{} ({} documents)",
            query.table,
            query.text_column,
            documents.len()
        );
        let index = tokio::task::spawn_blocking(move || KeywordIndex::build(documents))
            .await??;
        let index = Arc::new(index);

        self.indexes
            .lock()
            .map_err(|_| anyhow!("Keyword index cache lock poisoned"))?
            .insert(key, (content, index.clone()));

        Ok(index)
    }
}

fn content_fingerprint(documents: &[(String, String)]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (id, text) in documents {
        for part in [id, text] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[async_trait]
impl LexicalSearch for KeywordSearch {
    async fn lexical_search(&self, query: &LexicalQuery<'_>) -> anyhow::Result<Vec<Hit>> {
        let index = self.index_for(query).await?;

        Ok(index
            .search(query.query, query.k)?
            .into_iter()
            .map(|r| (r.id, r.score as f64))
            .filter(|(_, score)| query.min_score.map_or(true, |min| *score >= min))
            .map(|(id, score)| Hit::new(id, Some(score)))
            .collect())
    }
}
