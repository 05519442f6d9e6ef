//! One-time embedding column preparation for a collection

use crate::cache::{CacheOptions, CacheReport, CacheRequest, ComputationCache};
use crate::embedding::Embedder;
use crate::error::{Result, RetraceError};
use crate::table::{Column, ColumnType, RecordSet, TableEngine};
use serde_json::{json, Value};

/// Bumped whenever the way embeddings are derived from text changes
const EMBEDDING_LOGIC: &str = "retrace:embed-text-column:v1";

/// What `ensure_embeddings` did
#[derive(Debug, Clone)]
pub enum EmbeddingPrep {
    /// The column already existed
    Reused,
    /// Embeddings were computed directly
    Computed { rows: usize },
    /// Embeddings went through the computation cache
    Cached(CacheReport),
}

/// Where and how to embed
#[derive(Debug, Clone)]
pub struct EmbeddingTarget<'a> {
    pub table: &'a str,
    pub text_column: &'a str,
    pub embeddings_column: &'a str,
    pub batch_size: usize,
}

/// Make sure `target.table` has an embeddings column, computing it once if not.
///
/// Only the embeddings column passes through the cache, under its own table
/// name, keyed by the text it was derived from. Other columns of the
/// collection are never replaced by a cached copy.
pub async fn ensure_embeddings(
    engine: &dyn TableEngine,
    embedder: &dyn Embedder,
    cache: Option<&ComputationCache>,
    target: &EmbeddingTarget<'_>,
    options: &CacheOptions,
) -> Result<EmbeddingPrep> {
    let mut records = engine.table(target.table)?;
    if records.column_index(target.embeddings_column).is_some() {
        tracing::debug!(
            "Reusing {}.{} embeddings",
            target.table,
            target.embeddings_column
        );
        return Ok(EmbeddingPrep::Reused);
    }

    let texts = text_values(&records, target)?;

    let (values, prep) = match cache {
        Some(cache) => {
            let staging = format!("{}__{}", target.table, target.embeddings_column);
            let request = CacheRequest::new(
                staging.as_str(),
                &json!({
                    "table": target.table,
                    "text_column": target.text_column,
                    "embeddings_column": target.embeddings_column,
                    "model": embedder.model_name(),
                    "content": content_digest(&texts),
                }),
                EMBEDDING_LOGIC,
            )?;
            let report = cache
                .run(engine, &request, options, || async {
                    let values = embed_texts(embedder, &texts, target.batch_size).await?;
                    let column = RecordSet::with_rows(
                        vec![Column::new(target.embeddings_column, ColumnType::Embedding)],
                        values.into_iter().map(|v| vec![v]).collect(),
                    )?;
                    engine.put_table(&staging, column)
                })
                .await?;

            let column = engine.table(&staging)?;
            engine.drop_table(&staging)?;
            let values: Vec<Value> = column.into_rows().into_iter().flatten().collect();
            (values, EmbeddingPrep::Cached(report))
        }
        None => {
            let values = embed_texts(embedder, &texts, target.batch_size).await?;
            let rows = values.len();
            (values, EmbeddingPrep::Computed { rows })
        }
    };

    if values.len() != records.len() {
        return Err(RetraceError::Table(format!(
            "Got {} embeddings for {} rows of {}",
            values.len(),
            records.len(),
            target.table
        )));
    }

    records.add_column(
        Column::new(target.embeddings_column, ColumnType::Embedding),
        values,
    )?;
    engine.put_table(target.table, records)?;

    tracing::debug!("Embedded {} rows of {}", texts.len(), target.table);
    Ok(prep)
}

fn text_values(records: &RecordSet, target: &EmbeddingTarget<'_>) -> Result<Vec<String>> {
    Ok(records
        .column_values(target.text_column)
        .ok_or_else(|| RetraceError::ColumnNotFound {
            table: target.table.to_string(),
            column: target.text_column.to_string(),
        })?
        .map(|value| match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect())
}

/// BLAKE3 over the texts in row order
fn content_digest(texts: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(texts.len() as u64).to_le_bytes());
    for text in texts {
        hasher.update(&(text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// One embedding value per text, in order
async fn embed_texts(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        // Empty texts get a null embedding rather than a model call
        let non_empty: Vec<String> = batch.iter().filter(|t| !t.is_empty()).cloned().collect();
        let mut embedded = embedder.embed_batch(&non_empty).await?.into_iter();

        for text in batch {
            if text.is_empty() {
                values.push(Value::Null);
            } else {
                let embedding = embedded.next().ok_or_else(|| {
                    RetraceError::Table("Embedder returned fewer vectors than inputs".to_string())
                })?;
                values.push(json!(embedding));
            }
        }
    }
    Ok(values)
}
