//! Brute-force cosine similarity over an embeddings column

use crate::embedding::Embedder;
use crate::retrieval::{Hit, VectorQuery, VectorSearch};
use crate::table::{id_key, TableEngine};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Vector adapter scanning every row of the collection
pub struct CosineSearch {
    engine: Arc<dyn TableEngine>,
    embedder: Arc<dyn Embedder>,
}

impl CosineSearch {
    pub fn new(engine: Arc<dyn TableEngine>, embedder: Arc<dyn Embedder>) -> Self {
        Self { engine, embedder }
    }
}

#[async_trait]
impl VectorSearch for CosineSearch {
    async fn vector_search(&self, query: &VectorQuery<'_>) -> anyhow::Result<Vec<Hit>> {
        let query_embedding = self
            .embedder
            .embed(query.query)
            .await
            .context("Failed to embed query")?;

        let table = self.engine.table(query.table)?;
        let id_idx = table
            .column_index(query.id_column)
            .ok_or_else(|| anyhow!("Column {} not found in {}", query.id_column, query.table))?;
        let emb_idx = table.column_index(query.embeddings_column).ok_or_else(|| {
            anyhow!(
                "Column {} not found in {}",
                query.embeddings_column,
                query.table
            )
        })?;

        let mut hits = Vec::new();
        for row in table.rows() {
            let embedding = match &row[emb_idx] {
                Value::Null => continue,
                value => parse_embedding(value)?,
            };

            let similarity = cosine_similarity(&query_embedding, &embedding);
            if query.min_similarity.map_or(true, |min| similarity >= min) {
                hits.push(Hit::new(id_key(&row[id_idx]), Some(similarity)));
            }
        }

        // Stable: equal similarities keep table order
        hits.sort_by(|a, b| {
            let a = a.score.unwrap_or(f64::NEG_INFINITY);
            let b = b.score.unwrap_or(f64::NEG_INFINITY);
            b.total_cmp(&a)
        });
        hits.truncate(query.k);

        Ok(hits)
    }
}

fn parse_embedding(value: &Value) -> anyhow::Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("Embedding is not an array: {}", value))?
        .iter()
        .map(|x| {
            x.as_f64()
                .map(|x| x as f32)
                .ok_or_else(|| anyhow!("Embedding component is not a number: {}", x))
        })
        .collect()
}

/// Cosine similarity; 0.0 when either vector has zero magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
