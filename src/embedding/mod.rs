//! Embedding generation and per-collection embedding preparation
//!
//! - `Embedder` trait for abstraction over embedding backends
//! - `FastEmbedProvider` for local embedding (all-MiniLM-L6-v2, 384-dim)
//! - `ensure_embeddings` adds an embeddings column to a table at most once

mod prep;
mod provider;

pub use prep::{ensure_embeddings, EmbeddingPrep, EmbeddingTarget};
pub use provider::{Embedder, EmbeddingError, FastEmbedProvider};
