//! Retrace - Fingerprinted Computation Cache and Hybrid Search
//!
//! Caches the tables produced by expensive computations under a content
//! fingerprint of (target, configuration, logic) and replays them on later
//! runs. On top of it, hybrid retrieval fuses dense vector search and BM25
//! keyword search with Reciprocal Rank Fusion.

pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod retrieval;
pub mod table;

pub use error::{Result, RetraceError};
