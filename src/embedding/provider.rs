//! Embedder trait and FastEmbed implementation

use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Opaque text -> vector surface
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts, one per input in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Identifies the model in embedding cache fingerprints
    fn model_name(&self) -> &str;
}

/// Models `FastEmbedProvider` accepts, with their output dimension
const SUPPORTED_MODELS: [(&str, EmbeddingModel, usize); 3] = [
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768),
];

/// Local ONNX embedder backed by `fastembed`.
///
/// Weights are fetched into the Hugging Face cache the first time a model
/// is used; after that no network access is needed.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) = SUPPORTED_MODELS
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(model_name))
            .map(|(_, model, dimension)| (model.clone(), *dimension))
            .ok_or_else(|| {
                let supported: Vec<&str> = SUPPORTED_MODELS.iter().map(|(n, _, _)| *n).collect();
                EmbeddingError::InitializationError(format!(
                    "Unsupported model: {} (supported: {})",
                    model_name,
                    supported.join(", ")
                ))
            })?;

        tracing::info!("Loading embedding model {} ({} dims)", model_name, dimension);

        let model = TextEmbedding::try_new(
            InitOptions::new(embedding_model).with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Provider for the model named in the `[embedding]` section
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::new(&config.model)
    }

    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::from_config(&EmbeddingConfig::default())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Run the model on a blocking thread and check every output dimension
    async fn run_model(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model.clone();
        let embeddings = tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        self.run_model(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Positions must line up with the input rows, so empty texts are rejected
        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "Batch contains empty text".to_string(),
            ));
        }

        self.run_model(texts.to_vec()).await
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
