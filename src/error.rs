use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Retrace
#[derive(Error, Debug)]
pub enum RetraceError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// The cache index exists but cannot be parsed. Never repaired automatically.
    #[error("Cache index at {path} is corrupt: {source}")]
    CorruptCacheIndex {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Table missing from the data engine
    #[error("Table not found: {name}")]
    TableNotFound { name: String },

    /// Column missing from a table
    #[error("Column {column} not found in table {table}")]
    ColumnNotFound { table: String, column: String },

    /// Malformed table data
    #[error("Table error: {0}")]
    Table(String),

    /// Payload persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Retrace operations
pub type Result<T> = std::result::Result<T, RetraceError>;
