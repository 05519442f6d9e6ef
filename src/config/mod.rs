//! Configuration management for Retrace
//!
//! Loads the TOML configuration, applies `RETRACE_SECTION__KEY` environment
//! overrides and validates the result.

use crate::error::{Result, RetraceError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Relative directory holding the cache index and payload files
pub const DEFAULT_CACHE_DIR: &str = ".retrace-cache";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Computation cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for `index.json` and payload files
    pub dir: PathBuf,
    /// TTL applied when a caller does not pass one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_ttl_secs: Option<u64>,
    /// Log cache hits and writes at info level
    pub verbose: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            default_ttl_secs: None,
            verbose: false,
        }
    }
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Enable dense vector search
    pub vector: bool,
    /// Enable BM25 keyword search
    pub lexical: bool,
    /// RRF smoothing constant
    pub rrf_k: f64,
    /// Candidates fetched per method = result count * multiplier
    pub search_multiplier: usize,
    /// Attach per-method score columns to results
    pub include_scores: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Column holding document embeddings
    pub embeddings_column: String,
    /// Route embedding computation through the computation cache
    pub cache_embeddings: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector: true,
            lexical: true,
            rrf_k: crate::retrieval::DEFAULT_RRF_K,
            search_multiplier: 1,
            include_scores: false,
            min_similarity: None,
            min_score: None,
            embeddings_column: "embeddings".to_string(),
            cache_embeddings: true,
            timeout_secs: None,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RetraceError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RetraceError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RetraceError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RETRACE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("RETRACE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "CACHE__DIR" => {
                self.cache.dir = PathBuf::from(value);
            }
            "CACHE__DEFAULT_TTL_SECS" => {
                self.cache.default_ttl_secs = Some(parse_value(path, value)?);
            }
            "CACHE__VERBOSE" => {
                self.cache.verbose = parse_value(path, value)?;
            }
            "RETRIEVAL__VECTOR" => {
                self.retrieval.vector = parse_value(path, value)?;
            }
            "RETRIEVAL__LEXICAL" => {
                self.retrieval.lexical = parse_value(path, value)?;
            }
            "RETRIEVAL__RRF_K" => {
                self.retrieval.rrf_k = parse_value(path, value)?;
            }
            "RETRIEVAL__SEARCH_MULTIPLIER" => {
                self.retrieval.search_multiplier = parse_value(path, value)?;
            }
            "RETRIEVAL__INCLUDE_SCORES" => {
                self.retrieval.include_scores = parse_value(path, value)?;
            }
            "RETRIEVAL__MIN_SIMILARITY" => {
                self.retrieval.min_similarity = Some(parse_value(path, value)?);
            }
            "RETRIEVAL__MIN_SCORE" => {
                self.retrieval.min_score = Some(parse_value(path, value)?);
            }
            "RETRIEVAL__EMBEDDINGS_COLUMN" => {
                self.retrieval.embeddings_column = value.to_string();
            }
            "RETRIEVAL__CACHE_EMBEDDINGS" => {
                self.retrieval.cache_embeddings = parse_value(path, value)?;
            }
            "RETRIEVAL__TIMEOUT_SECS" => {
                self.retrieval.timeout_secs = Some(parse_value(path, value)?);
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__BATCH_SIZE" => {
                self.embedding.batch_size = parse_value(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RetraceError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("retrace").join("config.toml"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RetraceError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            cache: CacheConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.retrieval.rrf_k = 30.0;
        config.cache.default_ttl_secs = Some(3600);
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retrieval.rrf_k, 30.0);
        assert_eq!(loaded.cache.default_ttl_secs, Some(3600));
        assert_eq!(loaded.embedding.model, "all-MiniLM-L6-v2");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[_meta]\nschema_version = \"1.0.0\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache.dir, PathBuf::from(DEFAULT_CACHE_DIR));
        assert!(config.retrieval.vector);
        assert!(config.retrieval.lexical);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/retrace.toml")).unwrap_err();
        assert!(matches!(err, RetraceError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_set_value_rejects_garbage() {
        let mut config = Config::default();
        assert!(config.set_value_from_env("RETRIEVAL__RRF_K", "many").is_err());
        config.set_value_from_env("RETRIEVAL__LEXICAL", "false").unwrap();
        assert!(!config.retrieval.lexical);
    }

    #[test]
    fn test_set_value_covers_retrieval_and_embedding_keys() {
        let mut config = Config::default();
        let overrides = [
            ("RETRIEVAL__SEARCH_MULTIPLIER", "4"),
            ("RETRIEVAL__INCLUDE_SCORES", "true"),
            ("RETRIEVAL__MIN_SIMILARITY", "0.25"),
            ("RETRIEVAL__MIN_SCORE", "1.5"),
            ("RETRIEVAL__EMBEDDINGS_COLUMN", "vectors"),
            ("RETRIEVAL__CACHE_EMBEDDINGS", "false"),
            ("EMBEDDING__BATCH_SIZE", "8"),
        ];
        for (key, value) in overrides {
            config.set_value_from_env(key, value).unwrap();
        }

        assert_eq!(config.retrieval.search_multiplier, 4);
        assert!(config.retrieval.include_scores);
        assert_eq!(config.retrieval.min_similarity, Some(0.25));
        assert_eq!(config.retrieval.min_score, Some(1.5));
        assert_eq!(config.retrieval.embeddings_column, "vectors");
        assert!(!config.retrieval.cache_embeddings);
        assert_eq!(config.embedding.batch_size, 8);

        assert!(config
            .set_value_from_env("EMBEDDING__BATCH_SIZE", "-1")
            .is_err());
    }
}
