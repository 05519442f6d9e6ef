use crate::config::Config;
use crate::error::{Result, RetraceError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_embedding(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RetraceError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.cache.dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "cache.dir",
                "Cache directory cannot be empty",
            ));
        }

        if config.cache.default_ttl_secs == Some(0) {
            errors.push(ValidationError::new(
                "cache.default_ttl_secs",
                "TTL must be greater than 0 when set",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if !retrieval.vector && !retrieval.lexical {
            errors.push(ValidationError::new(
                "retrieval",
                "At least one of vector or lexical search must be enabled",
            ));
        }

        if !retrieval.rrf_k.is_finite() || retrieval.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("rrf_k must be a finite non-negative number, got {}", retrieval.rrf_k),
            ));
        }

        if retrieval.search_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.search_multiplier",
                "Search multiplier must be greater than 0",
            ));
        }

        for (path, threshold) in [
            ("retrieval.min_similarity", retrieval.min_similarity),
            ("retrieval.min_score", retrieval.min_score),
        ] {
            if let Some(value) = threshold {
                if !value.is_finite() {
                    errors.push(ValidationError::new(
                        path,
                        format!("Threshold must be finite, got {}", value),
                    ));
                }
            }
        }

        if retrieval.embeddings_column.is_empty() {
            errors.push(ValidationError::new(
                "retrieval.embeddings_column",
                "Embeddings column name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_no_method_enabled() {
        let mut config = Config::default();
        config.retrieval.vector = false;
        config.retrieval.lexical = false;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.cache.dir = PathBuf::new();
        config.retrieval.rrf_k = f64::NAN;
        config.embedding.batch_size = 0;

        match ConfigValidator::validate(&config) {
            Err(RetraceError::ConfigValidation { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
