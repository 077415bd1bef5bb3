//! Layered configuration loading.
//!
//! Precedence, highest first:
//!
//! 1. CLI arguments
//! 2. Environment variables (`TURNSTILE_*`)
//! 3. Configuration file (TOML)
//! 4. Defaults

pub mod error;
pub mod logging;
pub mod pipeline;
pub mod provider;

pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use pipeline::{BatchConfig, CacheConfig, RetryConfig};
pub use provider::ProviderConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Unified configuration for the orchestration pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// `None` returns defaults; a missing file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply `TURNSTILE_*` environment variable overrides.
    ///
    /// Invalid values are silently ignored (defaults are kept).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("TURNSTILE_API_KEY") {
            if !key.is_empty() {
                self.provider.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("TURNSTILE_BASE_URL") {
            if !url.is_empty() {
                self.provider.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("TURNSTILE_MODEL") {
            if !model.is_empty() {
                self.provider.default_model = model;
            }
        }
        if let Ok(level) = std::env::var("TURNSTILE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TURNSTILE_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }
        if let Ok(enabled) = std::env::var("TURNSTILE_CACHE") {
            self.cache.enabled = enabled.to_lowercase() == "true";
        }
        self
    }

    /// Validate every section at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sections: [(&str, Result<(), String>); 4] = [
            ("provider", self.provider.validate()),
            ("retry", self.retry.validate()),
            ("cache", self.cache.validate()),
            ("batch", self.batch.validate()),
        ];
        for (field, result) in sections {
            if let Err(message) = result {
                return Err(ConfigError::Validation {
                    field: field.to_string(),
                    message,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.cache.ttl_secs, 24 * 60 * 60);
    }

    #[test]
    fn parses_partial_toml() {
        let toml = r#"
        [retry]
        max_retries = 5

        [cache]
        ttl_secs = 60
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.cache.ttl_secs, 60);
        // Untouched sections keep defaults.
        assert_eq!(config.batch.max_size, 16);
    }

    #[test]
    fn loads_from_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "[provider]\ndefault_model = \"gemini-pro\"").unwrap();

        let config = AppConfig::load(Some(temp.path())).unwrap();
        assert_eq!(config.provider.default_model, "gemini-pro");
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/turnstile.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn none_path_returns_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.provider.request_timeout_secs, 60);
    }

    #[test]
    fn env_override_model() {
        std::env::set_var("TURNSTILE_MODEL", "gemini-exp");
        let config = AppConfig::default().with_env_overrides();
        std::env::remove_var("TURNSTILE_MODEL");

        assert_eq!(config.provider.default_model, "gemini-exp");
    }

    #[test]
    fn env_invalid_format_is_ignored() {
        std::env::set_var("TURNSTILE_LOG_FORMAT", "xml");
        let config = AppConfig::default().with_env_overrides();
        std::env::remove_var("TURNSTILE_LOG_FORMAT");

        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_section_fails_validation() {
        let mut config = AppConfig::default();
        config.provider.base_url = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { ref field, .. }) if field == "provider"
        ));
    }
}
