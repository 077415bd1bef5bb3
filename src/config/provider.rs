//! Upstream provider configuration.

use serde::{Deserialize, Serialize};

/// Connection settings for the generative backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the Generative Language API.
    pub base_url: String,

    /// API key. Usually supplied via `TURNSTILE_API_KEY` rather than the
    /// config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model for requests that don't name one.
    pub default_model: String,

    /// Per-HTTP-request deadline in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: None,
            default_model: "gemini-2.0-flash".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("base_url cannot be empty".to_string());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("base_url must start with http:// or https://".to_string());
        }
        if self.default_model.is_empty() {
            return Err("default_model cannot be empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}
