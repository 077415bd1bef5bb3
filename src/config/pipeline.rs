//! Pipeline tuning: retry, cache, and batching sections.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry schedule for transient upstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (2 = at most 3 attempts).
    pub max_retries: u32,
    /// First backoff delay in milliseconds; doubles per retry.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1_000,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("base_delay_ms must be > 0".to_string());
        }
        Ok(())
    }

    pub fn policy(&self) -> crate::executor::RetryPolicy {
        crate::executor::RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

/// Response cache section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// In-memory entry cap.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 24 * 60 * 60,
            max_entries: 50,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.ttl_secs == 0 {
            return Err("ttl_secs must be > 0 when the cache is enabled".to_string());
        }
        if self.enabled && self.max_entries == 0 {
            return Err("max_entries must be > 0 when the cache is enabled".to_string());
        }
        Ok(())
    }
}

/// Request batching section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Flush immediately at this many queued requests.
    pub max_size: usize,
    /// Flush a partial batch this long after its first request (ms).
    pub max_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            max_delay_ms: 100,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be > 0".to_string());
        }
        Ok(())
    }

    pub fn window(&self) -> crate::batch::BatchConfig {
        crate::batch::BatchConfig {
            max_size: self.max_size,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}
