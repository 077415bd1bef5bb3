//! Turnstile - cost-bounded client orchestration for generative-AI backends.
//!
//! Mediates every call from an application to a metered, rate-limited
//! generative-AI service: quota and budget enforcement, response caching,
//! request coalescing, retry/timeout/cancellation, batching, and a streaming
//! tool-using agent loop.

pub mod agent;
pub mod batch;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod executor;
pub mod ledger;
pub mod logging;
pub mod provider;
pub mod quota;
pub mod service;
pub mod tier;
