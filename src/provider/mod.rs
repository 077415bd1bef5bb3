//! Upstream generative-AI boundary.
//!
//! `GenerativeBackend` abstracts the provider-specific HTTP protocol behind
//! the shared request/response types, so the executor, cache, and agent loop
//! never branch on the provider.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub mod error;
pub mod google;
pub mod types;

pub use error::ProviderError;
pub use google::GoogleBackend;
pub use types::{
    Candidate, Content, FunctionCall, FunctionDeclaration, GenerateRequest, GenerateResponse,
    GenerationConfig, InlineData, Part, StreamChunk, ToolDeclaration, UsageMetadata,
};

/// Unified interface for generative-AI backends.
///
/// # Cancellation Safety
///
/// All async methods are cancellation-safe: dropping a returned future
/// aborts any in-flight HTTP request. The executor layers timeout and
/// cancellation on top of this by racing these futures.
#[async_trait]
pub trait GenerativeBackend: Send + Sync + 'static {
    /// Provider name for logging (e.g. "google").
    fn name(&self) -> &str;

    /// Execute a non-streaming generation request.
    async fn generate(&self, request: &GenerateRequest)
        -> Result<GenerateResponse, ProviderError>;

    /// Open a streaming generation request.
    ///
    /// Errors returned here are stream-open failures and are fatal to the
    /// call. Chunk-level errors inside the stream are handled by the
    /// executor's tolerant adapter.
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError>;

    /// Generate embeddings for a batch of inputs.
    ///
    /// Default implementation returns `Unsupported`; backends with an
    /// embedding endpoint override it. Must return one vector per input,
    /// in input order.
    async fn embed(
        &self,
        _model: &str,
        _inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Unsupported("embed"))
    }
}
