//! Google Generative Language backend.
//!
//! Handles the Google AI REST API:
//! - Generation via POST /v1beta/models/{model}:generateContent?key={key}
//! - Streaming via POST /v1beta/models/{model}:streamGenerateContent?alt=sse
//! - Embeddings via POST /v1beta/models/{model}:embedContent?key={key}
//! - System prompt mapped to the systemInstruction field
//! - 401/403 mapped to fatal verification failures, 429/503 left retryable

use super::types::{
    Candidate, Content, FunctionCall, GenerateRequest, GenerateResponse, GenerationConfig, Part,
    StreamChunk, ToolDeclaration, UsageMetadata,
};
use super::{GenerativeBackend, ProviderError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Google Generative Language API client.
pub struct GoogleBackend {
    /// Base URL (e.g. "https://generativelanguage.googleapis.com").
    base_url: String,
    /// API key passed as a query parameter.
    api_key: String,
    /// Shared HTTP client for connection pooling.
    client: Arc<Client>,
    /// Per-request deadline applied to the HTTP call itself.
    request_timeout: Duration,
}

impl GoogleBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        client: Arc<Client>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            request_timeout,
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }

    fn translate_request(&self, request: &GenerateRequest) -> GoogleRequest {
        GoogleRequest {
            contents: request.contents.clone(),
            system_instruction: request.system_instruction.as_ref().map(|text| {
                GoogleSystemInstruction {
                    parts: vec![Part::text(text)],
                }
            }),
            generation_config: request.config.clone(),
            tools: request.tools.clone(),
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.request_timeout.as_millis() as u64)
        } else {
            ProviderError::Network(err.to_string())
        }
    }

    async fn map_error_response(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        match status {
            401 | 403 => ProviderError::Unauthorized(format!(
                "upstream rejected credentials ({status}): {message}"
            )),
            _ => ProviderError::Upstream { status, message },
        }
    }
}

/// Google request envelope.
#[derive(Debug, Serialize)]
struct GoogleRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "systemInstruction")]
    system_instruction: Option<GoogleSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "generationConfig")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Serialize)]
struct GoogleSystemInstruction {
    parts: Vec<Part>,
}

/// Google response envelope.
#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GoogleUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GoogleCandidate {
    content: Content,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u32>,
}

impl GoogleResponse {
    fn into_response(self) -> GenerateResponse {
        GenerateResponse {
            candidates: self
                .candidates
                .into_iter()
                .map(|c| Candidate {
                    content: c.content,
                    finish_reason: c.finish_reason,
                })
                .collect(),
            usage: self.usage_metadata.map(|u| UsageMetadata {
                prompt_tokens: u.prompt_token_count.unwrap_or(0),
                candidates_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count.unwrap_or(0),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct GoogleEmbedRequest<'a> {
    content: GoogleEmbedContent<'a>,
}

#[derive(Debug, Serialize)]
struct GoogleEmbedContent<'a> {
    parts: Vec<GoogleEmbedPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GoogleEmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GoogleEmbedResponse {
    embedding: GoogleEmbedding,
}

#[derive(Debug, Deserialize)]
struct GoogleEmbedding {
    values: Vec<f32>,
}

/// Parse one SSE data payload into a stream chunk.
///
/// Unparseable payloads map to `None` so the caller can substitute the
/// empty-chunk placeholder.
fn parse_sse_chunk(data: &str) -> Option<StreamChunk> {
    let response: GoogleResponse = serde_json::from_str(data).ok()?;
    let candidate = response.candidates.first()?;
    let text = candidate.content.text();
    let function_calls: Vec<FunctionCall> = candidate
        .content
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::FunctionCall { function_call } => Some(function_call.clone()),
            _ => None,
        })
        .collect();
    Some(StreamChunk {
        text,
        function_calls,
    })
}

#[async_trait]
impl GenerativeBackend for GoogleBackend {
    fn name(&self) -> &str {
        "google"
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        let url = self.endpoint(&request.model, "generateContent");
        let body = self.translate_request(request);

        tracing::debug!(model = %request.model, turns = request.contents.len(), "generate request");

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(Self::map_error_response(response).await);
        }

        let parsed: GoogleResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("failed to parse generate response: {e}"))
        })?;

        Ok(parsed.into_response())
    }

    async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, request.model, self.api_key
        );
        let body = self.translate_request(request);

        tracing::debug!(model = %request.model, "stream open");

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(Self::map_error_response(response).await);
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer = String::new();
            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::Network(e.to_string()));
                        continue;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited; keep the trailing
                // partial line in the buffer.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    match parse_sse_chunk(data) {
                        Some(chunk) => yield Ok(chunk),
                        None => yield Err(ProviderError::InvalidResponse(
                            "unparseable stream chunk".to_string(),
                        )),
                    }
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = self.endpoint(model, "embedContent");
        let mut vectors = Vec::with_capacity(inputs.len());

        for input in inputs {
            let body = GoogleEmbedRequest {
                content: GoogleEmbedContent {
                    parts: vec![GoogleEmbedPart { text: input }],
                },
            };

            let response = self
                .client
                .post(&url)
                .timeout(self.request_timeout)
                .json(&body)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;

            if !response.status().is_success() {
                return Err(Self::map_error_response(response).await);
            }

            let parsed: GoogleEmbedResponse = response.json().await.map_err(|e| {
                ProviderError::InvalidResponse(format!("failed to parse embed response: {e}"))
            })?;
            vectors.push(parsed.embedding.values);
        }

        Ok(vectors)
    }
}
