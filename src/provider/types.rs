//! Wire types for the upstream generative-AI boundary.
//!
//! Follows the Google Generative Language request/response shapes; the
//! `GenerativeBackend` trait keeps other providers possible behind the same
//! types.

use serde::{Deserialize, Serialize};

/// One turn of a conversation: a role plus ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// "user", "model", or "function".
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::text(text)],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A content part: text, inline binary, or a model-issued function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Inline binary payload from raw bytes.
    pub fn inline(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        use base64::Engine;
        Part::Inline {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        }
    }
}

/// Base64-encoded inline binary (images, audio) attached to a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// Model-issued tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Generation knobs forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Response format hint, e.g. "application/json" for structured output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

/// Tool declarations advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// One callable function schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON-schema-like parameter object.
    pub parameters: serde_json::Value,
}

/// A fully-specified upstream request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub contents: Vec<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,
}

impl GenerateRequest {
    /// Single-prompt convenience constructor.
    pub fn from_prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            contents: vec![Content::user(prompt)],
            config: None,
            system_instruction: None,
            tools: Vec::new(),
        }
    }
}

/// Token counters reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: u32,
    pub candidates_tokens: u32,
    pub total_tokens: u32,
}

/// One response candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub content: Content,
    pub finish_reason: Option<String>,
}

/// Finalized upstream response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub candidates: Vec<Candidate>,
    pub usage: Option<UsageMetadata>,
}

impl GenerateResponse {
    /// Text of the first candidate, empty if none.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.content.text())
            .unwrap_or_default()
    }

    /// All function calls across the first candidate's parts.
    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::FunctionCall { function_call } => Some(function_call.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One streamed fragment. A faulty upstream chunk is surfaced as an
/// empty-text placeholder rather than aborting the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,
}

impl StreamChunk {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_calls: Vec::new(),
        }
    }

    /// Placeholder emitted in place of an unreadable chunk.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_joins_first_candidate_parts() {
        let response = GenerateResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: "model".into(),
                    parts: vec![Part::text("Hello"), Part::text(" world")],
                },
                finish_reason: Some("STOP".into()),
            }],
            usage: None,
        };
        assert_eq!(response.text(), "Hello world");
    }

    #[test]
    fn function_calls_extracted_from_parts() {
        let response = GenerateResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: "model".into(),
                    parts: vec![
                        Part::text("Saving."),
                        Part::FunctionCall {
                            function_call: FunctionCall {
                                name: "save_memory".into(),
                                args: serde_json::json!({"content": "test"}),
                            },
                        },
                    ],
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let calls = response.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "save_memory");
    }

    #[test]
    fn empty_response_yields_empty_text() {
        let response = GenerateResponse {
            candidates: vec![],
            usage: None,
        };
        assert_eq!(response.text(), "");
        assert!(response.function_calls().is_empty());
    }

    #[test]
    fn part_serialization_uses_wire_names() {
        let part = Part::inline("image/png", &[1, 2, 3]);
        let json = serde_json::to_value(&part).unwrap();
        assert!(json.get("inlineData").is_some());
        assert_eq!(json["inlineData"]["mimeType"], "image/png");
    }
}
