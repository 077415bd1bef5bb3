//! Structured (JSON) output parsing.
//!
//! Models frequently wrap JSON answers in a markdown code fence even when
//! told not to. Parsing always runs a tolerant fence-stripping pre-pass;
//! what happens on a parse failure is the caller's choice via `ParseMode`.

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure policy for structured parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    /// Parse failure is an error carrying the raw model text.
    #[default]
    Strict,
    /// Parse failure falls back to deserializing an empty object. Only
    /// suitable for target types where every field has a default.
    Lenient,
}

#[derive(Debug, Error)]
pub enum StructuredError {
    /// The model text was not valid JSON for the target type. `raw` holds
    /// the original (unstripped) text for diagnostics.
    #[error("Structured response was not valid JSON: {source}")]
    Malformed {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Strip a surrounding markdown code fence, if present.
///
/// Handles ```json and bare ``` fences with arbitrary surrounding
/// whitespace. Text without a fence passes through untouched.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // The fence opener may carry a language tag on the same line; a tag is
    // purely alphanumeric ("json"), never the start of the payload.
    let body = match body.split_once('\n') {
        Some((first_line, remainder))
            if first_line.trim().chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            remainder
        }
        _ => body,
    };
    body.trim()
}

/// Parse model text into `T` after the fence pre-pass.
pub fn parse<T: DeserializeOwned>(text: &str, mode: ParseMode) -> Result<T, StructuredError> {
    let stripped = strip_fences(text);
    match serde_json::from_str(stripped) {
        Ok(value) => Ok(value),
        Err(source) => match mode {
            ParseMode::Strict => Err(StructuredError::Malformed {
                raw: text.to_string(),
                source,
            }),
            ParseMode::Lenient => {
                tracing::warn!(error = %source, "structured parse failed; using empty fallback");
                serde_json::from_str("{}").map_err(|fallback| StructuredError::Malformed {
                    raw: text.to_string(),
                    source: fallback,
                })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    struct Plan {
        #[serde(default)]
        title: String,
        #[serde(default)]
        steps: Vec<String>,
    }

    #[test]
    fn plain_json_parses() {
        let plan: Plan = parse(r#"{"title": "t", "steps": ["a"]}"#, ParseMode::Strict).unwrap();
        assert_eq!(plan.title, "t");
    }

    #[test]
    fn json_fence_is_stripped() {
        let text = "```json\n{\"title\": \"fenced\", \"steps\": []}\n```";
        let plan: Plan = parse(text, ParseMode::Strict).unwrap();
        assert_eq!(plan.title, "fenced");
    }

    #[test]
    fn bare_fence_is_stripped() {
        let text = "```\n{\"title\": \"bare\", \"steps\": []}\n```";
        let plan: Plan = parse(text, ParseMode::Strict).unwrap();
        assert_eq!(plan.title, "bare");
    }

    #[test]
    fn unfenced_text_passes_through() {
        assert_eq!(strip_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn strict_failure_carries_raw_text() {
        let err = parse::<Plan>("not json at all", ParseMode::Strict).unwrap_err();
        let StructuredError::Malformed { raw, .. } = err;
        assert_eq!(raw, "not json at all");
    }

    #[test]
    fn lenient_failure_falls_back_to_defaults() {
        let plan: Plan = parse("not json at all", ParseMode::Lenient).unwrap();
        assert_eq!(plan, Plan::default());
    }
}
