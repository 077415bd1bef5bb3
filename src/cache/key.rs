//! Deterministic cache keys for generation requests.

use crate::provider::GenerateRequest;
use sha2::{Digest, Sha256};

/// Derive the cache key for a request.
///
/// The key covers every field that influences the response: model,
/// conversation contents, generation config, system instruction, and tool
/// declarations. Two semantically identical requests always hash to the
/// same key regardless of when or where they were built.
pub fn request_key(request: &GenerateRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.model.as_bytes());
    hasher.update(b"\x1f");
    // Serialization of the full request is stable because the wire types
    // serialize fields in declaration order.
    let canonical = serde_json::to_vec(request).unwrap_or_default();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::GenerationConfig;

    #[test]
    fn identical_requests_share_a_key() {
        let a = GenerateRequest::from_prompt("gemini-pro", "hello");
        let b = GenerateRequest::from_prompt("gemini-pro", "hello");
        assert_eq!(request_key(&a), request_key(&b));
    }

    #[test]
    fn prompt_changes_the_key() {
        let a = GenerateRequest::from_prompt("gemini-pro", "hello");
        let b = GenerateRequest::from_prompt("gemini-pro", "goodbye");
        assert_ne!(request_key(&a), request_key(&b));
    }

    #[test]
    fn model_changes_the_key() {
        let a = GenerateRequest::from_prompt("gemini-pro", "hello");
        let b = GenerateRequest::from_prompt("gemini-flash", "hello");
        assert_ne!(request_key(&a), request_key(&b));
    }

    #[test]
    fn config_changes_the_key() {
        let a = GenerateRequest::from_prompt("gemini-pro", "hello");
        let mut b = a.clone();
        b.config = Some(GenerationConfig {
            temperature: Some(0.2),
            ..Default::default()
        });
        assert_ne!(request_key(&a), request_key(&b));
    }

    #[test]
    fn key_is_hex_sha256() {
        let key = request_key(&GenerateRequest::from_prompt("m", "p"));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
