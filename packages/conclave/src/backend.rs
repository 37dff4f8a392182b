//! The backend runner seam.
//!
//! The core never talks to a model server itself. It drives an opaque
//! runner: `(model_name, request) → response`, where the request is
//! forwarded unchanged except for the property paths the routing rules
//! inspect. Streaming critics consume the same chunk shapes.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One piece of streamed model output. Plain-text chunks carry no
/// logprobs; token-level chunks may.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendChunk {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<f64>>,
}

impl BackendChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            logprobs: None,
        }
    }

    pub fn with_logprobs(content: impl Into<String>, logprobs: Vec<f64>) -> Self {
        Self {
            content: content.into(),
            logprobs: Some(logprobs),
        }
    }
}

/// A stream of model output chunks. Items may fail mid-stream; consumers
/// fall back to a non-streaming completion.
pub type ChunkStream = BoxStream<'static, Result<BackendChunk>>;

/// Executes a request against a named model backend.
///
/// The runner may fail arbitrarily; the router treats all errors uniformly
/// and is responsible for retries and timeouts. Retried attempts re-invoke
/// the runner with the same model and request; idempotency is the runner's
/// concern.
#[async_trait]
pub trait BackendRunner: Send + Sync {
    async fn run(&self, model: &str, request: &Value) -> Result<Value>;
}

/// Extract the completion text from a `{message: {content: ...}}` response.
pub fn response_content(response: &Value) -> &str {
    response
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

/// Extract an optional embedding vector from a backend response.
pub fn response_embedding(response: &Value) -> Option<Vec<f32>> {
    let values = response.get("embedding")?.as_array()?;
    let mut embedding = Vec::with_capacity(values.len());
    for v in values {
        embedding.push(v.as_f64()? as f32);
    }
    Some(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_content_extraction() {
        let response = json!({"message": {"content": "- Claim: fine"}});
        assert_eq!(response_content(&response), "- Claim: fine");
    }

    #[test]
    fn test_response_content_tolerates_other_shapes() {
        assert_eq!(response_content(&json!({})), "");
        assert_eq!(response_content(&json!("bare string")), "");
        assert_eq!(response_content(&json!({"message": {"content": 7}})), "");
    }

    #[test]
    fn test_embedding_extraction() {
        let response = json!({"embedding": [0.1, 0.2, 0.3]});
        let embedding = response_embedding(&response).unwrap();
        assert_eq!(embedding.len(), 3);
        assert!((embedding[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_absent_or_malformed() {
        assert!(response_embedding(&json!({})).is_none());
        assert!(response_embedding(&json!({"embedding": "nope"})).is_none());
        assert!(response_embedding(&json!({"embedding": [0.1, "x"]})).is_none());
    }

    #[test]
    fn test_chunk_serialization_skips_missing_logprobs() {
        let chunk = BackendChunk::text("hello");
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(!json.contains("logprobs"));

        let chunk = BackendChunk::with_logprobs("hi", vec![-0.1, -0.2]);
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("logprobs"));
    }
}
