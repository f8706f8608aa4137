//! HTTP client for the generative-language API
//!
//! The rest of the crate talks to the model through the `LanguageModel`
//! trait, so pipeline tests can script replies without a network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::types::AppError;

/// One-shot text delegate: send a prompt, get the full reply
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn prompt(&self, prompt: &str) -> Result<String, AppError>;
}

// ============================================================================
// Wire types (generateContent)
// ============================================================================

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Deserialize)]
struct ReplyPart {
    #[serde(default)]
    text: String,
}

// ============================================================================
// Client
// ============================================================================

/// Client for the Gemini generateContent endpoint
pub struct GeminiClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Create a new client
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout_ms: u64) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn prompt(&self, prompt: &str) -> Result<String, AppError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "Sending prompt to language model");

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Delegate(format!("Language model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Delegate(format!(
                "Language model returned HTTP {status}"
            )));
        }

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::Delegate(format!("Unreadable language model reply: {e}")))?;

        let text = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| AppError::Delegate("Empty language model reply".to_string()))?;

        debug!(reply_len = text.len(), "Received language model reply");

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_shape_parses() {
        let raw = r#"{
            "candidates": [
                { "content": { "parts": [ { "text": "hello" } ] } }
            ]
        }"#;
        let reply: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(reply.candidates[0].content.parts[0].text, "hello");
    }

    #[test]
    fn empty_candidates_tolerated() {
        let reply: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(reply.candidates.is_empty());
    }
}
