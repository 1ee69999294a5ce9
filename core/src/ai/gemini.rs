//! Google Gemini backend over the REST `generateContent` endpoint.
//!
//! One request per user turn; the full session history goes into `contents`. The API key is
//! sent in the `x-goog-api-key` header and never logged.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{BackendError, ChatBackend, ChatMessage};
use crate::config::GeminiSettings;

/// Max bytes of an error body kept in `BackendError::Status`.
const ERROR_BODY_MAX_LEN: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    /// "user" or "model".
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GeminiRequest {
    pub fn from_history(history: &[ChatMessage]) -> Self {
        let contents = history
            .iter()
            .map(|m| GeminiContent {
                role: m.role.to_string(),
                parts: vec![GeminiPart { text: Some(m.text.clone()) }],
            })
            .collect();
        Self { contents }
    }
}

impl GeminiResponse {
    /// Joined text of the first candidate, or why there is none.
    pub fn into_text(self) -> Result<String, BackendError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(BackendError::Blocked(reason));
        }
        let candidate = self.candidates.into_iter().next().ok_or(BackendError::EmptyResponse)?;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return match candidate.finish_reason.as_deref() {
                Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
                    Err(BackendError::Blocked(reason.to_string()))
                }
                _ => Err(BackendError::EmptyResponse),
            };
        }
        Ok(text)
    }
}

pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiBackend {
    pub fn new(settings: &GeminiSettings) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait::async_trait]
impl ChatBackend for GeminiBackend {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, BackendError> {
        let body = GeminiRequest::from_history(history);
        let res = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let body = crate::im::log::truncate_content(&text, ERROR_BODY_MAX_LEN).into_owned();
            return Err(BackendError::Status { status: status.as_u16(), body });
        }

        let parsed: GeminiResponse = res.json().await?;
        parsed.into_text()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_roles_in_order() {
        let history = vec![
            ChatMessage::user("hello"),
            ChatMessage::model("hi"),
            ChatMessage::user("how are markets?"),
        ];
        let json = serde_json::to_value(GeminiRequest::from_history(&history)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hello"}]},
                    {"role": "model", "parts": [{"text": "hi"}]},
                    {"role": "user", "parts": [{"text": "how are markets?"}]},
                ]
            })
        );
    }

    #[test]
    fn joins_parts_of_first_candidate() {
        let raw = r#"{
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "KOSPI "}, {"text": "up"}]}, "finishReason": "STOP"},
                {"content": {"role": "model", "parts": [{"text": "ignored"}]}}
            ],
            "usageMetadata": {"totalTokenCount": 12}
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text().unwrap(), "KOSPI up");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let raw = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed.into_text(), Err(BackendError::Blocked(r)) if r == "SAFETY"));
    }

    #[test]
    fn empty_candidates_is_an_error() {
        let parsed: GeminiResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(parsed.into_text(), Err(BackendError::EmptyResponse)));

        let raw = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed.into_text(), Err(BackendError::Blocked(_))));
    }
}
