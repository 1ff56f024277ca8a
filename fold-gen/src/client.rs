use crate::error::{GenError, Result};
use crate::types::{GenerateRequest, GenerateResponse};
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_GENERATION_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent";

/// Seam between the dispatch step and the upstream service. Implementations
/// make exactly one attempt per call.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, api_key: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct GenClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GenClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            http,
            endpoint: endpoint.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TextGenerator for GenClient {
    #[tracing::instrument(level = "info", skip_all)]
    async fn generate(&self, prompt: &str, api_key: &str) -> Result<String> {
        let req = GenerateRequest::from_prompt(prompt);

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GenError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        match parsed.first_text() {
            Some(text) => Ok(text.to_string()),
            None => Err(GenError::ResponseFormat(format!(
                "no candidate text in response body={body}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerateResponse;

    #[test]
    fn request_body_carries_prompt_and_generation_config() {
        let req = GenerateRequest::from_prompt("write a tagline");
        let json = serde_json::to_value(&req).expect("serialize request");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "write a tagline");
        assert_eq!(json["generationConfig"]["topK"], 40);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn response_text_extraction_handles_present_and_missing_candidates() {
        let ok: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#,
        )
        .expect("parse response");
        assert_eq!(ok.first_text(), Some("hello"));

        let empty: GenerateResponse = serde_json::from_str(r#"{}"#).expect("parse empty response");
        assert_eq!(empty.first_text(), None);
    }

    #[test]
    fn malformed_body_surfaces_as_response_format_error() {
        let err = serde_json::from_str::<GenerateResponse>("not json")
            .map_err(GenError::from)
            .expect_err("malformed body must not parse");
        assert!(matches!(err, GenError::ResponseFormat(_)));
    }
}
