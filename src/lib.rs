pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod modes;
pub mod providers;
pub mod session;
pub mod store;
pub mod stream;
pub mod web;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use config::{ApiConfig, API_KEY_VAR};
use error::{Result, ScribeError, MIN_CONTENT_CHARS};
use modes::{compose_reasoning_request, compose_rewrite_request, OptimizationMode};
use providers::{ChatMessage, ChatRequest, ChatResponse};
use session::TextModification;

/// Stands in for the reasoning text when the first request fails.
pub const REASONING_UNAVAILABLE: &str = "Optimization reasoning is unavailable for this request.";

/// `reason` label of the single overall suggestion.
pub const OVERALL_REASON: &str = "Optimization approach";

// ---------------------------------------------------------------------------
// Progress and results
// ---------------------------------------------------------------------------

/// Incremental updates delivered while an optimization runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Progress {
    /// Phase one finished; the suggestion is still empty.
    Reasoning(Vec<TextModification>),
    /// Full rewritten text accumulated so far.
    Text(String),
    /// Phase two finished.
    Complete { text: String, modifications: Vec<TextModification> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Optimization {
    pub optimized_content: String,
    pub modifications: Vec<TextModification>,
}

fn overall_suggestion(content: &str, suggestion: &str, reasoning: &str) -> Vec<TextModification> {
    vec![TextModification {
        original: content.to_string(),
        reason: OVERALL_REASON.to_string(),
        suggestion: Some(suggestion.to_string()),
        reasoning: Some(reasoning.to_string()),
    }]
}

/// Reject input whose trimmed length is under [`MIN_CONTENT_CHARS`].
pub fn validate_content(content: &str) -> Result<()> {
    let len = content.trim().chars().count();
    if len < MIN_CONTENT_CHARS {
        return Err(ScribeError::ContentTooShort { len });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Optimizer: two-phase reasoning + streamed rewrite
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Optimizer {
    client: Client,
    api: ApiConfig,
}

impl Optimizer {
    pub fn new(api: ApiConfig) -> Self {
        Optimizer { client: Client::new(), api }
    }

    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    fn api_key(&self) -> Result<&str> {
        self.api
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ScribeError::MissingApiKey { var: API_KEY_VAR })
    }

    fn chat_request(&self, mode: OptimizationMode, user: String, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.api.model.clone(),
            messages: vec![ChatMessage::system(mode.system_prompt()), ChatMessage::user(user)],
            temperature: self.api.temperature,
            stream,
        }
    }

    async fn send(&self, key: &str, request: &ChatRequest) -> Result<reqwest::Response> {
        debug!(url = %self.api.url, model = %request.model, stream = request.stream, "sending chat request");
        let response = self
            .client
            .post(&self.api.url)
            .header("Authorization", format!("Bearer {}", key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScribeError::Http { status: status.as_u16(), body });
        }
        Ok(response)
    }

    /// Phase one. Never fails: any problem is logged and replaced by
    /// [`REASONING_UNAVAILABLE`].
    async fn fetch_reasoning(&self, key: &str, mode: OptimizationMode, instruction: &str, content: &str) -> String {
        let request = self.chat_request(mode, compose_reasoning_request(instruction, content), false);
        let response = match self.send(key, &request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "reasoning request failed; continuing without it");
                return REASONING_UNAVAILABLE.to_string();
            }
        };
        match response.json::<ChatResponse>().await {
            Ok(body) => body
                .first_content()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(REASONING_UNAVAILABLE)
                .to_string(),
            Err(e) => {
                warn!(error = %e, "reasoning response was not valid JSON");
                REASONING_UNAVAILABLE.to_string()
            }
        }
    }

    /// Run the two-phase optimization, streaming the rewrite.
    ///
    /// `on_progress` receives one [`Progress::Reasoning`], then a
    /// [`Progress::Text`] per decoded chunk, then one [`Progress::Complete`].
    /// Validation and the API key are checked before any request is sent.
    pub async fn optimize(
        &self,
        content: &str,
        mode: OptimizationMode,
        custom: Option<&str>,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<Optimization> {
        validate_content(content)?;
        let key = self.api_key()?;
        let instruction = mode.instruction(custom);

        let reasoning = self.fetch_reasoning(key, mode, &instruction, content).await;
        on_progress(Progress::Reasoning(overall_suggestion(content, "", &reasoning)));

        let request = self.chat_request(mode, compose_rewrite_request(&instruction, content), true);
        let response = self.send(key, &request).await?;
        let text = stream::decode_stream(Box::pin(response.bytes_stream()), |partial| {
            on_progress(Progress::Text(partial.to_string()))
        })
        .await?;

        let modifications = overall_suggestion(content, &text, &reasoning);
        on_progress(Progress::Complete { text: text.clone(), modifications: modifications.clone() });
        info!(%mode, chars = text.chars().count(), "optimization complete");

        Ok(Optimization { optimized_content: text, modifications })
    }

    /// Same two phases without streaming. An empty rewrite is an error.
    pub async fn optimize_once(
        &self,
        content: &str,
        mode: OptimizationMode,
        custom: Option<&str>,
    ) -> Result<Optimization> {
        validate_content(content)?;
        let key = self.api_key()?;
        let instruction = mode.instruction(custom);

        let reasoning = self.fetch_reasoning(key, mode, &instruction, content).await;

        let request = self.chat_request(mode, compose_rewrite_request(&instruction, content), false);
        let body: ChatResponse = self.send(key, &request).await?.json().await?;
        let text = body.first_content().unwrap_or_default().to_string();
        if text.is_empty() {
            return Err(ScribeError::EmptyContent);
        }

        info!(%mode, chars = text.chars().count(), "optimization complete");
        Ok(Optimization { modifications: overall_suggestion(content, &text, &reasoning), optimized_content: text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimizer(key: Option<&str>) -> Optimizer {
        Optimizer::new(ApiConfig {
            // Nothing listens here; tests below must fail before connecting.
            url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            api_key: key.map(str::to_string),
            ..ApiConfig::default()
        })
    }

    #[test]
    fn test_validate_content_counts_trimmed_chars() {
        assert!(validate_content("   short   ").is_err());
        assert!(validate_content("exactly10!").is_ok());
        assert!(matches!(
            validate_content("  123456789  "),
            Err(ScribeError::ContentTooShort { len: 9 })
        ));
        // chars, not bytes
        assert!(validate_content("世界世界世界世界世").is_err());
    }

    #[tokio::test]
    async fn test_short_content_rejected_before_key_check() {
        let err = optimizer(None)
            .optimize("too short", OptimizationMode::Improve, None, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let mut calls = 0;
        let err = optimizer(None)
            .optimize("This content is long enough.", OptimizationMode::Simplify, None, |_| calls += 1)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_empty_key_is_missing() {
        let err = optimizer(Some(""))
            .optimize_once("This content is long enough.", OptimizationMode::Improve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::MissingApiKey { .. }));
    }

    #[test]
    fn test_chat_request_uses_mode_system_prompt() {
        let req = optimizer(Some("k")).chat_request(OptimizationMode::Creative, "hi".to_string(), true);
        assert_eq!(req.messages[0].content, OptimizationMode::Creative.system_prompt());
        assert_eq!(req.messages[1], ChatMessage::user("hi"));
        assert!(req.stream);
    }

    #[test]
    fn test_progress_serializes_tagged() {
        let v = serde_json::to_value(Progress::Text("abc".to_string())).unwrap();
        assert_eq!(v["type"], "text");
        assert_eq!(v["data"], "abc");
        let v = serde_json::to_value(Progress::Complete { text: "t".to_string(), modifications: vec![] }).unwrap();
        assert_eq!(v["type"], "complete");
        assert_eq!(v["data"]["text"], "t");
    }
}
