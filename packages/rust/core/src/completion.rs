//! AI completion behind the [`CompletionService`] seam.
//!
//! [`OpenRouterClient`] speaks the OpenAI-compatible chat-completions API.
//! Output is untrusted text; callers parse and score it.

use std::time::Duration;

use async_trait::async_trait;
use brandpipe_shared::{AppConfig, BrandPipeError, OpenRouterConfig, Result, resolve_api_key};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// What a completion is for; selects the system prompt and response format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionKind {
    Guide,
    Plan,
    Draft,
}

impl CompletionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guide => "guide",
            Self::Plan => "plan",
            Self::Draft => "draft",
        }
    }

    fn expects_json(&self) -> bool {
        matches!(self, Self::Guide | Self::Plan)
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Self::Guide => {
                "You are a brand strategist. Reply with a single JSON object and nothing else."
            }
            Self::Plan => {
                "You are a social media planner. Reply with a single JSON object and nothing else."
            }
            Self::Draft => {
                "You are a copywriter. Reply with the post text only: no preamble, no quotes."
            }
        }
    }
}

impl std::fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate(&self, prompt: &str, kind: CompletionKind) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenRouter
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenRouter (or any compatible endpoint).
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String, config: &OpenRouterConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrandPipeError::Generation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.default_model.clone(),
        })
    }

    /// Build from app config, reading the key from the configured env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        Self::new(
            api_key,
            &config.openrouter,
            Duration::from_secs(config.onboarding.completion_timeout_secs),
        )
    }
}

#[async_trait]
impl CompletionService for OpenRouterClient {
    #[instrument(skip_all, fields(kind = %kind, model = %self.model))]
    async fn generate(&self, prompt: &str, kind: CompletionKind) -> Result<String> {
        let start = std::time::Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: kind.system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.7,
            response_format: kind.expects_json().then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "completion request failed");
                BrandPipeError::Generation(format!("{kind} request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, error = %error_text, "completion API error");
            return Err(BrandPipeError::Generation(format!(
                "{kind} completion returned HTTP {status}"
            )));
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| BrandPipeError::Generation(format!("{kind} response unreadable: {e}")))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BrandPipeError::Generation(format!("{kind} completion was empty")))?;

        debug!(duration_ms = start.elapsed().as_millis() as u64, "completion received");
        Ok(content)
    }
}
