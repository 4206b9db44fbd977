// src/brain.rs
// NEURAL ENGINE BRIDGE
// The text-generation capability every component talks to, plus the
// production client for an OpenAI-compatible chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::DiscoveryError;

/// Caller/responder roles understood by the text-generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Stateless text-generation capability.
///
/// Implementations may fail with [`DiscoveryError::Service`]; callers in the
/// core always recover locally with a fallback value.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        turns: &[ChatTurn],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, DiscoveryError>;
}

// --- WIRE FORMAT ---

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    message: String,
}

/// HTTP client for chat completions with per-call timeout and retry/backoff.
#[derive(Debug, Clone)]
pub struct AgentBrain {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl AgentBrain {
    pub fn new(config: &LlmConfig) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DiscoveryError::service(format!("failed to build HTTP client: {e}")))?;

        if config.api_key.is_empty() {
            warn!("no LLM API key configured; every generation call will fall back");
        }

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
        let jitter_ms = rand::thread_rng().gen_range(0..=self.retry_base_delay.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter_ms)
    }

    async fn send_once(&self, body: &CompletionRequest<'_>) -> Attempt {
        let response = match self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            // Timeouts and connection resets are worth another attempt.
            Err(e) => return Attempt::Transient(format!("HTTP request failed: {e}")),
        };

        let status = response.status();
        debug!(status = %status, "completion response received");

        if status.is_success() {
            let parsed = response.json::<CompletionResponse>().await.map_err(|e| {
                DiscoveryError::service(format!("failed to parse completion response: {e}"))
            });
            return match parsed {
                Ok(parsed) => Attempt::Done(text_of(parsed)),
                Err(e) => Attempt::Done(Err(e)),
            };
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(api_err) => format!("API returned {status}: {}", api_err.error.message),
            Err(_) => format!("API returned {status}: {body}"),
        };

        if is_transient_error(status) {
            Attempt::Transient(message)
        } else {
            Attempt::Done(Err(DiscoveryError::service(message)))
        }
    }
}

enum Attempt {
    Done(Result<String, DiscoveryError>),
    Transient(String),
}

fn text_of(response: CompletionResponse) -> Result<String, DiscoveryError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if text.trim().is_empty() {
        Err(DiscoveryError::service("empty completion"))
    } else {
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for AgentBrain {
    async fn generate(
        &self,
        system_prompt: &str,
        turns: &[ChatTurn],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, DiscoveryError> {
        if self.api_key.is_empty() {
            return Err(DiscoveryError::service("no API key configured"));
        }

        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: system_prompt,
        });
        for turn in turns {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(WireMessage {
                role,
                content: &turn.content,
            });
        }

        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
        };

        let mut last_error = String::from("completion request failed after retries");
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying completion after transient error");
                tokio::time::sleep(delay).await;
            }

            match self.send_once(&body).await {
                Attempt::Done(result) => return result,
                Attempt::Transient(message) => {
                    warn!(attempt, error = %message, "transient completion failure");
                    last_error = message;
                }
            }
        }

        Err(DiscoveryError::service(last_error))
    }
}

/// Status codes that indicate a transient failure worth retrying.
fn is_transient_error(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}
