//! LLM provider gateways.
//!
//! Each provider gets one adapter implementing [`LlmGateway`]; everything
//! above the gateway is provider-agnostic. Gateways send one prompt and hand
//! back raw reply text, nothing more. Interpreting the reply belongs to
//! [`parser`], and retry policy belongs to the pipeline.

pub mod google;
pub mod groq;
pub mod maritaca;
pub mod parser;
pub mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::models::{PromptPayload, ProviderConfig, ProviderKind, RawResponse};

pub use parser::parse_resolution;
pub use prompt::PromptBuilder;

// ---------------------------------------------------------------------------
// Gateway trait and factory
// ---------------------------------------------------------------------------

/// A chat backend that can answer one resolution prompt.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Provider name for logs and reports.
    fn provider(&self) -> &str;

    /// Model identifier requests are issued with.
    fn model(&self) -> &str;

    /// Send one prompt and return the raw reply text with its latency.
    async fn resolve(&self, prompt: &PromptPayload) -> Result<RawResponse, ProviderError>;
}

/// Build the adapter for the configured provider.
///
/// Construction never touches the network and never checks credentials; a
/// missing API key surfaces as [`ProviderError::MissingCredentials`] on the
/// first call instead.
pub fn create_gateway(config: &ProviderConfig) -> Box<dyn LlmGateway> {
    match config.provider {
        ProviderKind::Google => Box::new(google::GoogleGateway::new(config)),
        ProviderKind::Groq => Box::new(groq::GroqGateway::new(config)),
        ProviderKind::Maritaca => Box::new(maritaca::MaritacaGateway::new(config)),
    }
}

// ---------------------------------------------------------------------------
// Shared request plumbing
// ---------------------------------------------------------------------------

/// API key from the config, or the error naming the variable to set.
pub(crate) fn require_api_key(config: &ProviderConfig) -> Result<&str, ProviderError> {
    config
        .api_key
        .as_deref()
        .ok_or_else(|| ProviderError::MissingCredentials {
            provider: config.provider.name().to_string(),
            env_var: config.provider.api_key_env().to_string(),
        })
}

/// Map a non-success HTTP status onto a provider error, consuming the body.
pub(crate) async fn error_for_status(
    provider: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ProviderError::AuthenticationFailed {
            provider: provider.to_string(),
            status: status.as_u16(),
        });
    }
    if status.as_u16() == 429 {
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return Err(ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        provider: provider.to_string(),
        status: status.as_u16(),
        body: truncate_body(&body),
    })
}

/// Map a reqwest send failure onto a provider error.
pub(crate) fn error_for_transport(
    provider: &str,
    timeout_secs: u64,
    err: reqwest::Error,
) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider: provider.to_string(),
            seconds: timeout_secs,
        }
    } else {
        ProviderError::Transport {
            provider: provider.to_string(),
            source: err,
        }
    }
}

/// Error bodies can be arbitrarily large; keep the first few hundred bytes.
fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

// ---------------------------------------------------------------------------
// OpenAI-style chat wire format (shared by groq and maritaca)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: [ChatMessage<'a>; 2],
    pub temperature: f32,
    pub max_tokens: u32,
}

impl<'a> ChatRequest<'a> {
    pub fn new(config: &'a ProviderConfig, prompt: &'a PromptPayload) -> Self {
        Self {
            model: &config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

impl ChatResponse {
    /// First choice's message content, or a malformed-reply error.
    pub fn into_text(self, provider: &str) -> Result<String, ProviderError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::MalformedReply {
                provider: provider.to_string(),
                detail: "reply carries no choices".into(),
            })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoiceMessage {
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_api_key() {
        let mut config = ProviderConfig::default();
        config.api_key = Some("sk-abc".into());
        assert_eq!(require_api_key(&config).unwrap(), "sk-abc");

        config.api_key = None;
        let err = require_api_key(&config).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::MissingCredentials { ref env_var, .. } if env_var == "GOOGLE_API_KEY"
        ));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");

        let long = "x".repeat(900);
        let truncated = truncate_body(&long);
        assert!(truncated.len() < 600);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_chat_request_shape() {
        let config = ProviderConfig {
            model: "llama-3.3-70b-versatile".into(),
            ..Default::default()
        };
        let prompt = PromptPayload {
            system: "sys".into(),
            user: "usr".into(),
        };

        let body = serde_json::to_value(ChatRequest::new(&config, &prompt)).unwrap();
        assert_eq!(body["model"], "llama-3.3-70b-versatile");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn test_chat_response_text_extraction() {
        let reply: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"merged()"}}]}"#,
        )
        .unwrap();
        assert_eq!(reply.into_text("groq").unwrap(), "merged()");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        let err = empty.into_text("groq").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedReply { .. }));
    }

    #[test]
    fn test_factory_picks_configured_provider() {
        for kind in ProviderKind::ALL {
            let config = ProviderConfig {
                provider: kind,
                model: kind.default_model().to_string(),
                ..Default::default()
            };
            let gateway = create_gateway(&config);
            assert_eq!(gateway.provider(), kind.name());
            assert_eq!(gateway.model(), kind.default_model());
        }
    }
}
