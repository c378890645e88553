//! Google Gemini gateway.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::errors::ProviderError;
use crate::models::{PromptPayload, ProviderConfig, RawResponse};

use super::{error_for_status, error_for_transport, require_api_key, LlmGateway};

const PROVIDER: &str = "google";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Fixed sampling seed; together with a pinned temperature this keeps runs
/// reproducible for a given model version.
const GENERATION_SEED: u32 = 42;

/// Adapter for the Gemini `generateContent` endpoint.
pub struct GoogleGateway {
    http: reqwest::Client,
    config: ProviderConfig,
    api_base: String,
}

impl GoogleGateway {
    pub fn new(config: &ProviderConfig) -> Self {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to build reqwest client");
        info!(api_base = %api_base, model = %config.model, "created GoogleGateway");
        Self {
            http,
            config: config.clone(),
            api_base,
        }
    }
}

#[async_trait]
impl LlmGateway for GoogleGateway {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, prompt), fields(model = %self.config.model))]
    async fn resolve(&self, prompt: &PromptPayload) -> Result<RawResponse, ProviderError> {
        let api_key = require_api_key(&self.config)?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.api_base, self.config.model
        );
        let body = GenerateRequest::new(&self.config, prompt);

        let started = Instant::now();
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| error_for_transport(PROVIDER, self.config.timeout.as_secs(), e))?;
        let resp = error_for_status(PROVIDER, resp).await?;

        let reply: GenerateResponse =
            resp.json()
                .await
                .map_err(|e| ProviderError::MalformedReply {
                    provider: PROVIDER.to_string(),
                    detail: e.to_string(),
                })?;
        let text = reply.into_text()?;
        let latency = started.elapsed();

        debug!(latency_ms = latency.as_millis() as u64, "generateContent succeeded");
        Ok(RawResponse {
            text,
            provider: PROVIDER.to_string(),
            model: self.config.model.clone(),
            latency,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    system_instruction: ContentParts<'a>,
    contents: [UserContent<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

impl<'a> GenerateRequest<'a> {
    fn new(config: &ProviderConfig, prompt: &'a PromptPayload) -> Self {
        Self {
            system_instruction: ContentParts {
                parts: [Part {
                    text: &prompt.system,
                }],
            },
            contents: [UserContent {
                role: "user",
                parts: [Part { text: &prompt.user }],
            }],
            generation_config: GenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_tokens,
                seed: GENERATION_SEED,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ContentParts<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserContent<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    seed: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate's parts.
    fn into_text(self) -> Result<String, ProviderError> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::MalformedReply {
                provider: PROVIDER.to_string(),
                detail: "reply carries no candidate text".into(),
            });
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    // Absent when generation was blocked before producing output.
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
    #[serde(default)]
    text: String,
}
