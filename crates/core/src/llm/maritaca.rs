//! Maritaca gateway (OpenAI-compatible chat completions).

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::errors::ProviderError;
use crate::models::{PromptPayload, ProviderConfig, RawResponse};

use super::{
    error_for_status, error_for_transport, require_api_key, ChatRequest, ChatResponse, LlmGateway,
};

const PROVIDER: &str = "maritaca";
const DEFAULT_API_BASE: &str = "https://api.maritaca.ai/api/v1/chat";

pub struct MaritacaGateway {
    http: reqwest::Client,
    config: ProviderConfig,
    api_base: String,
}

impl MaritacaGateway {
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
        info!(api_base = %api_base, model = %config.model, "created MaritacaGateway");
        Self {
            http,
            config: config.clone(),
            api_base,
        }
    }
}

#[async_trait]
impl LlmGateway for MaritacaGateway {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, prompt), fields(model = %self.config.model))]
    async fn resolve(&self, prompt: &PromptPayload) -> Result<RawResponse, ProviderError> {
        let api_key = require_api_key(&self.config)?;
        let url = format!("{}/completions", self.api_base);
        let body = ChatRequest::new(&self.config, prompt);

        let started = Instant::now();
        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| error_for_transport(PROVIDER, self.config.timeout.as_secs(), e))?;
        let resp = error_for_status(PROVIDER, resp).await?;

        let reply: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedReply {
                provider: PROVIDER.to_string(),
                detail: e.to_string(),
            })?;
        let text = reply.into_text(PROVIDER)?;
        let latency = started.elapsed();

        debug!(latency_ms = latency.as_millis() as u64, "chat completion succeeded");
        Ok(RawResponse {
            text,
            provider: PROVIDER.to_string(),
            model: self.config.model.clone(),
            latency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;

    #[test]
    fn test_default_endpoint() {
        let gateway = MaritacaGateway::new(&ProviderConfig {
            provider: ProviderKind::Maritaca,
            model: "sabia-3".into(),
            ..Default::default()
        });
        assert_eq!(gateway.api_base, "https://api.maritaca.ai/api/v1/chat");
        assert_eq!(gateway.model(), "sabia-3");
        assert_eq!(gateway.provider(), "maritaca");
    }
}
