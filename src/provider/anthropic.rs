//! Anthropic Messages API adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::{GenerateProvider, GenerateRequest, GenerateResponse};
use crate::config::ProviderConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Thin adapter over the Anthropic Messages endpoint with a client-level
/// timeout. Retry/backoff lives in [`super::ModelCaller`], not here.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicAdapter {
    /// Create from the environment (`ANTHROPIC_API_KEY`, optional
    /// `ANTHROPIC_BASE_URL`), with the timeout from provider config.
    pub fn from_env(cfg: &ProviderConfig) -> Result<Self, ProviderError> {
        if !cfg.provider_type.eq_ignore_ascii_case("anthropic") {
            return Err(ProviderError::config(format!(
                "unsupported provider type: {}",
                cfg.provider_type
            )));
        }
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::config("ANTHROPIC_API_KEY not set"))?;
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        Self::with_config(api_key, base_url, Duration::from_secs_f64(cfg.timeout_s))
    }

    /// Create with explicit configuration (tests point this at a mock server).
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        let key_value = HeaderValue::from_str(&api_key)
            .map_err(|_| ProviderError::config("invalid API key format"))?;
        headers.insert("x-api-key", key_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct MessagesApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: [ApiMessage<'a>; 1],
    // No top_p field: some Anthropic models reject requests carrying both
    // temperature and top_p, and this harness always drives sampling via
    // temperature. The configured top_p is still recorded in the log.
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesApiResponse {
    id: Option<String>,
    content: Option<Vec<ContentBlock>>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl GenerateProvider for AnthropicAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let api_req = MessagesApiRequest {
            model: &req.model,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            messages: [ApiMessage {
                role: "user",
                content: &req.prompt_text,
            }],
        };

        let response = self
            .client
            .post(self.messages_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = response.text().await?;

        let mut ctx = ErrorContext::new().with_status(status.as_u16());
        if let Some(id) = &request_id {
            ctx = ctx.with_request_id(id);
        }

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ApiErrorEnvelope>(&body) {
                Ok(ApiErrorEnvelope { error: Some(e) }) => (
                    e.error_type.unwrap_or_default(),
                    e.message.unwrap_or_default(),
                ),
                _ => (String::new(), format!("HTTP {}", status.as_u16())),
            };
            if !code.is_empty() {
                ctx = ctx.with_code(&code);
            }
            return Err(match status.as_u16() {
                429 => ProviderError::rate_limited(ctx),
                401 | 403 => ProviderError::auth(message, ctx),
                400 | 404 | 422 => ProviderError::InvalidRequest {
                    message,
                    context: Some(ctx),
                },
                s => ProviderError::api(s, message, ctx),
            });
        }

        let parsed: MessagesApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::api(status.as_u16(), format!("invalid JSON: {e}"), ctx.clone())
        })?;

        // content is a list of blocks; concatenate the text-bearing ones.
        let text = parsed
            .content
            .unwrap_or_default()
            .into_iter()
            .filter(|b| b.block_type.as_deref() == Some("text"))
            .filter_map(|b| b.text)
            .collect::<String>()
            .trim()
            .to_string();

        let usage = parsed.usage;
        Ok(GenerateResponse {
            text,
            stop_reason: parsed.stop_reason,
            input_tokens: usage.as_ref().and_then(|u| u.input_tokens),
            output_tokens: usage.as_ref().and_then(|u| u.output_tokens),
            request_id: parsed.id.or(request_id),
        })
    }
}
