use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::http::HttpTransport;
use crate::{FinishReason, ProviderAdapter, ProviderCapabilities, Request, Response, Role, Usage};
use prrules_types::PrRulesError;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Messages API. No native schema enforcement: the schema travels in the
/// system prompt and the pipeline validates the answer.
#[derive(Debug)]
pub struct AnthropicAdapter {
    http: HttpTransport,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            // 529 is "overloaded".
            http: HttpTransport::new("anthropic", Duration::from_secs(120), |s| {
                matches!(s, 500 | 502 | 503 | 529)
            }),
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, PrRulesError> {
        std::env::var("ANTHROPIC_API_KEY")
            .map(Self::new)
            .map_err(|_| PrRulesError::AuthError {
                provider: "anthropic".into(),
            })
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http.set_timeout(timeout);
        self
    }
}

fn build_request_body(request: &Request) -> serde_json::Value {
    let (system, turns): (Vec<_>, Vec<_>) = request
        .messages
        .iter()
        .partition(|m| m.role == Role::System);

    let messages: Vec<serde_json::Value> = turns
        .iter()
        .map(|m| {
            json!({
                "role": m.role.as_str(),
                "content": [{ "type": "text", "text": m.content }],
            })
        })
        .collect();

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if !system.is_empty() {
        let joined: Vec<&str> = system.iter().map(|m| m.content.as_str()).collect();
        body["system"] = json!(joined.join("\n\n"));
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }
    body
}

fn parse_response(body: &serde_json::Value) -> Response {
    let text: String = body["content"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect();

    let input_tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = body["usage"]["output_tokens"].as_u64().unwrap_or(0);

    Response {
        id: body["id"].as_str().unwrap_or_default().to_string(),
        text,
        usage: Usage::new(input_tokens, output_tokens),
        model: body["model"].as_str().unwrap_or_default().to_string(),
        finish_reason: match body["stop_reason"].as_str() {
            Some("max_tokens") => FinishReason::MaxTokens,
            Some("stop_sequence") => FinishReason::StopSequence,
            _ => FinishReason::EndTurn,
        },
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, PrRulesError> {
        let call = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&build_request_body(request));
        let body = self.http.send_json(call).await?;
        Ok(parse_response(&body))
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        "claude-sonnet-4-5-20250929"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tools: true,
            structured_output: false,
            local: false,
        }
    }
}
