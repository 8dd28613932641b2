use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::http::HttpTransport;
use crate::{FinishReason, ProviderAdapter, ProviderCapabilities, Request, Response, Usage};
use prrules_types::PrRulesError;

/// Responses API, with the output schema enforced server-side.
#[derive(Debug)]
pub struct OpenAiAdapter {
    http: HttpTransport,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            http: HttpTransport::new("openai", Duration::from_secs(120), |s| {
                matches!(s, 500 | 502 | 503 | 504)
            }),
            api_key,
            base_url: "https://api.openai.com".to_string(),
            default_model: "gpt-4o".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, PrRulesError> {
        std::env::var("OPENAI_API_KEY")
            .map(Self::new)
            .map_err(|_| PrRulesError::AuthError {
                provider: "openai".into(),
            })
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http.set_timeout(timeout);
        self
    }
}

fn build_request_body(request: &Request) -> serde_json::Value {
    let input: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let mut body = json!({ "model": request.model, "input": input });
    if let Some(max_tokens) = request.max_tokens {
        body["max_output_tokens"] = json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }
    if let Some(format) = &request.response_format {
        body["text"] = json!({
            "format": {
                "type": "json_schema",
                "name": format.name,
                "schema": format.schema,
                "strict": true,
            }
        });
    }
    body
}

fn parse_response(body: &serde_json::Value) -> Result<Response, PrRulesError> {
    let blocks = body["output"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|item| item["type"] == "message")
        .flat_map(|item| item["content"].as_array().into_iter().flatten());

    let mut text = String::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("output_text") => text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("refusal") => {
                return Err(PrRulesError::ProviderError {
                    provider: "openai".into(),
                    status: 200,
                    message: format!(
                        "Model refused: {}",
                        block["refusal"].as_str().unwrap_or("refused")
                    ),
                    retryable: false,
                })
            }
            _ => {}
        }
    }

    let input_tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = body["usage"]["output_tokens"].as_u64().unwrap_or(0);

    Ok(Response {
        id: body["id"].as_str().unwrap_or_default().to_string(),
        text,
        usage: Usage::new(input_tokens, output_tokens),
        model: body["model"].as_str().unwrap_or_default().to_string(),
        finish_reason: if body["status"] == "incomplete" {
            FinishReason::MaxTokens
        } else {
            FinishReason::EndTurn
        },
    })
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, PrRulesError> {
        let call = self
            .http
            .post(format!("{}/v1/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&build_request_body(request));
        let body = self.http.send_json(call).await?;
        parse_response(&body)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tools: true,
            structured_output: true,
            local: false,
        }
    }
}
