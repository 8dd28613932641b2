use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::http::HttpTransport;
use crate::{FinishReason, ProviderAdapter, ProviderCapabilities, Request, Response, Usage};
use prrules_types::PrRulesError;

const DEFAULT_HOST: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";

/// A locally running Ollama server (`/api/chat`).
#[derive(Debug)]
pub struct OllamaAdapter {
    http: HttpTransport,
    base_url: String,
    default_model: String,
}

impl OllamaAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            // CPU inference is slow.
            http: HttpTransport::new("ollama", Duration::from_secs(300), |s| s >= 500),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// `OLLAMA_HOST`, or the default local port.
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        Self::new(normalize_host(&host))
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

/// `OLLAMA_HOST` is often `host:port` with no scheme.
fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn build_request_body(request: &Request) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": false,
    });
    // Decoding is constrained to the schema given in `format`.
    if let Some(format) = &request.response_format {
        body["format"] = format.schema.clone();
    }

    let mut options = serde_json::Map::new();
    if let Some(temp) = request.temperature {
        options.insert("temperature".into(), json!(temp));
    }
    if let Some(max_tokens) = request.max_tokens {
        options.insert("num_predict".into(), json!(max_tokens));
    }
    if !options.is_empty() {
        body["options"] = options.into();
    }
    body
}

fn parse_response(body: &serde_json::Value) -> Response {
    let input_tokens = body["prompt_eval_count"].as_u64().unwrap_or(0);
    let output_tokens = body["eval_count"].as_u64().unwrap_or(0);

    Response {
        id: body["created_at"].as_str().unwrap_or_default().to_string(),
        text: body["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        usage: Usage::new(input_tokens, output_tokens),
        model: body["model"].as_str().unwrap_or_default().to_string(),
        finish_reason: if body["done_reason"] == "length" {
            FinishReason::MaxTokens
        } else {
            FinishReason::EndTurn
        },
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, PrRulesError> {
        let call = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&build_request_body(request));
        let body = self.http.send_json(call).await?;
        Ok(parse_response(&body))
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tools: false,
            structured_output: true,
            local: true,
        }
    }
}
