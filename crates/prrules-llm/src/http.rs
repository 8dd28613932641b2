//! JSON-over-HTTP plumbing shared by the adapters: send, read, classify.

use std::time::Duration;

use prrules_types::PrRulesError;

/// Fallback wait when a 429 carries no hint.
const DEFAULT_RETRY_AFTER_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    provider: &'static str,
    client: reqwest::Client,
    timeout: Duration,
    /// Statuses beyond 429 worth repeating the call for.
    retryable: fn(u16) -> bool,
}

impl HttpTransport {
    pub(crate) fn new(provider: &'static str, timeout: Duration, retryable: fn(u16) -> bool) -> Self {
        Self {
            provider,
            client: reqwest::Client::new(),
            timeout,
            retryable,
        }
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) fn post(&self, url: String) -> reqwest::RequestBuilder {
        self.client.post(url).timeout(self.timeout)
    }

    /// Send `request` and decode a successful JSON body.
    pub(crate) async fn send_json(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, PrRulesError> {
        let resp = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;

        if !(200..300).contains(&status) {
            return Err(self.status_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| PrRulesError::ProviderError {
            provider: self.provider.into(),
            status,
            message: format!("Failed to parse response JSON: {e}"),
            retryable: true,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> PrRulesError {
        if e.is_timeout() {
            return PrRulesError::RequestTimeout {
                provider: self.provider.into(),
                timeout_ms: self.timeout.as_millis() as u64,
            };
        }
        PrRulesError::ProviderError {
            provider: self.provider.into(),
            status: 0,
            message: e.to_string(),
            retryable: true,
        }
    }

    pub(crate) fn status_error(&self, status: u16, body: &str) -> PrRulesError {
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        match status {
            429 => PrRulesError::RateLimited {
                provider: self.provider.into(),
                retry_after_ms: parsed
                    .as_ref()
                    .and_then(|v| v["error"]["retry_after"].as_f64())
                    .map(|secs| (secs * 1000.0) as u64)
                    .unwrap_or(DEFAULT_RETRY_AFTER_MS),
            },
            401 | 403 => PrRulesError::AuthError {
                provider: self.provider.into(),
            },
            _ => PrRulesError::ProviderError {
                provider: self.provider.into(),
                status,
                message: parsed
                    .as_ref()
                    .and_then(error_message)
                    .unwrap_or_else(|| body.to_string()),
                retryable: (self.retryable)(status),
            },
        }
    }
}

/// `{"error": {"message": ..}}` (hosted APIs) or `{"error": ".."}` (Ollama).
fn error_message(body: &serde_json::Value) -> Option<String> {
    let error = &body["error"];
    error["message"]
        .as_str()
        .or_else(|| error.as_str())
        .map(String::from)
}
