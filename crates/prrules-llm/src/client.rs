use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use prrules_types::PrRulesError;

use crate::{DynProvider, ProviderAdapter, Request, Response};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Hooks run around every completion, in registration order.
pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            schema = request.response_format.as_ref().map(|f| f.name.as_str()).unwrap_or("-"),
            "LLM request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
    }
}

/// Totals seen by a [`UsageTracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Counts completions and tokens. Clones share the counters, so keep one
/// clone outside the client to read the totals.
#[derive(Clone, Default)]
pub struct UsageTracker {
    requests: Arc<AtomicU64>,
    input: Arc<AtomicU64>,
    output: Arc<AtomicU64>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> UsageTotals {
        UsageTotals {
            requests: self.requests.load(Ordering::Relaxed),
            input_tokens: self.input.load(Ordering::Relaxed),
            output_tokens: self.output.load(Ordering::Relaxed),
        }
    }
}

impl Middleware for UsageTracker {
    fn after(&self, _request: &Request, response: &mut Response) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Model families
// ---------------------------------------------------------------------------

/// Provider that serves a model id, judged by its family prefix.
pub fn provider_for_model(model: &str) -> Option<&'static str> {
    const FAMILIES: &[(&str, &str)] = &[
        ("gpt-", "openai"),
        ("o1", "openai"),
        ("o3", "openai"),
        ("o4", "openai"),
        ("claude-", "anthropic"),
    ];
    FAMILIES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, provider)| *provider)
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// Routes requests to registered providers and runs middleware around them.
#[derive(Default)]
pub struct LlmClient {
    providers: Vec<DynProvider>,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a name twice replaces the earlier provider.
    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let provider = DynProvider::new(provider);
        self.providers.retain(|p| p.name() != provider.name());
        self.providers.push(provider);
    }

    pub fn with_provider(mut self, provider: impl ProviderAdapter + 'static) -> Self {
        self.register_provider(provider);
        self
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, PrRulesError> {
        let provider = self.resolve_provider(request)?;
        let mut req = request.clone();
        for m in &self.middleware {
            m.before(&mut req);
        }

        let mut resp = provider.complete(&req).await?;
        for m in &self.middleware {
            m.after(&req, &mut resp);
        }
        Ok(resp)
    }

    /// The provider that would serve `request`: the one it names, else the
    /// one its model family belongs to, else the first registered.
    pub fn resolve_provider(&self, request: &Request) -> Result<&DynProvider, PrRulesError> {
        let by_name = |name: &str| self.providers.iter().find(|p| p.name() == name);

        if let Some(name) = request.provider.as_deref() {
            return by_name(name)
                .ok_or_else(|| PrRulesError::Other(format!("Provider '{name}' not registered")));
        }
        if let Some(provider) = provider_for_model(&request.model).and_then(by_name) {
            return Ok(provider);
        }
        self.providers
            .first()
            .ok_or_else(|| PrRulesError::Other("No providers registered".to_string()))
    }
}
