//! LLM client with multi-provider support (OpenAI, Anthropic, Ollama).
//!
//! Provides the `ProviderAdapter` trait, the `DynProvider` wrapper, a
//! middleware chain and `LlmClient` for routing requests to a provider.

#[cfg(feature = "providers")]
mod anthropic;
#[cfg(feature = "providers")]
mod client;
#[cfg(feature = "providers")]
mod http;
#[cfg(feature = "providers")]
mod ollama;
#[cfg(feature = "providers")]
mod openai;
#[cfg(feature = "providers")]
mod provider;
mod types;

#[cfg(feature = "providers")]
pub use anthropic::AnthropicAdapter;
#[cfg(feature = "providers")]
pub use client::{
    provider_for_model, LlmClient, LoggingMiddleware, Middleware, UsageTotals, UsageTracker,
};
#[cfg(feature = "providers")]
pub use ollama::OllamaAdapter;
#[cfg(feature = "providers")]
pub use openai::OpenAiAdapter;
#[cfg(feature = "providers")]
pub use provider::{DynProvider, ProviderAdapter, ProviderCapabilities};
pub use types::*;
