use async_trait::async_trait;

use prrules_types::PrRulesError;

use crate::{Request, Response};

/// What a provider can do beyond plain text completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Tool use, i.e. the model can be trusted to plan delegation.
    pub tools: bool,
    /// A [`crate::ResponseFormat`] is enforced by the provider itself.
    pub structured_output: bool,
    /// Runs on the local machine rather than a hosted API.
    pub local: bool,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, PrRulesError>;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn capabilities(&self) -> ProviderCapabilities;
}

/// Type-erased provider, as stored by [`crate::LlmClient`].
pub struct DynProvider(Box<dyn ProviderAdapter>);

impl std::fmt::Debug for DynProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynProvider").field(&self.name()).finish()
    }
}

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Box::new(provider))
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, PrRulesError> {
        self.0.complete(request).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        self.0.capabilities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Message, Usage};

    struct EchoProvider;

    #[async_trait]
    impl ProviderAdapter for EchoProvider {
        async fn complete(&self, request: &Request) -> Result<Response, PrRulesError> {
            let last = request.messages.last().map(|m| m.content.clone());
            Ok(Response {
                id: "echo-1".into(),
                text: last.unwrap_or_default(),
                usage: Usage::default(),
                model: request.model.clone(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn default_model(&self) -> &str {
            "echo-small"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                local: true,
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn dyn_provider_forwards_completion() {
        let provider = DynProvider::new(EchoProvider);
        let req = Request::new("echo-small", vec![Message::user("{\"opinion\": \"ok\"}")]);
        let resp = provider.complete(&req).await.unwrap();
        assert_eq!(resp.text, "{\"opinion\": \"ok\"}");
        assert_eq!(resp.model, "echo-small");
    }

    #[test]
    fn dyn_provider_exposes_capabilities() {
        let provider = DynProvider::new(EchoProvider);
        assert_eq!(provider.name(), "echo");
        assert_eq!(provider.default_model(), "echo-small");
        let caps = provider.capabilities();
        assert!(caps.local);
        assert!(!caps.tools);
        assert!(!caps.structured_output);
    }
}
