//! The reasoning backend seam and its LLM-backed implementation.

use async_trait::async_trait;

use prrules_llm::{LlmClient, Message, Request, ResponseFormat};
use prrules_types::Result;

use crate::schema::OutputSchema;

// ---------------------------------------------------------------------------
// Instruction
// ---------------------------------------------------------------------------

/// A rendered stage instruction: the role framing plus the task text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub role: String,
    pub task: String,
}

impl Instruction {
    pub fn new(role: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            task: task.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ReasoningBackend
// ---------------------------------------------------------------------------

/// What the configured backend can do. Read once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    /// The backend enforces the output schema itself.
    pub structured_output: bool,
    /// The backend can take on a coordinating role (tool-capable models).
    pub delegation: bool,
    /// The backend runs locally; used for non-blocking trial runs.
    pub local: bool,
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Return the raw response text. Validation is the caller's job.
    async fn evaluate(&self, instruction: &Instruction, schema: &OutputSchema) -> Result<String>;

    fn capabilities(&self) -> BackendCapabilities;
}

// ---------------------------------------------------------------------------
// LlmBackend
// ---------------------------------------------------------------------------

/// [`ReasoningBackend`] over an [`LlmClient`], pinned to one model.
pub struct LlmBackend {
    client: LlmClient,
    model: String,
    provider: Option<String>,
    max_tokens: Option<u32>,
    capabilities: BackendCapabilities,
}

impl LlmBackend {
    /// Fails when no registered provider can serve `model`.
    pub fn new(
        client: LlmClient,
        model: impl Into<String>,
        provider: Option<String>,
    ) -> Result<Self> {
        let model = model.into();
        let mut probe = Request::new(model.clone(), Vec::new());
        probe.provider = provider.clone();
        let resolved = client.resolve_provider(&probe)?;
        let provided = resolved.capabilities();
        let capabilities = BackendCapabilities {
            structured_output: provided.structured_output,
            delegation: provided.tools,
            local: provided.local,
        };
        tracing::debug!(
            provider = resolved.name(),
            model = %model,
            ?capabilities,
            "Reasoning backend ready"
        );
        Ok(Self {
            client,
            model,
            provider,
            max_tokens: None,
            capabilities,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, instruction: &Instruction, schema: &OutputSchema) -> Request {
        // The schema always goes into the prompt; native enforcement is extra.
        let system = format!("{}\n\n{}", instruction.role, schema.prompt_fragment());
        let mut request = Request::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(instruction.task.clone())],
        )
        .with_temperature(0.0);
        request.provider = self.provider.clone();
        request.max_tokens = self.max_tokens;
        if self.capabilities.structured_output {
            request = request.with_response_format(ResponseFormat {
                name: schema.name.clone(),
                schema: schema.schema.clone(),
            });
        }
        request
    }
}

#[async_trait]
impl ReasoningBackend for LlmBackend {
    async fn evaluate(&self, instruction: &Instruction, schema: &OutputSchema) -> Result<String> {
        let request = self.build_request(instruction, schema);
        let response = self.client.complete(&request).await?;
        Ok(response.text)
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }
}
