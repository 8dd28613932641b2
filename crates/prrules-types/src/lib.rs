//! Shared data model and error taxonomy for the PR rules compliance pipeline.
//!
//! This crate provides the foundational types used across all other crates:
//! - `PrRulesError`: unified error taxonomy
//! - `ChecklistItem` / `Severity`: one rule of the checklist
//! - `ComplianceAssessment` / `Finding`: the verdict produced for a rule
//! - `FileDiff` / `ChangeMetadata`: what the change source hands us

use serde::{Deserialize, Serialize};

/// Unified error type for all subsystems.
#[derive(Debug, thiserror::Error)]
pub enum PrRulesError {
    // === Backend Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    // === Pipeline Errors ===
    #[error("Response does not match schema '{schema}': {message}")]
    SchemaViolation { schema: String, message: String },

    #[error("Stage '{stage}' changed `{field}` from {before} to {after}")]
    AssessmentTampered {
        stage: String,
        field: String,
        before: String,
        after: String,
    },

    #[error("Max retries exhausted for stage '{stage}' after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        stage: String,
        attempts: usize,
        last_error: String,
    },

    #[error("Malformed checklist: {0}")]
    MalformedChecklist(String),

    // === Collaborator Errors ===
    #[error("'{path}' not found at ref '{reference}'")]
    NotFound { path: String, reference: String },

    #[error("{collaborator} failed: {message}")]
    CollaboratorFailure {
        collaborator: String,
        message: String,
    },

    #[error("Failed to publish report: {0}")]
    PublishError(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PrRulesError {
    /// Returns `true` if the same call may succeed when repeated. Schema
    /// violations count.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PrRulesError::RateLimited { .. }
                | PrRulesError::RequestTimeout { .. }
                | PrRulesError::SchemaViolation { .. }
                | PrRulesError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the backend could not be reached or did not answer.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            PrRulesError::RateLimited { .. }
                | PrRulesError::RequestTimeout { .. }
                | PrRulesError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the error must abort the whole checklist run rather
    /// than a single item.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            PrRulesError::MalformedChecklist(_)
                | PrRulesError::NotFound { .. }
                | PrRulesError::CollaboratorFailure { .. }
                | PrRulesError::PublishError(_)
        )
    }
}

/// A convenience alias for `Result<T, PrRulesError>`.
pub type Result<T> = std::result::Result<T, PrRulesError>;

// ---------------------------------------------------------------------------
// Checklist items
// ---------------------------------------------------------------------------

/// How a failing rule affects the rest of the checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A failure stops evaluation of every later item.
    Mandatory,
    /// A failure is reported but evaluation continues.
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub text: String,
    pub severity: Severity,
}

impl ChecklistItem {
    pub fn mandatory(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Mandatory,
        }
    }

    pub fn advisory(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Advisory,
        }
    }

    pub fn is_mandatory(&self) -> bool {
        self.severity == Severity::Mandatory
    }
}

// ---------------------------------------------------------------------------
// Stage outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    pub is_relevant: bool,
}

/// The part of the change a finding points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Title,
    Description,
    File,
    Other,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Title,
        Section::Description,
        Section::File,
        Section::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Title => "title",
            Section::Description => "description",
            Section::File => "file",
            Section::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|section| section.as_str() == s)
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One way the change fails the rule under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub section: Section,
    /// Only set when `section` is [`Section::File`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_changes: Vec<String>,
}

/// Verdict for a single rule.
///
/// `affected_sections` is non-empty exactly when `complies` is false. The
/// `score` is informational and never overrides `complies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceAssessment {
    pub complies: bool,
    pub score: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_sections: Vec<Finding>,
}

impl ComplianceAssessment {
    /// The verdict recorded for a rule that does not apply to the change.
    pub fn trivially_compliant() -> Self {
        Self {
            complies: true,
            score: 100,
            affected_sections: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Change source shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub filename: String,
    pub diff: String,
}

impl FileDiff {
    pub fn new(filename: impl Into<String>, diff: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            diff: diff.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMetadata {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub base_ref: String,
    pub head_ref: String,
}
