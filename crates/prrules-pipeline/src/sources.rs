//! Collaborator seams around the core, and the local implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use prrules_types::{ChangeMetadata, FileDiff, PrRulesError, Result};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn fetch_metadata(&self) -> Result<ChangeMetadata>;
    /// Per-file diffs between two refs, in the order the source lists them.
    async fn fetch_diff(&self, base_ref: &str, head_ref: &str) -> Result<Vec<FileDiff>>;
    /// Fails with [`PrRulesError::NotFound`] when the file does not exist.
    async fn fetch_file(&self, path: &str, reference: &str) -> Result<String>;
}

#[async_trait]
pub trait ChecklistSource: Send + Sync {
    async fn fetch_text(&self) -> Result<String>;
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Fails with [`PrRulesError::PublishError`].
    async fn publish(&self, report: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// StaticChangeSource
// ---------------------------------------------------------------------------

/// On-disk shape of a local change file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeFile {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_base")]
    pub base_ref: String,
    #[serde(default = "default_head")]
    pub head_ref: String,
    #[serde(default)]
    pub file_diffs: Vec<FileDiff>,
    /// Repository files by path, readable at any ref.
    #[serde(default)]
    pub files: HashMap<String, String>,
}

fn default_base() -> String {
    "main".into()
}

fn default_head() -> String {
    "HEAD".into()
}

/// A change held in memory, for local runs and tests.
#[derive(Debug, Clone)]
pub struct StaticChangeSource {
    metadata: ChangeMetadata,
    diffs: Vec<FileDiff>,
    files: HashMap<String, String>,
}

impl StaticChangeSource {
    pub fn new(title: impl Into<String>, body: impl Into<String>, diffs: Vec<FileDiff>) -> Self {
        Self {
            metadata: ChangeMetadata {
                title: title.into(),
                body: body.into(),
                base_ref: default_base(),
                head_ref: default_head(),
            },
            diffs,
            files: HashMap::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn from_change_file(change: ChangeFile) -> Self {
        Self {
            metadata: ChangeMetadata {
                title: change.title,
                body: change.body,
                base_ref: change.base_ref,
                head_ref: change.head_ref,
            },
            diffs: change.file_diffs,
            files: change.files,
        }
    }

    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| collaborator("change file", format!("{}: {e}", path.display())))?;
        let change: ChangeFile = serde_json::from_str(&text)
            .map_err(|e| collaborator("change file", format!("{}: {e}", path.display())))?;
        Ok(Self::from_change_file(change))
    }
}

#[async_trait]
impl ChangeSource for StaticChangeSource {
    async fn fetch_metadata(&self) -> Result<ChangeMetadata> {
        Ok(self.metadata.clone())
    }

    async fn fetch_diff(&self, _base_ref: &str, _head_ref: &str) -> Result<Vec<FileDiff>> {
        Ok(self.diffs.clone())
    }

    async fn fetch_file(&self, path: &str, reference: &str) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| PrRulesError::NotFound {
                path: path.to_string(),
                reference: reference.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Checklist sources
// ---------------------------------------------------------------------------

pub struct FileChecklistSource {
    path: PathBuf,
}

impl FileChecklistSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ChecklistSource for FileChecklistSource {
    async fn fetch_text(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PrRulesError::NotFound {
                path: self.path.display().to_string(),
                reference: "working tree".into(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads the checklist from the change's repository at its base ref, so a
/// change cannot rewrite the rules it is judged by.
pub struct RepositoryChecklistSource {
    source: Arc<dyn ChangeSource>,
    path: String,
}

impl RepositoryChecklistSource {
    pub fn new(source: Arc<dyn ChangeSource>, path: impl Into<String>) -> Self {
        Self {
            source,
            path: path.into(),
        }
    }
}

#[async_trait]
impl ChecklistSource for RepositoryChecklistSource {
    async fn fetch_text(&self) -> Result<String> {
        let metadata = self.source.fetch_metadata().await?;
        tracing::debug!(path = %self.path, reference = %metadata.base_ref, "Reading checklist from repository");
        self.source.fetch_file(&self.path, &metadata.base_ref).await
    }
}

// ---------------------------------------------------------------------------
// Report sinks
// ---------------------------------------------------------------------------

pub struct StdoutSink;

#[async_trait]
impl ReportSink for StdoutSink {
    async fn publish(&self, report: &str) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        let write = async {
            stdout.write_all(report.as_bytes()).await?;
            if !report.ends_with('\n') {
                stdout.write_all(b"\n").await?;
            }
            stdout.flush().await
        };
        write
            .await
            .map_err(|e| PrRulesError::PublishError(format!("stdout: {e}")))
    }
}

pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSink for FileSink {
    async fn publish(&self, report: &str) -> Result<()> {
        tokio::fs::write(&self.path, report)
            .await
            .map_err(|e| PrRulesError::PublishError(format!("{}: {e}", self.path.display())))
    }
}

fn collaborator(name: &str, message: String) -> PrRulesError {
    PrRulesError::CollaboratorFailure {
        collaborator: name.to_string(),
        message,
    }
}
