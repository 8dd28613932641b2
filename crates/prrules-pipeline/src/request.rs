//! The value evaluated by one run of the rule pipeline.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use prrules_types::{ChangeMetadata, FileDiff};

/// Title, description and per-file diffs of the change. Shared by every
/// checklist item of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeContext {
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Order is significant; duplicates are kept.
    #[serde(default)]
    pub file_diffs: Vec<FileDiff>,
}

impl ChangeContext {
    pub fn new(title: impl Into<String>, body: impl Into<String>, file_diffs: Vec<FileDiff>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            file_diffs,
        }
    }

    pub fn from_metadata(metadata: &ChangeMetadata, file_diffs: Vec<FileDiff>) -> Self {
        Self::new(metadata.title.clone(), metadata.body.clone(), file_diffs)
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.file_diffs.iter().map(|d| d.filename.as_str())
    }
}

/// One rule checked against the shared change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEvaluationRequest {
    pub change: Arc<ChangeContext>,
    pub rule: String,
}

impl RuleEvaluationRequest {
    pub fn new(change: Arc<ChangeContext>, rule: impl Into<String>) -> Self {
        Self {
            change,
            rule: rule.into(),
        }
    }

    /// Render the change and the rule into the context block every stage
    /// instruction starts with. Pure: the same request always renders to the
    /// same bytes.
    pub fn render_context(&self) -> String {
        let change = &self.change;
        let mut out = String::new();

        out.push_str("# Change under review\n\n");
        let _ = writeln!(out, "## Title\n{}\n", change.title.trim());

        let body = change.body.trim();
        if body.is_empty() {
            out.push_str("## Description\n(no description provided)\n\n");
        } else {
            let _ = writeln!(out, "## Description\n{body}\n");
        }

        out.push_str("## Modified files\n");
        if change.file_diffs.is_empty() {
            out.push_str("(no file changes)\n");
        }
        for file in &change.file_diffs {
            let fence = fence_for(&file.diff);
            let _ = writeln!(out, "\n### File: {}", file.filename);
            let _ = writeln!(out, "{fence}diff\n{}\n{fence}", file.diff.trim_end_matches('\n'));
        }

        let _ = write!(out, "\n# Rule under evaluation\n'{}'\n", self.rule.trim());
        out
    }
}

/// A backtick fence longer than any backtick run inside `text`.
fn fence_for(text: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in text.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}
