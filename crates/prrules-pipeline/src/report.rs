//! The checklist report and its markdown rendering.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prrules_types::{ChecklistItem, ComplianceAssessment, Finding, Section};

use crate::stages::Stage;

/// What happened to one checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Evaluated {
        /// False when the relevance stage found the rule does not apply.
        relevant: bool,
        assessment: ComplianceAssessment,
    },
    /// The item could not be evaluated. Never counts as passing.
    Errored { stage: Stage, reason: String },
    /// Not evaluated: an earlier mandatory item failed or the run was cancelled.
    Skipped,
}

impl Outcome {
    pub fn irrelevant() -> Self {
        Outcome::Evaluated {
            relevant: false,
            assessment: ComplianceAssessment::trivially_compliant(),
        }
    }

    /// Non-compliant or errored.
    pub fn is_failure(&self) -> bool {
        match self {
            Outcome::Evaluated { assessment, .. } => !assessment.complies,
            Outcome::Errored { .. } => true,
            Outcome::Skipped => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Evaluated { relevant: false, .. } => "not_applicable",
            Outcome::Evaluated { assessment, .. } if assessment.complies => "complies",
            Outcome::Evaluated { .. } => "does_not_comply",
            Outcome::Errored { .. } => "errored",
            Outcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub item: ChecklistItem,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    Remote,
    /// Results never fail the run.
    Local,
}

/// Result of one checklist run. Entries are in checklist order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub topology: String,
    pub backend: BackendMode,
    pub entries: Vec<ReportEntry>,
    pub stopped_early: bool,
    pub cancelled: bool,
}

impl ChecklistReport {
    pub fn new(run_id: impl Into<String>, topology: impl Into<String>, backend: BackendMode) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            topology: topology.into(),
            backend,
            entries: Vec::new(),
            stopped_early: false,
            cancelled: false,
        }
    }

    pub fn count(&self, label: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome.label() == label)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn evaluated(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Evaluated { .. }))
            .count()
    }

    pub fn has_skipped(&self) -> bool {
        self.entries.iter().any(|e| e.outcome == Outcome::Skipped)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.outcome.is_failure())
    }

    pub fn to_markdown(&self) -> String {
        render_markdown(self)
    }
}

// ---------------------------------------------------------------------------
// Markdown rendering
// ---------------------------------------------------------------------------

const HEADING: &str = "# PR Rules Checklist";

pub fn render_markdown(report: &ChecklistReport) -> String {
    let mut out = format!("{HEADING}\n\n");

    for entry in &report.entries {
        render_entry(&mut out, entry);
    }

    out.push_str("\n---\n");
    let failed = report.count("does_not_comply");
    let errored = report.count("errored");
    let _ = write!(
        out,
        "{} of {} rules evaluated: {} passed, {} failed",
        report.evaluated(),
        report.entries.len(),
        report.evaluated() - failed,
        failed
    );
    if errored > 0 {
        let _ = write!(out, ", {errored} could not be evaluated");
    }
    if report.skipped() > 0 {
        let _ = write!(out, ", {} skipped", report.skipped());
    }
    out.push_str(".\n");

    if report.cancelled {
        out.push_str("\n> The run was cancelled before every rule was evaluated.\n");
    } else if report.stopped_early {
        out.push_str("\n> Evaluation stopped at the first failing mandatory rule.\n");
    }
    if report.backend == BackendMode::Local {
        out.push_str("\n> Local backend: results are informational and do not block the change.\n");
    }

    out
}

fn render_entry(out: &mut String, entry: &ReportEntry) {
    let rule = &entry.item.text;
    let tag = if entry.item.is_mandatory() {
        "mandatory"
    } else {
        "advisory"
    };

    match &entry.outcome {
        Outcome::Skipped => {
            let _ = writeln!(out, "- [ ] {rule}");
        }
        Outcome::Evaluated {
            relevant: false, ..
        } => {
            let _ = writeln!(out, "- [x] ✅ {rule} _(not applicable to this change)_");
        }
        Outcome::Evaluated { assessment, .. } if assessment.complies => {
            let _ = writeln!(out, "- [x] ✅ {rule} (score {}/100)", assessment.score);
        }
        Outcome::Evaluated { assessment, .. } => {
            let icon = if entry.item.is_mandatory() { "❌" } else { "⚠️" };
            let _ = writeln!(
                out,
                "- [x] {icon} **{rule}** ({tag}, score {}/100)",
                assessment.score
            );
            out.push_str("  - **Reason for failure:**\n");
            for finding in &assessment.affected_sections {
                render_finding(out, finding);
            }
        }
        Outcome::Errored { stage, reason } => {
            let _ = writeln!(out, "- [x] 🚫 **{rule}** ({tag}, could not be evaluated)");
            let _ = writeln!(out, "  - **Stage:** {stage}");
            let _ = writeln!(out, "  - **Error:** {}", one_line(reason));
        }
    }
}

fn render_finding(out: &mut String, finding: &Finding) {
    let _ = writeln!(out, "    - **Affected section:** {}", finding.section);
    if let (Section::File, Some(file)) = (finding.section, &finding.file) {
        let _ = writeln!(out, "    - **Affected file:** `{file}`");
    }
    let _ = writeln!(out, "    - **Reason:** {}", indent_continuation(&finding.reason, 6));
    if !finding.suggested_changes.is_empty() {
        out.push_str("    - **Suggested changes:**\n");
        for change in &finding.suggested_changes {
            let _ = writeln!(out, "      - {}", indent_continuation(change, 8));
        }
    }
}

/// Indent every line after the first so multi-line text (fenced examples)
/// stays inside its list item.
fn indent_continuation(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    let mut lines = text.trim_end().lines();
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        if !line.is_empty() {
            out.push_str(&pad);
            out.push_str(line);
        }
    }
    out
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
