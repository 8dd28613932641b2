//! Specialized reviewers consulted during the compliance stage.
//!
//! Consultants are declared in configuration, in order. The ones whose globs
//! match a changed file are asked concurrently; their opinions are merged in
//! declaration order, no matter which call finished first.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use prrules_types::{PrRulesError, Result};

use crate::request::{ChangeContext, RuleEvaluationRequest};
use crate::schema::ConsultantOpinion;
use crate::stages::{StageExecutors, StageResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultant {
    /// Unique key, used in coordination plans.
    pub name: String,
    pub role: String,
    pub focus: String,
    /// Empty means the consultant applies to every change.
    #[serde(default)]
    pub file_globs: Vec<String>,
}

impl Consultant {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        focus: impl Into<String>,
        file_globs: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            focus: focus.into(),
            file_globs: file_globs.iter().map(|g| g.to_string()).collect(),
        }
    }
}

pub fn default_consultants() -> Vec<Consultant> {
    vec![
        Consultant::new(
            "python",
            "Python Expert",
            "Python-specific terminology, idioms and best practices",
            &["*.py", "*.pyi"],
        ),
        Consultant::new(
            "sql",
            "SQL Expert",
            "SQL syntax, schema design and database best practices",
            &["*.sql"],
        ),
    ]
}

// ---------------------------------------------------------------------------
// ConsultantPanel
// ---------------------------------------------------------------------------

/// The declared consultants with compiled glob matchers.
pub struct ConsultantPanel {
    members: Vec<(Consultant, Option<GlobSet>)>,
}

impl ConsultantPanel {
    pub fn new(consultants: Vec<Consultant>) -> Result<Self> {
        let mut members = Vec::with_capacity(consultants.len());
        for consultant in consultants {
            if members
                .iter()
                .any(|(c, _): &(Consultant, Option<GlobSet>)| c.name == consultant.name)
            {
                return Err(PrRulesError::Other(format!(
                    "consultant '{}' declared twice",
                    consultant.name
                )));
            }
            let matcher = compile_globs(&consultant)?;
            members.push((consultant, matcher));
        }
        Ok(Self { members })
    }

    /// Consultants relevant to `change`, in declaration order.
    pub fn applicable(&self, change: &ChangeContext) -> Vec<&Consultant> {
        self.members
            .iter()
            .filter(|(_, matcher)| match matcher {
                None => true,
                Some(set) => change.filenames().any(|f| set.is_match(f)),
            })
            .map(|(c, _)| c)
            .collect()
    }

    /// Ask every consultant in `selected` at once.
    ///
    /// The result follows the order of `selected`. Any failure fails the
    /// whole consultation.
    pub async fn consult(
        &self,
        executors: &StageExecutors,
        request: &RuleEvaluationRequest,
        selected: &[&Consultant],
    ) -> StageResult<Vec<ConsultantOpinion>> {
        let calls = selected.iter().map(|c| executors.consult(request, c));
        futures::future::join_all(calls).await.into_iter().collect()
    }
}

fn compile_globs(consultant: &Consultant) -> Result<Option<GlobSet>> {
    if consultant.file_globs.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in &consultant.file_globs {
        let glob = Glob::new(pattern).map_err(|e| {
            PrRulesError::Other(format!(
                "consultant '{}' has invalid glob '{pattern}': {e}",
                consultant.name
            ))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| PrRulesError::Other(format!("consultant '{}': {e}", consultant.name)))
}

/// Fold opinions into one block for the compliance instruction.
pub fn merge_opinions(opinions: &[ConsultantOpinion]) -> String {
    opinions
        .iter()
        .map(|o| format!("## {}\n{}\n", o.consultant, o.opinion.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
