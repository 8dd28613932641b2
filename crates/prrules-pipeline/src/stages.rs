//! Stage executors: one backend call each, validated against the stage schema.
//!
//! Executors are stateless apart from the backend they call, so any of them
//! can be retried on its own. Verification and feedback only refine the
//! explanation of a prior assessment; their output is checked against the
//! input and rejected with [`PrRulesError::AssessmentTampered`] when the
//! verdict or score moved.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use prrules_types::{ComplianceAssessment, PrRulesError, RelevanceVerdict, Result};

use crate::backend::{Instruction, ReasoningBackend};
use crate::consultants::Consultant;
use crate::request::RuleEvaluationRequest;
use crate::retry::{execute_with_retry, BackoffPolicy};
use crate::schema::{self, ConsultantOpinion, CoordinationPlan, OutputSchema};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Relevance,
    Coordination,
    Consultation,
    Compliance,
    Verification,
    Feedback,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Relevance => "relevance",
            Stage::Coordination => "coordination",
            Stage::Consultation => "consultation",
            Stage::Compliance => "compliance",
            Stage::Verification => "verification",
            Stage::Feedback => "feedback",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure attributed to the stage that produced it.
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub error: PrRulesError,
}

impl StageError {
    pub fn new(stage: Stage, error: PrRulesError) -> Self {
        Self { stage, error }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.error)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;

// ---------------------------------------------------------------------------
// Role framings
// ---------------------------------------------------------------------------

const RELEVANCE_ROLE: &str = "You are a Rule Relevance Analyst. You understand both high-level \
requirements and the details of code changes, and you decide whether a rule is related to what a \
change actually contains.";

const COMPLIANCE_ROLE: &str = "You are a Compliance Specialist with deep knowledge of coding \
standards. You check a change against exactly one rule. Focus only on that rule and ignore \
anything the rule does not ask about.";

const COORDINATOR_ROLE: &str = "You are the Compliance Specialist coordinating a review. You can \
ask specialized experts for an opinion and have a reviewer verify your assessment. Decide which \
of the available experts are worth consulting for this rule.";

const VERIFICATION_ROLE: &str = "You are a Review Agent with a background in code review and \
quality assurance. You verify a prior compliance assessment for one rule. You must keep the \
verdict (`complies`) and the `score` exactly as given; only correct and sharpen the findings.";

const FEEDBACK_ROLE: &str = "You are a Feedback Agent who turns technical assessments into clear, \
actionable feedback a junior engineer can follow. You must keep the verdict (`complies`) and the \
`score` exactly as given; only rewrite the `reason` and `suggested_changes` prose.";

fn relevance_task(request: &RuleEvaluationRequest) -> String {
    format!(
        "{}\nDecide whether the rule above is relevant to the contents of this change.",
        request.render_context()
    )
}

fn compliance_task(request: &RuleEvaluationRequest, opinions: &[ConsultantOpinion]) -> String {
    let mut task = request.render_context();
    if !opinions.is_empty() {
        task.push_str("\n# Expert opinions\n");
        task.push_str(&crate::consultants::merge_opinions(opinions));
    }
    task.push_str(
        "\nCheck the change for compliance with the rule above and nothing else. If it does not \
comply, list every affected section with the reason it fails and what should change. Only \
explain what fails; never restate what complies.",
    );
    task
}

fn coordination_task(request: &RuleEvaluationRequest, candidates: &[&Consultant]) -> String {
    let mut task = request.render_context();
    task.push_str("\n# Available experts\n");
    if candidates.is_empty() {
        task.push_str("(none)\n");
    }
    for c in candidates {
        task.push_str(&format!("- `{}`: {}. {}\n", c.name, c.role, c.focus));
    }
    task.push_str(
        "\nChoose the experts to consult for this rule (possibly none) and whether the \
assessment should be verified by a reviewer.",
    );
    task
}

fn consultation_task(request: &RuleEvaluationRequest, consultant: &Consultant) -> String {
    format!(
        "{}\nGive your opinion on the change as {}, limited to your area: {}. \
Stay on the rule above.",
        request.render_context(),
        consultant.role,
        consultant.focus
    )
}

fn review_task(request: &RuleEvaluationRequest, prior: &ComplianceAssessment, ask: &str) -> String {
    let prior_json = serde_json::to_string_pretty(prior).unwrap_or_default();
    format!(
        "{}\n# Prior assessment\n```json\n{}\n```\n\n{}",
        request.render_context(),
        prior_json,
        ask
    )
}

/// Reject a refinement that changed `complies` or `score`.
pub fn ensure_untampered(
    stage: Stage,
    before: &ComplianceAssessment,
    after: &ComplianceAssessment,
) -> Result<()> {
    let tampered = |field: &str, b: String, a: String| PrRulesError::AssessmentTampered {
        stage: stage.to_string(),
        field: field.to_string(),
        before: b,
        after: a,
    };
    if before.complies != after.complies {
        return Err(tampered(
            "complies",
            before.complies.to_string(),
            after.complies.to_string(),
        ));
    }
    if before.score != after.score {
        return Err(tampered(
            "score",
            before.score.to_string(),
            after.score.to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// StageExecutors
// ---------------------------------------------------------------------------

pub struct StageExecutors {
    backend: Arc<dyn ReasoningBackend>,
    max_retries: usize,
    backoff: BackoffPolicy,
}

impl StageExecutors {
    pub fn new(backend: Arc<dyn ReasoningBackend>, max_retries: usize, backoff: BackoffPolicy) -> Self {
        Self {
            backend,
            max_retries,
            backoff,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ReasoningBackend> {
        &self.backend
    }

    /// Call the backend and validate, retrying schema and transport failures
    /// with the same instruction.
    async fn invoke<T, P>(
        &self,
        stage: Stage,
        instruction: &Instruction,
        schema: &OutputSchema,
        parse: P,
    ) -> StageResult<T>
    where
        P: Fn(&str) -> Result<T>,
    {
        let parse = &parse;
        execute_with_retry(
            || async move {
                let raw = self.backend.evaluate(instruction, schema).await?;
                parse(&raw).inspect_err(|e| {
                    tracing::debug!(stage = %stage, error = %e, raw = %raw, "Invalid stage output");
                })
            },
            self.max_retries,
            &self.backoff,
            stage.as_str(),
        )
        .await
        .map_err(|e| StageError::new(stage, e))
    }

    pub async fn relevance(&self, request: &RuleEvaluationRequest) -> StageResult<RelevanceVerdict> {
        let instruction = Instruction::new(RELEVANCE_ROLE, relevance_task(request));
        self.invoke(
            Stage::Relevance,
            &instruction,
            &OutputSchema::relevance(),
            schema::parse_relevance,
        )
        .await
    }

    pub async fn compliance(
        &self,
        request: &RuleEvaluationRequest,
        opinions: &[ConsultantOpinion],
    ) -> StageResult<ComplianceAssessment> {
        let instruction = Instruction::new(COMPLIANCE_ROLE, compliance_task(request, opinions));
        self.invoke(
            Stage::Compliance,
            &instruction,
            &OutputSchema::assessment(),
            schema::parse_assessment,
        )
        .await
    }

    /// `candidates` bounds what the plan may name.
    pub async fn coordination(
        &self,
        request: &RuleEvaluationRequest,
        candidates: &[&Consultant],
    ) -> StageResult<CoordinationPlan> {
        let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        let instruction = Instruction::new(COORDINATOR_ROLE, coordination_task(request, candidates));
        self.invoke(
            Stage::Coordination,
            &instruction,
            &OutputSchema::coordination(&names),
            |raw| schema::parse_plan(raw, &names),
        )
        .await
    }

    pub async fn consult(
        &self,
        request: &RuleEvaluationRequest,
        consultant: &Consultant,
    ) -> StageResult<ConsultantOpinion> {
        let role = format!(
            "You are a {}. You give opinions only on the requested rule and only within your \
specialty.",
            consultant.role
        );
        let instruction = Instruction::new(role, consultation_task(request, consultant));
        self.invoke(
            Stage::Consultation,
            &instruction,
            &OutputSchema::consultation(),
            |raw| schema::parse_opinion(raw, &consultant.name),
        )
        .await
    }

    pub async fn verification(
        &self,
        request: &RuleEvaluationRequest,
        prior: &ComplianceAssessment,
    ) -> StageResult<ComplianceAssessment> {
        let task = review_task(
            request,
            prior,
            "Verify the prior assessment for the rule above. Keep `complies` and `score` \
unchanged; fix inaccurate findings and drop any that concern other rules.",
        );
        self.refine(Stage::Verification, Instruction::new(VERIFICATION_ROLE, task), prior)
            .await
    }

    pub async fn feedback(
        &self,
        request: &RuleEvaluationRequest,
        prior: &ComplianceAssessment,
    ) -> StageResult<ComplianceAssessment> {
        let task = review_task(
            request,
            prior,
            "Rewrite the findings of the prior assessment into clear, actionable feedback for \
the author. Keep `complies` and `score` unchanged. Suggested changes may include short fenced \
examples.",
        );
        self.refine(Stage::Feedback, Instruction::new(FEEDBACK_ROLE, task), prior)
            .await
    }

    async fn refine(
        &self,
        stage: Stage,
        instruction: Instruction,
        prior: &ComplianceAssessment,
    ) -> StageResult<ComplianceAssessment> {
        let refined = self
            .invoke(
                stage,
                &instruction,
                &OutputSchema::assessment(),
                schema::parse_assessment,
            )
            .await?;
        // Checked outside the retry loop: tampering is never retried.
        ensure_untampered(stage, prior, &refined).map_err(|e| StageError::new(stage, e))?;
        Ok(refined)
    }
}
