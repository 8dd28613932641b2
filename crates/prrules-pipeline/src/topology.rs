//! Wiring strategies for the stages after relevance.
//!
//! Both strategies produce the final assessment for one relevant rule:
//!
//! - **Flat**: consult applicable experts, check compliance, synthesize feedback.
//! - **Hierarchical**: a coordinator picks which experts to consult and whether
//!   the assessment is verified before feedback.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use prrules_types::ComplianceAssessment;

use crate::backend::BackendCapabilities;
use crate::consultants::{Consultant, ConsultantPanel};
use crate::events::{ChecklistEvent, EventEmitter};
use crate::request::RuleEvaluationRequest;
use crate::stages::{Stage, StageExecutors, StageResult};

/// Configured topology. `Auto` is resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    #[default]
    Auto,
    Flat,
    Hierarchical,
}

impl TopologyKind {
    /// `Auto` becomes hierarchical only when the backend can delegate.
    pub fn resolve(self, capabilities: &BackendCapabilities) -> TopologyKind {
        match self {
            TopologyKind::Auto if capabilities.delegation => TopologyKind::Hierarchical,
            TopologyKind::Auto => TopologyKind::Flat,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyKind::Auto => "auto",
            TopologyKind::Flat => "flat",
            TopologyKind::Hierarchical => "hierarchical",
        }
    }
}

impl std::str::FromStr for TopologyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(TopologyKind::Auto),
            "flat" => Ok(TopologyKind::Flat),
            "hierarchical" => Ok(TopologyKind::Hierarchical),
            other => Err(format!(
                "unknown topology '{other}' (expected auto, flat or hierarchical)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// TopologyStrategy
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TopologyStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run everything after the relevance check. `index` is the item's
    /// position in the checklist, for events.
    async fn run_pipeline(
        &self,
        request: &RuleEvaluationRequest,
        index: usize,
    ) -> StageResult<ComplianceAssessment>;
}

/// Shared pieces both strategies need.
struct Wiring {
    executors: Arc<StageExecutors>,
    panel: Arc<ConsultantPanel>,
    events: EventEmitter,
}

impl Wiring {
    fn stage_started(&self, index: usize, stage: Stage) {
        tracing::debug!(index, stage = %stage, "Stage started");
        self.events.emit(ChecklistEvent::StageStarted {
            index,
            stage: stage.to_string(),
        });
    }

    async fn consult_and_check(
        &self,
        request: &RuleEvaluationRequest,
        index: usize,
        selected: &[&Consultant],
    ) -> StageResult<ComplianceAssessment> {
        let opinions = if selected.is_empty() {
            Vec::new()
        } else {
            self.events.emit(ChecklistEvent::ConsultantsSelected {
                index,
                consultants: selected.iter().map(|c| c.name.clone()).collect(),
            });
            self.stage_started(index, Stage::Consultation);
            self.panel
                .consult(&self.executors, request, selected)
                .await?
        };

        self.stage_started(index, Stage::Compliance);
        self.executors.compliance(request, &opinions).await
    }

    async fn feedback(
        &self,
        request: &RuleEvaluationRequest,
        index: usize,
        prior: &ComplianceAssessment,
    ) -> StageResult<ComplianceAssessment> {
        self.stage_started(index, Stage::Feedback);
        self.executors.feedback(request, prior).await
    }
}

// ---------------------------------------------------------------------------
// FlatTopology
// ---------------------------------------------------------------------------

/// Compliance then feedback. Verification never runs.
pub struct FlatTopology {
    wiring: Wiring,
}

impl FlatTopology {
    pub fn new(
        executors: Arc<StageExecutors>,
        panel: Arc<ConsultantPanel>,
        events: EventEmitter,
    ) -> Self {
        Self {
            wiring: Wiring {
                executors,
                panel,
                events,
            },
        }
    }
}

#[async_trait]
impl TopologyStrategy for FlatTopology {
    fn name(&self) -> &'static str {
        "flat"
    }

    async fn run_pipeline(
        &self,
        request: &RuleEvaluationRequest,
        index: usize,
    ) -> StageResult<ComplianceAssessment> {
        let applicable = self.wiring.panel.applicable(&request.change);
        let assessment = self
            .wiring
            .consult_and_check(request, index, &applicable)
            .await?;
        self.wiring.feedback(request, index, &assessment).await
    }
}

// ---------------------------------------------------------------------------
// HierarchicalTopology
// ---------------------------------------------------------------------------

/// A coordinator call decides consultation and verification per item.
pub struct HierarchicalTopology {
    wiring: Wiring,
}

impl HierarchicalTopology {
    pub fn new(
        executors: Arc<StageExecutors>,
        panel: Arc<ConsultantPanel>,
        events: EventEmitter,
    ) -> Self {
        Self {
            wiring: Wiring {
                executors,
                panel,
                events,
            },
        }
    }
}

#[async_trait]
impl TopologyStrategy for HierarchicalTopology {
    fn name(&self) -> &'static str {
        "hierarchical"
    }

    async fn run_pipeline(
        &self,
        request: &RuleEvaluationRequest,
        index: usize,
    ) -> StageResult<ComplianceAssessment> {
        let w = &self.wiring;
        let applicable = w.panel.applicable(&request.change);

        w.stage_started(index, Stage::Coordination);
        let plan = w.executors.coordination(request, &applicable).await?;
        tracing::debug!(index, consult = ?plan.consult, verify = plan.verify, "Coordination plan");

        // Keep declaration order regardless of the order the plan lists names in.
        let selected: Vec<&Consultant> = applicable
            .into_iter()
            .filter(|c| plan.consult.contains(&c.name))
            .collect();

        let mut assessment = w.consult_and_check(request, index, &selected).await?;

        if plan.verify {
            w.stage_started(index, Stage::Verification);
            assessment = w.executors.verification(request, &assessment).await?;
        }

        w.feedback(request, index, &assessment).await
    }
}

/// Build the strategy for a resolved topology.
pub fn build_strategy(
    kind: TopologyKind,
    executors: Arc<StageExecutors>,
    panel: Arc<ConsultantPanel>,
    events: EventEmitter,
) -> Box<dyn TopologyStrategy> {
    match kind {
        TopologyKind::Hierarchical => {
            Box::new(HierarchicalTopology::new(executors, panel, events))
        }
        TopologyKind::Flat | TopologyKind::Auto => {
            Box::new(FlatTopology::new(executors, panel, events))
        }
    }
}
