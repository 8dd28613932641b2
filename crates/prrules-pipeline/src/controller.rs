//! Per-rule pipeline: relevance short-circuit, then the configured topology.

use std::sync::Arc;

use crate::events::{ChecklistEvent, EventEmitter};
use crate::report::Outcome;
use crate::request::RuleEvaluationRequest;
use crate::stages::{Stage, StageError, StageExecutors};
use crate::topology::TopologyStrategy;

pub struct RulePipeline {
    executors: Arc<StageExecutors>,
    strategy: Box<dyn TopologyStrategy>,
    events: EventEmitter,
}

impl RulePipeline {
    pub fn new(
        executors: Arc<StageExecutors>,
        strategy: Box<dyn TopologyStrategy>,
        events: EventEmitter,
    ) -> Self {
        Self {
            executors,
            strategy,
            events,
        }
    }

    pub fn topology(&self) -> &'static str {
        self.strategy.name()
    }

    /// Evaluate one rule. Never fails: stage errors become [`Outcome::Errored`].
    pub async fn evaluate(&self, request: &RuleEvaluationRequest, index: usize) -> Outcome {
        match self.run(request, index).await {
            Ok(outcome) => outcome,
            Err(StageError { stage, error }) => {
                tracing::warn!(index, stage = %stage, error = %error, "Rule evaluation errored");
                self.events.emit(ChecklistEvent::StageFailed {
                    index,
                    stage: stage.to_string(),
                    error: error.to_string(),
                });
                Outcome::Errored {
                    stage,
                    reason: error.to_string(),
                }
            }
        }
    }

    async fn run(
        &self,
        request: &RuleEvaluationRequest,
        index: usize,
    ) -> Result<Outcome, StageError> {
        self.events.emit(ChecklistEvent::StageStarted {
            index,
            stage: Stage::Relevance.to_string(),
        });
        let verdict = self.executors.relevance(request).await?;
        if !verdict.is_relevant {
            tracing::info!(index, rule = %request.rule, "Rule not relevant to change");
            return Ok(Outcome::irrelevant());
        }

        let assessment = self.strategy.run_pipeline(request, index).await?;
        Ok(Outcome::Evaluated {
            relevant: true,
            assessment,
        })
    }
}
