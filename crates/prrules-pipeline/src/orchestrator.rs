//! Checklist orchestration: runs the rule pipeline over every item in order,
//! applies the severity policy and computes the exit signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::Instrument;

use prrules_types::{ChecklistItem, PrRulesError, Result};

use crate::backend::ReasoningBackend;
use crate::config::PipelineConfig;
use crate::consultants::ConsultantPanel;
use crate::controller::RulePipeline;
use crate::events::{ChecklistEvent, EventEmitter};
use crate::report::{BackendMode, ChecklistReport, Outcome, ReportEntry};
use crate::request::{ChangeContext, RuleEvaluationRequest};
use crate::stages::StageExecutors;
use crate::topology::build_strategy;

/// What the surrounding process should exit with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    Success,
    Failure,
}

impl ExitSignal {
    pub fn code(&self) -> i32 {
        match self {
            ExitSignal::Success => 0,
            ExitSignal::Failure => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == ExitSignal::Success
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub report: ChecklistReport,
    pub exit: ExitSignal,
}

// ---------------------------------------------------------------------------
// ChecklistOrchestrator
// ---------------------------------------------------------------------------

pub struct ChecklistOrchestrator {
    pipeline: RulePipeline,
    mode: BackendMode,
    deadline: Option<Duration>,
    events: EventEmitter,
}

impl ChecklistOrchestrator {
    pub fn new(
        pipeline: RulePipeline,
        mode: BackendMode,
        deadline: Option<Duration>,
        events: EventEmitter,
    ) -> Self {
        Self {
            pipeline,
            mode,
            deadline,
            events,
        }
    }

    /// Wire the stages, consultants and topology from configuration. The
    /// topology and backend mode are decided here, once per run.
    pub fn from_config(
        config: &PipelineConfig,
        backend: Arc<dyn ReasoningBackend>,
        events: EventEmitter,
    ) -> Result<Self> {
        let capabilities = backend.capabilities();
        let topology = config.topology.resolve(&capabilities);
        let mode = if capabilities.local {
            BackendMode::Local
        } else {
            BackendMode::Remote
        };

        let executors = Arc::new(StageExecutors::new(
            backend,
            config.max_retries,
            config.backoff.clone(),
        ));
        let panel = Arc::new(ConsultantPanel::new(config.consultants.clone())?);
        let strategy = build_strategy(topology, executors.clone(), panel, events.clone());

        tracing::info!(
            topology = topology.as_str(),
            mode = ?mode,
            max_retries = config.max_retries,
            consultants = config.consultants.len(),
            "Checklist orchestrator configured"
        );

        Ok(Self::new(
            RulePipeline::new(executors, strategy, events.clone()),
            mode,
            config.deadline(),
            events,
        ))
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    /// Evaluate `items` against `change`.
    ///
    /// Fails only with [`PrRulesError::MalformedChecklist`] for an empty list,
    /// before any backend call. Item-level failures end up in the report.
    pub async fn run(&self, items: &[ChecklistItem], change: Arc<ChangeContext>) -> Result<RunResult> {
        if items.is_empty() {
            return Err(PrRulesError::MalformedChecklist(
                "checklist contains no items".into(),
            ));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("checklist_run", run_id = %run_id);
        self.run_items(items, change, run_id).instrument(span).await
    }

    async fn run_items(
        &self,
        items: &[ChecklistItem],
        change: Arc<ChangeContext>,
        run_id: String,
    ) -> Result<RunResult> {
        let start = Instant::now();
        let deadline = self.deadline.map(|d| tokio::time::Instant::now() + d);
        let mut report = ChecklistReport::new(run_id.clone(), self.pipeline.topology(), self.mode);

        self.events.emit(ChecklistEvent::RunStarted {
            run_id: run_id.clone(),
            item_count: items.len(),
            topology: self.pipeline.topology().to_string(),
        });
        tracing::info!(items = items.len(), topology = self.pipeline.topology(), "Checklist run started");

        for (index, item) in items.iter().enumerate() {
            let request = RuleEvaluationRequest::new(change.clone(), item.text.clone());
            let item_start = Instant::now();
            self.events.emit(ChecklistEvent::ItemStarted {
                index,
                rule: item.text.clone(),
            });
            tracing::info!(index, rule = %item.text, severity = ?item.severity, "Evaluating rule");

            let evaluation = self.pipeline.evaluate(&request, index);
            let outcome = match deadline {
                Some(at) => match tokio::time::timeout_at(at, evaluation).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(index, committed = report.entries.len(), "Run deadline reached, abandoning evaluation");
                        report.cancelled = true;
                        self.events.emit(ChecklistEvent::RunCancelled {
                            run_id: run_id.clone(),
                            committed: report.entries.len(),
                        });
                        skip_from(&mut report, items, index, &self.events);
                        break;
                    }
                },
                None => evaluation.await,
            };

            let stop = outcome.is_failure() && item.is_mandatory();
            self.events.emit(ChecklistEvent::ItemCompleted {
                index,
                outcome: outcome.label().to_string(),
                duration_ms: item_start.elapsed().as_millis() as u64,
            });
            tracing::info!(index, outcome = outcome.label(), "Rule evaluated");
            report.entries.push(ReportEntry {
                item: item.clone(),
                outcome,
            });

            if stop {
                tracing::info!(index, rule = %item.text, "Mandatory rule failed, stopping");
                report.stopped_early = true;
                skip_from(&mut report, items, index + 1, &self.events);
                break;
            }
        }

        report.finished_at = Some(Utc::now());
        let exit = self.exit_signal(&report);

        self.events.emit(ChecklistEvent::RunCompleted {
            run_id,
            evaluated: report.evaluated(),
            skipped: report.skipped(),
            stopped_early: report.stopped_early,
            duration_ms: start.elapsed().as_millis() as u64,
        });
        tracing::info!(
            evaluated = report.evaluated(),
            skipped = report.skipped(),
            stopped_early = report.stopped_early,
            cancelled = report.cancelled,
            exit = ?exit,
            "Checklist run finished"
        );

        Ok(RunResult { report, exit })
    }

    fn exit_signal(&self, report: &ChecklistReport) -> ExitSignal {
        if self.mode == BackendMode::Local {
            return ExitSignal::Success;
        }
        if report.stopped_early || report.has_skipped() {
            ExitSignal::Failure
        } else {
            ExitSignal::Success
        }
    }
}

/// Record `items[from..]` as skipped, in order.
fn skip_from(report: &mut ChecklistReport, items: &[ChecklistItem], from: usize, events: &EventEmitter) {
    let rest = items.get(from..).unwrap_or_default();
    if rest.is_empty() {
        return;
    }
    events.emit(ChecklistEvent::ItemsSkipped {
        from_index: from,
        count: rest.len(),
    });
    report.entries.extend(rest.iter().map(|item| ReportEntry {
        item: item.clone(),
        outcome: Outcome::Skipped,
    }));
}
