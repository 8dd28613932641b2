//! Rule compliance pipeline.
//!
//! Evaluates a change against a markdown checklist of natural-language rules:
//! per-rule staged evaluation (relevance, compliance, verification, feedback),
//! checklist orchestration with severity-based early stop, and the report.

pub mod backend;
pub mod checklist;
pub mod config;
pub mod consultants;
pub mod controller;
pub mod events;
pub mod orchestrator;
pub mod report;
pub mod request;
pub mod retry;
pub mod runner;
pub mod schema;
pub mod sources;
pub mod stages;
pub mod topology;

pub use backend::{BackendCapabilities, Instruction, LlmBackend, ReasoningBackend};
pub use checklist::{parse_checklist, parse_checklist_strict};
pub use config::PipelineConfig;
pub use consultants::{default_consultants, merge_opinions, Consultant, ConsultantPanel};
pub use controller::RulePipeline;
pub use events::{ChecklistEvent, EventEmitter};
pub use orchestrator::{ChecklistOrchestrator, ExitSignal, RunResult};
pub use report::{render_markdown, BackendMode, ChecklistReport, Outcome, ReportEntry};
pub use request::{ChangeContext, RuleEvaluationRequest};
pub use retry::{execute_with_retry, BackoffPolicy};
pub use runner::run_check;
pub use schema::{ConsultantOpinion, CoordinationPlan, OutputSchema};
pub use sources::{
    ChangeFile, ChangeSource, ChecklistSource, FileChecklistSource, FileSink, ReportSink,
    RepositoryChecklistSource, StaticChangeSource, StdoutSink,
};
pub use stages::{ensure_untampered, Stage, StageError, StageExecutors, StageResult};
pub use topology::{
    build_strategy, FlatTopology, HierarchicalTopology, TopologyKind, TopologyStrategy,
};
