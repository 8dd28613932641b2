//! End-to-end tests for the rule compliance pipeline.
//!
//! A scripted backend answers each call by rule and stage, and records every
//! call so tests can assert which stages ran.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use prrules_pipeline::schema::{CONSULTATION, COORDINATION, RELEVANCE};
use prrules_pipeline::{
    run_check, BackendCapabilities, BackendMode, BackoffPolicy, ChangeContext, ChecklistEvent,
    ChecklistOrchestrator, ChecklistSource, EventEmitter, ExitSignal, Instruction, Outcome,
    OutputSchema, PipelineConfig, ReasoningBackend, ReportSink, RepositoryChecklistSource,
    RunResult, Stage, StaticChangeSource, TopologyKind,
};
use prrules_types::{ChecklistItem, FileDiff, PrRulesError, Result};

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

const PASS: &str = r#"{"complies": true, "score": 95, "affected_sections": []}"#;
const FAIL: &str = r#"{"complies": false, "score": 20, "affected_sections": [
    {"section": "file", "file": "app/db.py", "reason": "Builds SQL with string formatting",
     "suggested_changes": ["Use query parameters"]}]}"#;
const FAIL_FLIPPED: &str = r#"{"complies": true, "score": 20, "affected_sections": []}"#;

#[derive(Clone, Copy)]
enum Reply {
    Json(&'static str),
    Timeout,
}

#[derive(Clone)]
struct Script {
    relevant: bool,
    compliance: Reply,
    verification: Option<Reply>,
    feedback: Option<Reply>,
    plan: &'static str,
    delay: Option<Duration>,
}

impl Script {
    fn answering(compliance: Reply) -> Self {
        Self {
            relevant: true,
            compliance,
            verification: None,
            feedback: None,
            plan: r#"{"consult": [], "verify": false}"#,
            delay: None,
        }
    }

    fn passes() -> Self {
        Self::answering(Reply::Json(PASS))
    }

    fn fails() -> Self {
        Self::answering(Reply::Json(FAIL))
    }

    fn irrelevant() -> Self {
        Self {
            relevant: false,
            ..Self::passes()
        }
    }

    fn feedback(mut self, reply: Reply) -> Self {
        self.feedback = Some(reply);
        self
    }

    fn verification(mut self, reply: Reply) -> Self {
        self.verification = Some(reply);
        self
    }

    fn plan(mut self, plan: &'static str) -> Self {
        self.plan = plan;
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct ScriptedBackend {
    capabilities: BackendCapabilities,
    rules: HashMap<&'static str, Script>,
    calls: Mutex<Vec<(&'static str, String)>>,
    tasks: Mutex<Vec<(&'static str, String)>>,
    /// Relevance calls that fail with a timeout before succeeding.
    flaky_relevance: AtomicUsize,
    /// Consultant role whose consultation takes longer than the others.
    slow_consultant: Option<&'static str>,
}

impl ScriptedBackend {
    fn new(rules: Vec<(&'static str, Script)>) -> Self {
        Self {
            capabilities: BackendCapabilities::default(),
            rules: rules.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            flaky_relevance: AtomicUsize::new(0),
            slow_consultant: None,
        }
    }

    fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn calls_of(&self, kind: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn stages_for(&self, rule: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r == rule)
            .map(|(k, _)| *k)
            .collect()
    }

    fn tasks_of(&self, kind: &str) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, t)| t.clone())
            .collect()
    }

    fn rule_in(&self, task: &str) -> Option<(&'static str, &Script)> {
        self.rules
            .iter()
            .find(|(rule, _)| task.contains(&format!("'{rule}'")))
            .map(|(rule, script)| (*rule, script))
    }
}

fn reply(reply: Reply) -> Result<String> {
    match reply {
        Reply::Json(text) => Ok(text.to_string()),
        Reply::Timeout => Err(PrRulesError::RequestTimeout {
            provider: "scripted".into(),
            timeout_ms: 1,
        }),
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn evaluate(&self, instruction: &Instruction, schema: &OutputSchema) -> Result<String> {
        let kind: &'static str = match schema.name.as_str() {
            RELEVANCE => "relevance",
            COORDINATION => "coordination",
            CONSULTATION => "consultation",
            _ if instruction.role.starts_with("You are a Review Agent") => "verification",
            _ if instruction.role.starts_with("You are a Feedback Agent") => "feedback",
            _ => "compliance",
        };
        let (rule, script) = self
            .rule_in(&instruction.task)
            .map(|(r, s)| (r, s.clone()))
            .ok_or_else(|| PrRulesError::Other("unscripted rule".into()))?;

        self.calls.lock().unwrap().push((kind, rule.to_string()));
        self.tasks
            .lock()
            .unwrap()
            .push((kind, instruction.task.clone()));

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        match kind {
            "relevance" => {
                let left = self.flaky_relevance.load(Ordering::SeqCst);
                if left > 0 {
                    self.flaky_relevance.store(left - 1, Ordering::SeqCst);
                    return reply(Reply::Timeout);
                }
                Ok(format!("{{\"is_relevant\": {}}}", script.relevant))
            }
            "coordination" => Ok(script.plan.to_string()),
            "consultation" => {
                if let Some(slow) = self.slow_consultant {
                    if instruction.task.contains(slow) {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
                Ok(r#"{"opinion": "Parameterize every query."}"#.to_string())
            }
            "verification" => reply(script.verification.unwrap_or(script.compliance)),
            "feedback" => reply(script.feedback.unwrap_or(script.compliance)),
            _ => reply(script.compliance),
        }
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn change() -> Arc<ChangeContext> {
    Arc::new(ChangeContext::new(
        "feat: add user lookup",
        "Adds a lookup endpoint backed by a new table.",
        vec![
            FileDiff::new("app/db.py", "+cursor.execute(f\"SELECT * FROM users WHERE id={id}\")"),
            FileDiff::new("migrations/001.sql", "+CREATE TABLE users (id INT PRIMARY KEY);"),
        ],
    ))
}

fn config(topology: TopologyKind) -> PipelineConfig {
    PipelineConfig {
        topology,
        backoff: BackoffPolicy::None,
        ..Default::default()
    }
}

fn orchestrator_with(backend: &Arc<ScriptedBackend>, config: &PipelineConfig) -> ChecklistOrchestrator {
    ChecklistOrchestrator::from_config(config, backend.clone(), EventEmitter::default()).unwrap()
}

async fn run(backend: &Arc<ScriptedBackend>, items: &[ChecklistItem]) -> RunResult {
    orchestrator_with(backend, &config(TopologyKind::Flat))
        .run(items, change())
        .await
        .unwrap()
}

fn texts(result: &RunResult) -> Vec<&str> {
    result
        .report
        .entries
        .iter()
        .map(|e| e.item.text.as_str())
        .collect()
}

fn assessment(outcome: &Outcome) -> &prrules_types::ComplianceAssessment {
    match outcome {
        Outcome::Evaluated { assessment, .. } => assessment,
        other => panic!("expected evaluated outcome, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Ordering and short-circuits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn report_order_equals_checklist_order() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ("Rule C", Script::passes()),
        ("Rule A", Script::irrelevant()),
        ("Rule B", Script::fails()),
    ]));
    let items = vec![
        ChecklistItem::advisory("Rule C"),
        ChecklistItem::mandatory("Rule A"),
        ChecklistItem::advisory("Rule B"),
    ];

    let result = run(&backend, &items).await;
    assert_eq!(texts(&result), vec!["Rule C", "Rule A", "Rule B"]);
    assert!(!result.report.stopped_early);
    assert_eq!(result.exit, ExitSignal::Success);
}

#[tokio::test]
async fn irrelevant_rule_short_circuits_to_trivial_pass() {
    let backend = Arc::new(ScriptedBackend::new(vec![("No jQuery", Script::irrelevant())]));
    let result = run(&backend, &[ChecklistItem::mandatory("No jQuery")]).await;

    match &result.report.entries[0].outcome {
        Outcome::Evaluated {
            relevant,
            assessment,
        } => {
            assert!(!relevant);
            assert!(assessment.complies);
            assert_eq!(assessment.score, 100);
            assert!(assessment.affected_sections.is_empty());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(backend.stages_for("No jQuery"), vec!["relevance"]);
    assert_eq!(backend.calls_of("compliance"), 0);
    assert_eq!(backend.calls_of("feedback"), 0);
}

#[tokio::test]
async fn mandatory_failure_skips_everything_after_it() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ("R1", Script::fails()),
        ("R2", Script::passes()),
        ("R3", Script::passes()),
    ]));
    let items = vec![
        ChecklistItem::mandatory("R1"),
        ChecklistItem::advisory("R2"),
        ChecklistItem::mandatory("R3"),
    ];

    let result = run(&backend, &items).await;
    let report = &result.report;
    assert!(report.stopped_early);
    assert!(!assessment(&report.entries[0].outcome).complies);
    assert_eq!(report.entries[1].outcome, Outcome::Skipped);
    assert_eq!(report.entries[2].outcome, Outcome::Skipped);
    assert_eq!(texts(&result), vec!["R1", "R2", "R3"]);
    assert!(backend.stages_for("R2").is_empty());
    assert!(backend.stages_for("R3").is_empty());
    assert_eq!(result.exit, ExitSignal::Failure);
}

#[tokio::test]
async fn advisory_failure_does_not_block() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ("R1", Script::fails()),
        ("R2", Script::passes()),
    ]));
    let items = vec![ChecklistItem::advisory("R1"), ChecklistItem::mandatory("R2")];

    let result = run(&backend, &items).await;
    assert!(!result.report.stopped_early);
    assert!(!assessment(&result.report.entries[0].outcome).complies);
    assert!(assessment(&result.report.entries[1].outcome).complies);
    assert_eq!(result.exit, ExitSignal::Success);
}

#[tokio::test]
async fn findings_invariant_holds_for_every_entry() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ("A", Script::passes()),
        ("B", Script::fails()),
        ("C", Script::irrelevant()),
        ("D", Script::fails()),
    ]));
    let items: Vec<_> = ["A", "B", "C", "D"]
        .into_iter()
        .map(ChecklistItem::advisory)
        .collect();

    let result = run(&backend, &items).await;
    for entry in &result.report.entries {
        let a = assessment(&entry.outcome);
        assert_eq!(a.complies, a.affected_sections.is_empty(), "entry {}", entry.item.text);
    }
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn feedback_tampering_is_errored_and_stops_mandatory() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ("Use params", Script::fails().feedback(Reply::Json(FAIL_FLIPPED))),
        ("Later", Script::passes()),
    ]));
    let items = vec![
        ChecklistItem::mandatory("Use params"),
        ChecklistItem::advisory("Later"),
    ];

    let result = run(&backend, &items).await;
    match &result.report.entries[0].outcome {
        Outcome::Errored { stage, reason } => {
            assert_eq!(*stage, Stage::Feedback);
            assert!(reason.contains("complies"), "reason: {reason}");
        }
        other => panic!("expected Errored, got {other:?}"),
    }
    // Tampering is never retried.
    assert_eq!(backend.calls_of("feedback"), 1);
    assert!(result.report.stopped_early);
    assert_eq!(result.report.entries[1].outcome, Outcome::Skipped);
    assert!(result.report.to_markdown().contains("could not be evaluated"));
}

#[tokio::test]
async fn errored_advisory_item_continues_run() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ("Flaky", Script::answering(Reply::Json("{\"complies\": \"maybe\"}"))),
        ("Solid", Script::passes()),
    ]));
    let items = vec![ChecklistItem::advisory("Flaky"), ChecklistItem::mandatory("Solid")];

    let result = run(&backend, &items).await;
    assert!(matches!(
        result.report.entries[0].outcome,
        Outcome::Errored {
            stage: Stage::Compliance,
            ..
        }
    ));
    // One retry by default: two attempts, and no feedback after the failure.
    let stages = backend.stages_for("Flaky");
    assert_eq!(stages.iter().filter(|s| **s == "compliance").count(), 2);
    assert!(!stages.contains(&"feedback"));
    assert!(assessment(&result.report.entries[1].outcome).complies);
    assert_eq!(result.exit, ExitSignal::Success);
}

#[tokio::test]
async fn transport_failure_is_retried_with_same_instruction() {
    let backend = ScriptedBackend::new(vec![("Rule", Script::irrelevant())]);
    backend.flaky_relevance.store(1, Ordering::SeqCst);
    let backend = Arc::new(backend);

    let result = run(&backend, &[ChecklistItem::mandatory("Rule")]).await;
    assert_eq!(backend.calls_of("relevance"), 2);
    let tasks = backend.tasks_of("relevance");
    assert_eq!(tasks[0], tasks[1]);
    assert!(assessment(&result.report.entries[0].outcome).complies);
}

#[tokio::test]
async fn exhausted_transport_retries_error_the_item() {
    let backend = Arc::new(ScriptedBackend::new(vec![(
        "Rule",
        Script::answering(Reply::Timeout),
    )]));
    let result = run(&backend, &[ChecklistItem::mandatory("Rule")]).await;
    match &result.report.entries[0].outcome {
        Outcome::Errored { stage, reason } => {
            assert_eq!(*stage, Stage::Compliance);
            assert!(reason.contains("2 attempts"), "reason: {reason}");
            assert!(reason.contains("timed out"), "reason: {reason}");
        }
        other => panic!("expected Errored, got {other:?}"),
    }
    assert!(result.report.stopped_early);
    assert_eq!(result.exit, ExitSignal::Failure);
}

#[tokio::test]
async fn empty_checklist_is_malformed_before_any_backend_call() {
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let err = orchestrator_with(&backend, &config(TopologyKind::Flat))
        .run(&[], change())
        .await
        .unwrap_err();
    assert!(matches!(err, PrRulesError::MalformedChecklist(_)));
    assert_eq!(backend.total_calls(), 0);
}

// ---------------------------------------------------------------------------
// Exit signal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_backend_always_succeeds() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![("R1", Script::fails()), ("R2", Script::passes())])
            .with_capabilities(BackendCapabilities {
                local: true,
                ..Default::default()
            }),
    );
    let items = vec![ChecklistItem::mandatory("R1"), ChecklistItem::mandatory("R2")];

    let result = run(&backend, &items).await;
    assert!(result.report.stopped_early);
    assert_eq!(result.report.backend, BackendMode::Local);
    assert_eq!(result.exit, ExitSignal::Success);
    assert_eq!(result.exit.code(), 0);
}

// ---------------------------------------------------------------------------
// Topologies and consultants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flat_topology_consults_applicable_experts_and_skips_verification() {
    let backend = Arc::new(ScriptedBackend::new(vec![("Use params", Script::fails())]));
    let result = run(&backend, &[ChecklistItem::advisory("Use params")]).await;

    assert_eq!(result.report.topology, "flat");
    assert_eq!(backend.calls_of("consultation"), 2);
    assert_eq!(backend.calls_of("verification"), 0);
    assert_eq!(backend.calls_of("coordination"), 0);
    assert_eq!(
        backend.stages_for("Use params").last().copied(),
        Some("feedback")
    );
}

#[tokio::test(start_paused = true)]
async fn opinions_merge_in_declaration_order() {
    let mut backend = ScriptedBackend::new(vec![("Use params", Script::passes())]);
    backend.slow_consultant = Some("Python Expert");
    let backend = Arc::new(backend);

    run(&backend, &[ChecklistItem::advisory("Use params")]).await;

    let compliance = backend.tasks_of("compliance");
    let task = &compliance[0];
    let python = task.find("## python").expect("python opinion merged");
    let sql = task.find("## sql").expect("sql opinion merged");
    assert!(python < sql);
}

#[tokio::test]
async fn auto_topology_with_delegating_backend_is_hierarchical() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![(
            "Use params",
            Script::fails().plan(r#"{"consult": ["sql"], "verify": true}"#),
        )])
        .with_capabilities(BackendCapabilities {
            delegation: true,
            ..Default::default()
        }),
    );
    let result = orchestrator_with(&backend, &config(TopologyKind::Auto))
        .run(&[ChecklistItem::advisory("Use params")], change())
        .await
        .unwrap();

    assert_eq!(result.report.topology, "hierarchical");
    assert_eq!(
        backend.stages_for("Use params"),
        vec![
            "relevance",
            "coordination",
            "consultation",
            "compliance",
            "verification",
            "feedback"
        ]
    );
    let task = &backend.tasks_of("compliance")[0];
    assert!(task.contains("## sql"));
    assert!(!task.contains("## python"));
}

#[tokio::test]
async fn hierarchical_verification_tampering_is_errored() {
    let backend = Arc::new(ScriptedBackend::new(vec![(
        "Use params",
        Script::fails()
            .plan(r#"{"consult": [], "verify": true}"#)
            .verification(Reply::Json(FAIL_FLIPPED)),
    )]));
    let result = orchestrator_with(&backend, &config(TopologyKind::Hierarchical))
        .run(&[ChecklistItem::advisory("Use params")], change())
        .await
        .unwrap();

    assert!(matches!(
        result.report.entries[0].outcome,
        Outcome::Errored {
            stage: Stage::Verification,
            ..
        }
    ));
    assert_eq!(backend.calls_of("consultation"), 0);
    assert_eq!(backend.calls_of("feedback"), 0);
}

#[tokio::test]
async fn coordinator_naming_unknown_consultant_is_schema_violation() {
    let backend = Arc::new(ScriptedBackend::new(vec![(
        "Use params",
        Script::passes().plan(r#"{"consult": ["java"], "verify": false}"#),
    )]));
    let result = orchestrator_with(&backend, &config(TopologyKind::Hierarchical))
        .run(&[ChecklistItem::advisory("Use params")], change())
        .await
        .unwrap();

    match &result.report.entries[0].outcome {
        Outcome::Errored { stage, .. } => assert_eq!(*stage, Stage::Coordination),
        other => panic!("expected Errored, got {other:?}"),
    }
    assert_eq!(backend.calls_of("coordination"), 2);
}

// ---------------------------------------------------------------------------
// Cancellation and events
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn deadline_cancels_in_flight_item_without_touching_committed_entries() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ("Fast", Script::irrelevant()),
        ("Slow", Script::passes().delayed(Duration::from_secs(60))),
        ("Never", Script::passes()),
    ]));
    let config = PipelineConfig {
        deadline_secs: Some(5),
        ..config(TopologyKind::Flat)
    };
    let items = vec![
        ChecklistItem::mandatory("Fast"),
        ChecklistItem::advisory("Slow"),
        ChecklistItem::advisory("Never"),
    ];

    let result = orchestrator_with(&backend, &config)
        .run(&items, change())
        .await
        .unwrap();
    let report = &result.report;

    assert!(report.cancelled);
    assert!(!report.stopped_early);
    assert!(assessment(&report.entries[0].outcome).complies);
    assert_eq!(report.entries[1].outcome, Outcome::Skipped);
    assert_eq!(report.entries[2].outcome, Outcome::Skipped);
    assert!(backend.stages_for("Never").is_empty());
    assert_eq!(result.exit, ExitSignal::Failure);
}

#[tokio::test]
async fn events_bracket_the_run() {
    let backend = Arc::new(ScriptedBackend::new(vec![("Rule", Script::irrelevant())]));
    let orchestrator = orchestrator_with(&backend, &config(TopologyKind::Flat));
    let mut rx = orchestrator.events().subscribe();

    orchestrator
        .run(&[ChecklistItem::mandatory("Rule")], change())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(
        events.first(),
        Some(ChecklistEvent::RunStarted { item_count: 1, .. })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, ChecklistEvent::ItemCompleted { outcome, .. } if outcome == "not_applicable")));
    assert!(matches!(
        events.last(),
        Some(ChecklistEvent::RunCompleted {
            evaluated: 1,
            skipped: 0,
            ..
        })
    ));
}

// ---------------------------------------------------------------------------
// End to end through the collaborator seams
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CollectingSink {
    published: Mutex<Vec<String>>,
}

#[async_trait]
impl ReportSink for CollectingSink {
    async fn publish(&self, report: &str) -> Result<()> {
        self.published.lock().unwrap().push(report.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn irrelevant_single_mandatory_rule_succeeds_end_to_end() {
    let source = Arc::new(
        StaticChangeSource::new(
            "docs: fix typo",
            "",
            vec![FileDiff::new("README.md", "-teh\n+the")],
        )
        .with_file(".github/pr-rules.md", "# Rules\n\n- [x] Migrations must be reversible\n"),
    );
    let checklist = RepositoryChecklistSource::new(source.clone(), ".github/pr-rules.md");
    let sink = CollectingSink::default();
    let backend = Arc::new(ScriptedBackend::new(vec![(
        "Migrations must be reversible",
        Script::irrelevant(),
    )]));
    let orchestrator = orchestrator_with(&backend, &config(TopologyKind::Auto));

    let result = run_check(&orchestrator, source.as_ref(), &checklist, &sink)
        .await
        .unwrap();

    assert_eq!(result.exit, ExitSignal::Success);
    assert_eq!(result.report.entries.len(), 1);
    assert!(assessment(&result.report.entries[0].outcome).complies);
    assert_eq!(backend.calls_of("compliance"), 0);
    assert_eq!(backend.calls_of("feedback"), 0);

    let published = sink.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert!(published[0].starts_with("# PR Rules Checklist"));
    assert!(published[0].contains("Migrations must be reversible"));
}

struct BrokenChecklist;

#[async_trait]
impl ChecklistSource for BrokenChecklist {
    async fn fetch_text(&self) -> Result<String> {
        Ok("This file has no checklist lines.\n".into())
    }
}

#[tokio::test]
async fn unparsable_checklist_aborts_before_backend_and_publish() {
    let source = StaticChangeSource::new("t", "b", vec![]);
    let sink = CollectingSink::default();
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let orchestrator = orchestrator_with(&backend, &config(TopologyKind::Flat));

    let err = run_check(&orchestrator, &source, &BrokenChecklist, &sink)
        .await
        .unwrap_err();
    assert!(matches!(err, PrRulesError::MalformedChecklist(_)));
    assert!(err.aborts_run());
    assert_eq!(backend.total_calls(), 0);
    assert!(sink.published.lock().unwrap().is_empty());
}

struct UnreadableChecklist;

#[async_trait]
impl ChecklistSource for UnreadableChecklist {
    async fn fetch_text(&self) -> Result<String> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied").into())
    }
}

#[tokio::test]
async fn io_failure_of_checklist_source_is_a_collaborator_failure() {
    let source = StaticChangeSource::new("t", "b", vec![]);
    let sink = CollectingSink::default();
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let orchestrator = orchestrator_with(&backend, &config(TopologyKind::Flat));

    let err = run_check(&orchestrator, &source, &UnreadableChecklist, &sink)
        .await
        .unwrap_err();
    match &err {
        PrRulesError::CollaboratorFailure {
            collaborator,
            message,
        } => {
            assert_eq!(collaborator, "checklist source");
            assert!(message.contains("permission denied"), "message: {message}");
        }
        other => panic!("expected CollaboratorFailure, got {other:?}"),
    }
    assert!(err.aborts_run());
    assert_eq!(backend.total_calls(), 0);
    assert!(sink.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rendering_is_identical_for_repeated_requests() {
    let backend = Arc::new(ScriptedBackend::new(vec![("Rule", Script::irrelevant())]));
    let orchestrator = orchestrator_with(&backend, &config(TopologyKind::Flat));
    let items = vec![ChecklistItem::advisory("Rule"), ChecklistItem::advisory("Rule")];
    orchestrator.run(&items, change()).await.unwrap();

    let tasks = backend.tasks_of("relevance");
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].as_bytes(), tasks[1].as_bytes());
}
