//! End-to-end composition: fetch, parse, evaluate, publish.

use std::sync::Arc;

use prrules_types::{PrRulesError, Result};

use crate::checklist::parse_checklist_strict;
use crate::orchestrator::{ChecklistOrchestrator, RunResult};
use crate::request::ChangeContext;
use crate::sources::{ChangeSource, ChecklistSource, ReportSink};

/// Run a full check.
///
/// Every error returned here aborts the run (see
/// [`PrRulesError::aborts_run`]). The checklist is parsed before any
/// backend call.
pub async fn run_check(
    orchestrator: &ChecklistOrchestrator,
    change: &dyn ChangeSource,
    checklist: &dyn ChecklistSource,
    sink: &dyn ReportSink,
) -> Result<RunResult> {
    let text = checklist
        .fetch_text()
        .await
        .map_err(|e| as_collaborator_failure("checklist source", e))?;
    let items = parse_checklist_strict(&text)?;
    tracing::info!(items = items.len(), "Checklist parsed");

    let metadata = change
        .fetch_metadata()
        .await
        .map_err(|e| as_collaborator_failure("change source", e))?;
    tracing::info!(base = %metadata.base_ref, head = %metadata.head_ref, "Fetching diff");
    let diffs = change
        .fetch_diff(&metadata.base_ref, &metadata.head_ref)
        .await
        .map_err(|e| as_collaborator_failure("change source", e))?;
    let context = Arc::new(ChangeContext::from_metadata(&metadata, diffs));

    let result = orchestrator.run(&items, context).await?;

    sink.publish(&result.report.to_markdown())
        .await
        .map_err(|e| match e {
            published @ PrRulesError::PublishError(_) => published,
            other => PrRulesError::PublishError(other.to_string()),
        })?;
    tracing::info!("Report published");
    Ok(result)
}

/// Errors outside the run-aborting taxonomy (io, json, ...) are attributed
/// to the collaborator that raised them.
fn as_collaborator_failure(collaborator: &str, error: PrRulesError) -> PrRulesError {
    if error.aborts_run() {
        return error;
    }
    PrRulesError::CollaboratorFailure {
        collaborator: collaborator.to_string(),
        message: error.to_string(),
    }
}
