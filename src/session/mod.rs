//! Session aggregate — contexts, evidence, budget, variables and the
//! reasoning log of one caller, plus its lifecycle.
//!
//! A session is `Active` until [`Session::finalize`]; after that every
//! mutating method fails with [`RlmError::SessionFinalized`] and the
//! read-only accessors keep working. Within the active state the phase moves
//! between `Exploring` (any context, execution or sub-query work) and
//! `Evaluating` (after [`Session::evaluate_progress`]).

mod registry;
mod snapshot;
mod tasks;

pub use registry::SessionRegistry;
pub use snapshot::{
    read_snapshot, write_snapshot, BudgetRecord, ContextRecord, SessionSnapshot, SNAPSHOT_SCHEMA,
};
pub use tasks::{Task, TaskBoard, TaskId, TaskStatus};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetController, BudgetKind, BudgetLimits, BudgetSnapshot};
use crate::context::{ContextMeta, ContextStore};
use crate::error::{RlmError, RlmResult};
use crate::evidence::{Citation, EvidenceItem, EvidenceLedger};
use crate::sandbox::{ExecutionResult, SandboxRun, Variable};
use crate::types::ContentKind;

/// Confidence at or above which progress counts as converged.
pub const CONVERGENCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Exploring,
    Evaluating,
    Finalized,
}

/// One entry of the reasoning log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// 1-based, contiguous.
    pub sequence: u64,
    pub at: DateTime<Utc>,
    /// Phase the session was in after the step.
    pub phase: Phase,
    pub operation: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Terminal record written by `finalize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub answer: String,
    /// Sequence numbers of the supporting evidence.
    pub evidence: Vec<u64>,
    pub finalized_at: DateTime<Utc>,
}

/// Answer to `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub id: String,
    pub status: SessionStatus,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub contexts: Vec<ContextMeta>,
    pub evidence_count: usize,
    /// Tasks not yet completed or skipped.
    pub open_tasks: usize,
    /// Variable name to a one-line description.
    pub variables: BTreeMap<String, String>,
    pub steps: usize,
    pub budget: BudgetSnapshot,
    pub final_record: Option<FinalRecord>,
}

/// Answer to `evaluate_progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub phase: Phase,
    pub confidence: f64,
    pub converged: bool,
    pub evidence_count: usize,
    pub iterations: u64,
    pub remaining: Vec<(BudgetKind, f64)>,
    pub exhausted: Vec<BudgetKind>,
}

/// Compressed view of the reasoning log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningSummary {
    pub session_id: String,
    pub phase: Phase,
    pub total_steps: usize,
    /// Step count per operation name.
    pub operations: BTreeMap<String, usize>,
    pub evidence_count: usize,
    pub latest_confidence: Option<f64>,
    /// The last `n` steps, oldest first.
    pub recent: Vec<ReasoningStep>,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    contexts: ContextStore,
    evidence: EvidenceLedger,
    tasks: TaskBoard,
    budget: Arc<BudgetController>,
    log: Vec<ReasoningStep>,
    variables: BTreeMap<String, Variable>,
    status: SessionStatus,
    phase: Phase,
    final_record: Option<FinalRecord>,
}

impl Session {
    pub fn new(id: impl Into<String>, limits: BudgetLimits) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            contexts: ContextStore::new(),
            evidence: EvidenceLedger::new(),
            tasks: TaskBoard::new(),
            budget: Arc::new(BudgetController::new(limits)),
            log: Vec::new(),
            variables: BTreeMap::new(),
            status: SessionStatus::Active,
            phase: Phase::Exploring,
            final_record: None,
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finalized(&self) -> bool {
        self.status == SessionStatus::Finalized
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    pub fn evidence(&self) -> &EvidenceLedger {
        &self.evidence
    }

    pub fn tasks(&self) -> &TaskBoard {
        &self.tasks
    }

    pub fn budget(&self) -> &Arc<BudgetController> {
        &self.budget
    }

    pub fn variables(&self) -> &BTreeMap<String, Variable> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn log(&self) -> &[ReasoningStep] {
        &self.log
    }

    pub fn final_record(&self) -> Option<&FinalRecord> {
        self.final_record.as_ref()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    fn ensure_active(&self) -> RlmResult<()> {
        if self.is_finalized() {
            return Err(RlmError::SessionFinalized {
                session_id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Admit one exploring operation: the session must be active and the
    /// iteration budget must still have room.
    pub fn begin(&mut self) -> RlmResult<()> {
        self.ensure_active()?;
        self.budget.check_and_consume(BudgetKind::Iterations, 1.0)?;
        self.phase = Phase::Exploring;
        Ok(())
    }

    /// Append a step to the reasoning log.
    pub fn note(&mut self, operation: &str, summary: impl Into<String>) {
        self.push_step(operation, summary.into(), None);
    }

    fn push_step(&mut self, operation: &str, summary: String, confidence: Option<f64>) {
        let now = Utc::now();
        self.updated_at = now;
        self.log.push(ReasoningStep {
            sequence: self.log.len() as u64 + 1,
            at: now,
            phase: self.phase,
            operation: operation.to_string(),
            summary,
            confidence,
        });
    }

    // ─── Operations ──────────────────────────────────────────────────────

    pub fn load_context(
        &mut self,
        id: &str,
        content: impl Into<Arc<str>>,
        kind: Option<ContentKind>,
        overwrite: bool,
    ) -> RlmResult<ContextMeta> {
        self.ensure_active()?;
        let meta = self.contexts.load(id, content, kind, overwrite)?;
        self.note(
            "load",
            format!("{} ({}, {} lines, {} chars)", meta.id, meta.kind, meta.lines, meta.chars),
        );
        Ok(meta)
    }

    pub fn record_citation(&mut self, citation: Citation) -> RlmResult<EvidenceItem> {
        self.ensure_active()?;
        let item = self.evidence.record(&self.contexts, citation)?.clone();
        self.updated_at = Utc::now();
        Ok(item)
    }

    /// Track a new task, optionally tied to a loaded context.
    pub fn add_task(&mut self, title: &str, context_id: Option<&str>) -> RlmResult<Task> {
        self.ensure_active()?;
        if let Some(id) = context_id {
            self.contexts.get(id)?;
        }
        let task = self.tasks.add(title, context_id)?.clone();
        self.note("add_task", format!("#{} {}", task.id, task.title));
        Ok(task)
    }

    pub fn update_task(
        &mut self,
        id: TaskId,
        status: Option<TaskStatus>,
        note: Option<String>,
    ) -> RlmResult<Task> {
        self.ensure_active()?;
        let task = self.tasks.update(id, status, note)?.clone();
        self.note("update_task", format!("#{} {}", task.id, task.status));
        Ok(task)
    }

    /// Fold a finished sandbox run into the session: citations become
    /// evidence, bindings become session variables.
    pub fn apply_run(&mut self, run: SandboxRun) -> RlmResult<ExecutionResult> {
        self.ensure_active()?;
        let mut recorded = Vec::with_capacity(run.citations.len());
        for citation in run.citations.iter().cloned() {
            recorded.push(self.evidence.record(&self.contexts, citation)?.clone());
        }
        for (name, value) in &run.bindings {
            self.variables.insert(name.clone(), value.clone());
        }
        let summary = match &run.error {
            Some(error) => format!(
                "{} bindings, {} citations, stopped: {error}",
                run.bindings.len(),
                recorded.len()
            ),
            None => format!("{} bindings, {} citations", run.bindings.len(), recorded.len()),
        };
        self.note("execute", summary);
        Ok(run.into_result(recorded))
    }

    pub fn evaluate_progress(&mut self, note: &str, confidence: f64) -> RlmResult<ProgressReport> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(RlmError::InvalidArgument(format!(
                "confidence must be between 0 and 1, got {confidence}"
            )));
        }
        self.begin()?;
        self.phase = Phase::Evaluating;
        self.push_step("evaluate_progress", note.to_string(), Some(confidence));

        let budget = self.budget.snapshot();
        Ok(ProgressReport {
            phase: self.phase,
            confidence,
            converged: confidence >= CONVERGENCE_THRESHOLD,
            evidence_count: self.evidence.len(),
            iterations: budget.counters.iterations,
            remaining: budget.remaining,
            exhausted: budget.exhausted,
        })
    }

    /// Enter the terminal state. Every referenced evidence item must exist.
    /// Not subject to budget admission, so a session that ran out of budget
    /// can still be closed out.
    pub fn finalize(&mut self, answer: &str, evidence_refs: &[u64]) -> RlmResult<FinalRecord> {
        self.ensure_active()?;
        if let Some(missing) = evidence_refs.iter().find(|seq| !self.evidence.contains(**seq)) {
            return Err(RlmError::InvalidArgument(format!(
                "unknown evidence reference {missing} (ledger has {} items)",
                self.evidence.len()
            )));
        }
        let record = FinalRecord {
            answer: answer.to_string(),
            evidence: evidence_refs.to_vec(),
            finalized_at: Utc::now(),
        };
        self.budget.consume(BudgetKind::Iterations, 1.0);
        self.status = SessionStatus::Finalized;
        self.phase = Phase::Finalized;
        self.push_step(
            "finalize",
            format!("answer with {} evidence refs", evidence_refs.len()),
            None,
        );
        self.final_record = Some(record.clone());
        Ok(record)
    }

    // ─── Reports ─────────────────────────────────────────────────────────

    pub fn report(&self) -> SessionReport {
        SessionReport {
            id: self.id.clone(),
            status: self.status,
            phase: self.phase,
            created_at: self.created_at,
            updated_at: self.updated_at,
            contexts: self.contexts.list(),
            evidence_count: self.evidence.len(),
            open_tasks: self.tasks.open(),
            variables: self
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.describe()))
                .collect(),
            steps: self.log.len(),
            budget: self.budget.snapshot(),
            final_record: self.final_record.clone(),
        }
    }

    pub fn summary(&self, last_n: usize) -> ReasoningSummary {
        let mut operations = BTreeMap::new();
        for step in &self.log {
            *operations.entry(step.operation.clone()).or_insert(0) += 1;
        }
        let skip = self.log.len().saturating_sub(last_n);
        ReasoningSummary {
            session_id: self.id.clone(),
            phase: self.phase,
            total_steps: self.log.len(),
            operations,
            evidence_count: self.evidence.len(),
            latest_confidence: self.log.iter().rev().find_map(|s| s.confidence),
            recent: self.log[skip..].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Span;

    fn session() -> Session {
        let mut s = Session::new("s1", BudgetLimits::new());
        s.load_context("log", "a\nb\nc\nERROR x\nd", None, false).unwrap();
        s
    }

    #[test]
    fn begin_charges_iterations_and_latches() {
        let mut s = Session::new("s1", BudgetLimits::new().with_max_iterations(2));
        s.begin().unwrap();
        s.begin().unwrap();
        assert!(matches!(
            s.begin(),
            Err(RlmError::BudgetExceeded {
                kind: BudgetKind::Iterations,
                ..
            })
        ));
        // Finalize still works after the budget ran out.
        s.finalize("partial", &[]).unwrap();
        assert!(s.is_finalized());
    }

    #[test]
    fn finalize_checks_evidence_refs() {
        let mut s = session();
        s.record_citation(Citation::new("log", Span::lines(4, 4), crate::evidence::EvidenceSource::Search))
            .unwrap();
        let err = s.finalize("answer", &[1, 2]).unwrap_err();
        assert!(matches!(err, RlmError::InvalidArgument(_)));
        assert!(!s.is_finalized());

        let record = s.finalize("1 error found", &[1]).unwrap();
        assert_eq!(record.evidence, vec![1]);
        assert_eq!(s.phase(), Phase::Finalized);
    }

    #[test]
    fn finalized_session_rejects_mutation() {
        let mut s = session();
        s.finalize("done", &[]).unwrap();
        assert!(matches!(
            s.load_context("other", "x", None, false),
            Err(RlmError::SessionFinalized { .. })
        ));
        assert!(matches!(s.begin(), Err(RlmError::SessionFinalized { .. })));
        assert!(matches!(
            s.finalize("again", &[]),
            Err(RlmError::SessionFinalized { .. })
        ));
        // Reads keep working.
        assert_eq!(s.report().status, SessionStatus::Finalized);
        assert_eq!(s.contexts().len(), 1);
    }

    #[test]
    fn tasks_need_known_contexts_and_an_active_session() {
        let mut s = session();
        assert!(matches!(
            s.add_task("read it", Some("missing")),
            Err(RlmError::UnknownContext { .. })
        ));
        let task = s.add_task("find the error", Some("log")).unwrap();
        s.update_task(task.id, Some(TaskStatus::Completed), None).unwrap();
        assert_eq!(s.report().open_tasks, 0);
        assert_eq!(s.summary(10).operations["add_task"], 1);

        s.finalize("done", &[]).unwrap();
        assert!(matches!(
            s.add_task("late", None),
            Err(RlmError::SessionFinalized { .. })
        ));
        assert!(matches!(
            s.update_task(task.id, None, Some("late note".into())),
            Err(RlmError::SessionFinalized { .. })
        ));
        assert_eq!(s.tasks().len(), 1);
    }

    #[test]
    fn progress_moves_between_phases() {
        let mut s = session();
        let report = s.evaluate_progress("found the error line", 0.9).unwrap();
        assert_eq!(report.phase, Phase::Evaluating);
        assert!(report.converged);
        assert_eq!(s.phase(), Phase::Evaluating);

        s.begin().unwrap();
        assert_eq!(s.phase(), Phase::Exploring);

        assert!(s.evaluate_progress("bad", 1.5).is_err());
    }

    #[test]
    fn summary_compresses_the_log() {
        let mut s = session();
        s.note("search", "1 match");
        s.note("search", "0 matches");
        s.evaluate_progress("halfway", 0.4).unwrap();
        let summary = s.summary(2);
        assert_eq!(summary.total_steps, 4);
        assert_eq!(summary.operations["search"], 2);
        assert_eq!(summary.operations["load"], 1);
        assert_eq!(summary.latest_confidence, Some(0.4));
        assert_eq!(summary.recent.len(), 2);
        assert_eq!(summary.recent[1].operation, "evaluate_progress");
        assert_eq!(summary.recent[0].sequence, 3);
    }
}
