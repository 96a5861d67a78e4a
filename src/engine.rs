//! Engine — the operation surface a tool-invocation channel drives.
//!
//! Every operation names a session; the session is created on first
//! reference with the configured budget ceilings. Operations on one session
//! hold its lock for their whole duration (including sandbox runs and
//! sub-queries), so their effects never interleave. Different sessions run
//! concurrently.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::budget::BudgetKind;
use crate::config::EngineConfig;
use crate::context::{validate_id, ChunkSpan, ContextMeta, DiffReport, PeekOutcome, SearchMatch};
use crate::error::{RlmError, RlmResult};
use crate::evidence::{Citation, EvidenceItem};
use crate::sandbox::{ExecutionResult, Sandbox, Variable};
use crate::session::{
    read_snapshot, write_snapshot, FinalRecord, ProgressReport, ReasoningSummary, Session,
    SessionRegistry, SessionReport, SessionSnapshot, Task, TaskId, TaskStatus,
};
use crate::subquery::{Dispatcher, SubQueryOutcome, SubQueryRequest};
use crate::types::{ContentKind, Unit};

pub struct Engine {
    config: Arc<EngineConfig>,
    sandbox: Sandbox,
    dispatcher: Dispatcher,
    sessions: SessionRegistry,
}

impl Engine {
    /// Engine with the default backend order (HTTP API, then CLI agents).
    pub fn new(config: EngineConfig) -> RlmResult<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::with_default_backends(Arc::new(config.sub_query.clone()))?;
        Ok(Self::with_dispatcher(config, dispatcher))
    }

    /// Engine with a caller-assembled dispatcher.
    pub fn with_dispatcher(config: EngineConfig, dispatcher: Dispatcher) -> Self {
        let sandbox = Sandbox::new(&config.sandbox);
        tracing::info!(
            backends = ?dispatcher.backend_names(),
            max_depth = config.budget.max_depth,
            sandbox_timeout_ms = config.sandbox.timeout_ms,
            "engine ready"
        );
        Self {
            config: Arc::new(config),
            sandbox,
            dispatcher,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.ids()
    }

    fn session(&self, session_id: &str) -> RlmResult<Arc<tokio::sync::Mutex<Session>>> {
        validate_id(session_id)?;
        Ok(self.sessions.get_or_create(session_id, || {
            Session::new(session_id, self.config.budget.clone())
        }))
    }

    // ─── Context operations ──────────────────────────────────────────────

    pub async fn load(
        &self,
        session_id: &str,
        context_id: &str,
        content: impl Into<Arc<str>>,
        kind: Option<ContentKind>,
        overwrite: bool,
    ) -> RlmResult<ContextMeta> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        let meta = session.load_context(context_id, content, kind, overwrite)?;
        tracing::info!(
            session_id,
            context_id,
            kind = %meta.kind,
            chars = meta.chars,
            lines = meta.lines,
            "context loaded"
        );
        Ok(meta)
    }

    pub async fn peek(
        &self,
        session_id: &str,
        context_id: &str,
        start: usize,
        end: usize,
        unit: Unit,
    ) -> RlmResult<PeekOutcome> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        let outcome = session.contexts().peek(context_id, start, end, unit)?;
        let summary = match &outcome {
            PeekOutcome::Slice(slice) => format!(
                "{context_id} {unit} {}..{}{}",
                slice.span.start,
                slice.span.end,
                if slice.clamped { " (clamped)" } else { "" }
            ),
            PeekOutcome::OutOfRange { extent, .. } => {
                format!("{context_id} {unit} {start}..{end} out of range (extent {extent})")
            }
        };
        session.note("peek", summary);
        Ok(outcome)
    }

    pub async fn search(
        &self,
        session_id: &str,
        context_id: &str,
        pattern: &str,
        max_results: usize,
        context_lines: usize,
    ) -> RlmResult<Vec<SearchMatch>> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        let matches = session
            .contexts()
            .search(context_id, pattern, max_results, context_lines)?;
        tracing::debug!(session_id, context_id, pattern, hits = matches.len(), "search");
        session.note(
            "search",
            format!("/{pattern}/ in {context_id}: {} matches", matches.len()),
        );
        Ok(matches)
    }

    pub async fn chunk(
        &self,
        session_id: &str,
        context_id: &str,
        size: usize,
        unit: Unit,
    ) -> RlmResult<Vec<ChunkSpan>> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        let chunks = session.contexts().chunk(context_id, size, unit)?;
        session.note(
            "chunk",
            format!("{context_id} by {size} {unit}s: {} chunks", chunks.len()),
        );
        Ok(chunks)
    }

    pub async fn diff(&self, session_id: &str, a: &str, b: &str) -> RlmResult<DiffReport> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        let report = session.contexts().diff(a, b)?;
        let summary = match &report {
            DiffReport::Lines(d) => format!("{a} vs {b}: {} line changes", d.changes.len()),
            DiffReport::Values(d) => format!("{a} vs {b}: {} value changes", d.changes.len()),
        };
        session.note("diff", summary);
        Ok(report)
    }

    // ─── Execution ───────────────────────────────────────────────────────

    /// Run a DSL program against one context. Elapsed time is charged to
    /// the wall-time budget whether the run finishes, faults or times out.
    pub async fn execute(
        &self,
        session_id: &str,
        context_id: &str,
        code: &str,
    ) -> RlmResult<ExecutionResult> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        session.budget().check(BudgetKind::WallTime)?;
        let context = session.contexts().get(context_id)?.clone();
        let variables = session.variables().clone();

        let started = Instant::now();
        match self.sandbox.run(code, context, variables).await {
            Ok(run) => {
                session.budget().charge_elapsed(run.elapsed);
                let result = session.apply_run(run)?;
                tracing::info!(
                    session_id,
                    context_id,
                    elapsed_ms = result.elapsed_ms,
                    citations = result.citations.len(),
                    faulted = result.error.is_some(),
                    "execute"
                );
                Ok(result)
            }
            Err(e) => {
                session.budget().charge_elapsed(started.elapsed());
                tracing::warn!(session_id, context_id, error = %e, "execute failed");
                session.note("execute", format!("failed: {e}"));
                Err(e)
            }
        }
    }

    pub async fn get_variable(&self, session_id: &str, name: &str) -> RlmResult<Variable> {
        let shared = self.session(session_id)?;
        let session = shared.lock().await;
        session.variable(name).cloned().ok_or_else(|| {
            RlmError::InvalidArgument(format!(
                "unknown variable \"{name}\" (known: {:?})",
                session.variables().keys().collect::<Vec<_>>()
            ))
        })
    }

    /// All session variables, described in one line each.
    pub async fn list_variables(&self, session_id: &str) -> RlmResult<BTreeMap<String, String>> {
        let shared = self.session(session_id)?;
        let session = shared.lock().await;
        Ok(session
            .variables()
            .iter()
            .map(|(k, v)| (k.clone(), v.describe()))
            .collect())
    }

    // ─── Sub-queries ─────────────────────────────────────────────────────

    pub async fn sub_query(
        &self,
        session_id: &str,
        request: SubQueryRequest,
    ) -> RlmResult<SubQueryOutcome> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        let budget = session.budget().clone();
        let frame = budget.root_frame();

        let result = self.dispatcher.dispatch(&budget, &frame, request).await;
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    session_id,
                    backend = %outcome.backend,
                    depth = outcome.depth,
                    tokens = outcome.usage.total(),
                    elapsed_ms = outcome.elapsed_ms,
                    "sub-query finished"
                );
                session.note(
                    "sub_query",
                    format!(
                        "{} at depth {}: {} tokens{}",
                        outcome.backend,
                        outcome.depth,
                        outcome.usage.total(),
                        if outcome.estimated { " (estimated)" } else { "" }
                    ),
                );
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "sub-query failed");
                session.note("sub_query", format!("failed: {e}"));
            }
        }
        result
    }

    // ─── Evidence ────────────────────────────────────────────────────────

    pub async fn record_evidence(
        &self,
        session_id: &str,
        citation: Citation,
    ) -> RlmResult<EvidenceItem> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        let item = session.record_citation(citation)?;
        session.note(
            "record_evidence",
            format!("#{} {} {}", item.sequence, item.context_id, item.span),
        );
        Ok(item)
    }

    /// Evidence with sequence greater than `after`, optionally for one
    /// context only.
    pub async fn get_evidence(
        &self,
        session_id: &str,
        after: u64,
        context_id: Option<&str>,
    ) -> RlmResult<Vec<EvidenceItem>> {
        let shared = self.session(session_id)?;
        let session = shared.lock().await;
        Ok(session.evidence().since(after, context_id))
    }

    // ─── Tasks ───────────────────────────────────────────────────────────

    pub async fn add_task(
        &self,
        session_id: &str,
        title: &str,
        context_id: Option<&str>,
    ) -> RlmResult<Task> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        session.add_task(title, context_id)
    }

    pub async fn update_task(
        &self,
        session_id: &str,
        task_id: TaskId,
        status: Option<TaskStatus>,
        note: Option<String>,
    ) -> RlmResult<Task> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        session.begin()?;
        session.update_task(task_id, status, note)
    }

    pub async fn list_tasks(
        &self,
        session_id: &str,
        context_id: Option<&str>,
    ) -> RlmResult<Vec<Task>> {
        let shared = self.session(session_id)?;
        let session = shared.lock().await;
        Ok(session.tasks().list(context_id))
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    pub async fn get_status(&self, session_id: &str) -> RlmResult<SessionReport> {
        let shared = self.session(session_id)?;
        let session = shared.lock().await;
        Ok(session.report())
    }

    pub async fn evaluate_progress(
        &self,
        session_id: &str,
        note: &str,
        confidence: f64,
    ) -> RlmResult<ProgressReport> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        let report = session.evaluate_progress(note, confidence)?;
        tracing::debug!(session_id, confidence, converged = report.converged, "progress");
        Ok(report)
    }

    pub async fn reasoning_summary(
        &self,
        session_id: &str,
        last_n: usize,
    ) -> RlmResult<ReasoningSummary> {
        let shared = self.session(session_id)?;
        let session = shared.lock().await;
        Ok(session.summary(last_n))
    }

    pub async fn finalize(
        &self,
        session_id: &str,
        answer: &str,
        evidence_refs: &[u64],
    ) -> RlmResult<FinalRecord> {
        let shared = self.session(session_id)?;
        let mut session = shared.lock().await;
        let record = session.finalize(answer, evidence_refs)?;
        tracing::info!(session_id, evidence = evidence_refs.len(), "session finalized");
        Ok(record)
    }

    /// Drop a session from the registry. Returns whether it existed.
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id);
        if removed {
            tracing::info!(session_id, "session closed");
        }
        removed
    }

    // ─── Persistence ─────────────────────────────────────────────────────

    pub async fn snapshot(&self, session_id: &str) -> RlmResult<SessionSnapshot> {
        let shared = self.session(session_id)?;
        let session = shared.lock().await;
        Ok(session.snapshot())
    }

    /// Rebuild a session from a snapshot and install it under its id. A
    /// snapshot that fails validation leaves any live session untouched.
    /// A live session is swapped under its own lock, after any operation
    /// already holding it.
    pub async fn restore(&self, snapshot: SessionSnapshot) -> RlmResult<SessionReport> {
        let session = Session::restore(snapshot, &self.config.budget)?;
        let report = session.report();
        match self.sessions.get(&report.id) {
            Some(live) => *live.lock().await = session,
            None => {
                self.sessions.replace(session);
            }
        }
        tracing::info!(
            session_id = %report.id,
            contexts = report.contexts.len(),
            evidence = report.evidence_count,
            "session restored"
        );
        Ok(report)
    }

    pub async fn save(&self, session_id: &str, path: impl AsRef<Path>) -> RlmResult<()> {
        let snapshot = self.snapshot(session_id).await?;
        let path = path.as_ref();
        write_snapshot(path, &snapshot).await?;
        tracing::info!(session_id, path = %path.display(), "session saved");
        Ok(())
    }

    pub async fn load_snapshot(&self, path: impl AsRef<Path>) -> RlmResult<SessionReport> {
        let snapshot = read_snapshot(path).await?;
        self.restore(snapshot).await
    }
}
