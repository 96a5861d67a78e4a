//! Lossless session snapshots and their on-disk form.
//!
//! A snapshot carries every persistent field of a session: context contents,
//! evidence, tasks, budget limits with counters and exhausted kinds, the
//! reasoning log, variables, status, phase and the final record. Derived data (line
//! indexes, parsed JSON) is rebuilt on restore. Restore validates the whole
//! snapshot before building anything, so a bad snapshot changes nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FinalRecord, Phase, ReasoningStep, Session, SessionStatus, Task, TaskBoard};
use crate::budget::{BudgetController, BudgetCounters, BudgetKind, BudgetLimits};
use crate::context::{validate_id, Context, ContextStore};
use crate::error::{RlmError, RlmResult};
use crate::evidence::{EvidenceItem, EvidenceLedger};
use crate::sandbox::Variable;
use crate::types::ContentKind;

/// Schema tag written into every snapshot.
pub const SNAPSHOT_SCHEMA: &str = "rlm.session.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub id: String,
    pub kind: ContentKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub limits: BudgetLimits,
    pub counters: BudgetCounters,
    pub exhausted: Vec<BudgetKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub schema: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
    pub contexts: Vec<ContextRecord>,
    pub evidence: Vec<EvidenceItem>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    pub budget: BudgetRecord,
    pub reasoning_log: Vec<ReasoningStep>,
    pub variables: BTreeMap<String, Variable>,
    pub status: SessionStatus,
    pub phase: Phase,
    pub final_record: Option<FinalRecord>,
}

fn corrupt(message: impl Into<String>) -> RlmError {
    RlmError::CorruptSnapshot(message.into())
}

impl Session {
    pub fn snapshot(&self) -> SessionSnapshot {
        let budget = self.budget.snapshot();
        SessionSnapshot {
            schema: SNAPSHOT_SCHEMA.to_string(),
            session_id: self.id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            taken_at: Utc::now(),
            contexts: self
                .contexts
                .iter()
                .map(|c| ContextRecord {
                    id: c.id().to_string(),
                    kind: c.kind(),
                    content: c.content().to_string(),
                    created_at: c.created_at(),
                })
                .collect(),
            evidence: self.evidence.items().to_vec(),
            tasks: self.tasks.tasks().to_vec(),
            budget: BudgetRecord {
                limits: budget.limits,
                counters: budget.counters,
                exhausted: budget.exhausted,
            },
            reasoning_log: self.log.clone(),
            variables: self.variables.clone(),
            status: self.status,
            phase: self.phase,
            final_record: self.final_record.clone(),
        }
    }

    /// Rebuild a session from a snapshot.
    ///
    /// The restored ceilings are the stricter of the snapshot's and
    /// `current`, so a restart never loosens a session's budget.
    pub fn restore(snapshot: SessionSnapshot, current: &BudgetLimits) -> RlmResult<Session> {
        validate(&snapshot)?;

        let mut contexts = ContextStore::new();
        for record in snapshot.contexts {
            contexts.insert(Context::with_created_at(
                record.id,
                record.content,
                Some(record.kind),
                record.created_at,
            ));
        }
        let evidence = EvidenceLedger::from_items(snapshot.evidence)?;
        let tasks = TaskBoard::from_tasks(snapshot.tasks)?;
        let limits = snapshot.budget.limits.stricter(current);
        let budget = BudgetController::restore(
            limits,
            snapshot.budget.counters,
            snapshot.budget.exhausted,
        );

        Ok(Session {
            id: snapshot.session_id,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            contexts,
            evidence,
            tasks,
            budget: Arc::new(budget),
            log: snapshot.reasoning_log,
            variables: snapshot.variables,
            status: snapshot.status,
            phase: snapshot.phase,
            final_record: snapshot.final_record,
        })
    }
}

fn validate(s: &SessionSnapshot) -> RlmResult<()> {
    if s.schema != SNAPSHOT_SCHEMA {
        return Err(corrupt(format!(
            "unsupported schema \"{}\" (expected \"{SNAPSHOT_SCHEMA}\")",
            s.schema
        )));
    }
    validate_id(&s.session_id).map_err(|e| corrupt(format!("session id: {e}")))?;

    let mut ids = BTreeSet::new();
    for record in &s.contexts {
        validate_id(&record.id).map_err(|e| corrupt(format!("context id: {e}")))?;
        if !ids.insert(record.id.as_str()) {
            return Err(corrupt(format!("duplicate context id \"{}\"", record.id)));
        }
    }

    for (i, item) in s.evidence.iter().enumerate() {
        if item.sequence != i as u64 + 1 {
            return Err(corrupt(format!(
                "evidence sequence {} found where {} was expected",
                item.sequence,
                i + 1
            )));
        }
        if !ids.contains(item.context_id.as_str()) {
            return Err(corrupt(format!(
                "evidence {} cites unknown context \"{}\"",
                item.sequence, item.context_id
            )));
        }
        if item.span.start > item.span.end {
            return Err(corrupt(format!("evidence {} has an inverted span", item.sequence)));
        }
    }

    for task in &s.tasks {
        if let Some(id) = &task.context_id {
            if !ids.contains(id.as_str()) {
                return Err(corrupt(format!(
                    "task {} refers to unknown context \"{id}\"",
                    task.id
                )));
            }
        }
    }

    let counters = &s.budget.counters;
    if !counters.cost_usd.is_finite() || counters.cost_usd < 0.0 {
        return Err(corrupt(format!("invalid cost counter {}", counters.cost_usd)));
    }
    if let Some(cost) = s.budget.limits.max_cost_usd {
        if !cost.is_finite() || cost < 0.0 {
            return Err(corrupt(format!("invalid cost ceiling {cost}")));
        }
    }
    if counters.max_depth_reached < counters.current_depth {
        return Err(corrupt("depth counters are inconsistent"));
    }

    for (i, step) in s.reasoning_log.iter().enumerate() {
        if step.sequence != i as u64 + 1 {
            return Err(corrupt(format!(
                "reasoning step {} found where {} was expected",
                step.sequence,
                i + 1
            )));
        }
    }

    if s.variables.keys().any(|name| name.is_empty()) {
        return Err(corrupt("empty variable name"));
    }

    let finalized = s.status == SessionStatus::Finalized;
    if finalized != (s.phase == Phase::Finalized) || finalized != s.final_record.is_some() {
        return Err(corrupt(format!(
            "status {:?}, phase {:?} and final record disagree",
            s.status, s.phase
        )));
    }
    if let Some(record) = &s.final_record {
        if let Some(missing) = record
            .evidence
            .iter()
            .find(|seq| **seq == 0 || **seq > s.evidence.len() as u64)
        {
            return Err(corrupt(format!(
                "final record cites unknown evidence {missing}"
            )));
        }
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".into());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()))
}

/// Write a snapshot as pretty JSON. The file is written next to its final
/// location and renamed into place, so readers never see a partial file.
pub async fn write_snapshot(path: impl AsRef<Path>, snapshot: &SessionSnapshot) -> RlmResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = temp_path(path);
    if let Err(e) = tokio::fs::write(&tmp, json).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Read a snapshot file. Unparseable content is a `CorruptSnapshot`.
pub async fn read_snapshot(path: impl AsRef<Path>) -> RlmResult<SessionSnapshot> {
    let text = tokio::fs::read_to_string(path.as_ref()).await?;
    serde_json::from_str(&text).map_err(|e| corrupt(format!("{}: {e}", path.as_ref().display())))
}
