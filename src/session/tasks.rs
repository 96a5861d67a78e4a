//! Lightweight task tracking — a flat checklist the caller keeps next to
//! its contexts while working through a problem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RlmError, RlmResult};

/// 1-based, assigned in creation order.
pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    /// Context the task is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskBoard {
    tasks: Vec<Task>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted tasks; ids must run 1, 2, 3, ...
    pub fn from_tasks(tasks: Vec<Task>) -> RlmResult<Self> {
        for (i, task) in tasks.iter().enumerate() {
            if task.id != i as u64 + 1 {
                return Err(RlmError::CorruptSnapshot(format!(
                    "task id {} found where {} was expected",
                    task.id,
                    i + 1
                )));
            }
        }
        Ok(Self { tasks })
    }

    pub fn add(&mut self, title: &str, context_id: Option<&str>) -> RlmResult<&Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(RlmError::InvalidArgument("task title must not be empty".into()));
        }
        let now = Utc::now();
        self.tasks.push(Task {
            id: self.tasks.len() as u64 + 1,
            title: title.to_string(),
            context_id: context_id.map(str::to_string),
            status: TaskStatus::Pending,
            note: None,
            created_at: now,
            updated_at: now,
        });
        Ok(&self.tasks[self.tasks.len() - 1])
    }

    /// Change status and/or note. A completed or skipped task keeps its
    /// status; only its note can still change.
    pub fn update(
        &mut self,
        id: TaskId,
        status: Option<TaskStatus>,
        note: Option<String>,
    ) -> RlmResult<&Task> {
        let task = id
            .checked_sub(1)
            .and_then(|i| self.tasks.get_mut(i as usize))
            .ok_or_else(|| RlmError::InvalidArgument(format!("unknown task #{id}")))?;
        if let Some(status) = status {
            if task.status.is_terminal() && status != task.status {
                return Err(RlmError::InvalidArgument(format!(
                    "task #{id} is already {}",
                    task.status
                )));
            }
            task.status = status;
        }
        if note.is_some() {
            task.note = note;
        }
        task.updated_at = Utc::now();
        Ok(task)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        id.checked_sub(1).and_then(|i| self.tasks.get(i as usize))
    }

    /// Tasks in creation order, optionally only those about one context.
    pub fn list(&self, context_id: Option<&str>) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|t| context_id.map_or(true, |id| t.context_id.as_deref() == Some(id)))
            .cloned()
            .collect()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn open(&self) -> usize {
        self.tasks.iter().filter(|t| !t.status.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_creation_order() {
        let mut board = TaskBoard::new();
        assert_eq!(board.add("scan for errors", Some("log")).unwrap().id, 1);
        assert_eq!(board.add("check config", None).unwrap().id, 2);
        assert_eq!(board.len(), 2);
        assert_eq!(board.open(), 2);
        assert!(board.add("   ", None).is_err());
    }

    #[test]
    fn terminal_status_sticks() {
        let mut board = TaskBoard::new();
        board.add("scan", None).unwrap();
        board.update(1, Some(TaskStatus::InProgress), None).unwrap();
        board
            .update(1, Some(TaskStatus::Completed), Some("one hit".into()))
            .unwrap();
        assert!(matches!(
            board.update(1, Some(TaskStatus::Pending), None),
            Err(RlmError::InvalidArgument(_))
        ));
        let task = board.update(1, None, Some("one hit at line 4".into())).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.note.as_deref(), Some("one hit at line 4"));
        assert_eq!(board.open(), 0);
        assert!(board.update(9, None, None).is_err());
    }

    #[test]
    fn list_filters_by_context() {
        let mut board = TaskBoard::new();
        board.add("a", Some("log")).unwrap();
        board.add("b", Some("cfg")).unwrap();
        board.add("c", None).unwrap();
        assert_eq!(board.list(None).len(), 3);
        let titles: Vec<String> = board.list(Some("log")).into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["a"]);
    }

    #[test]
    fn from_tasks_checks_ids() {
        let mut board = TaskBoard::new();
        board.add("a", None).unwrap();
        let mut tasks = board.tasks().to_vec();
        assert!(TaskBoard::from_tasks(tasks.clone()).is_ok());
        tasks[0].id = 3;
        assert!(matches!(
            TaskBoard::from_tasks(tasks),
            Err(RlmError::CorruptSnapshot(_))
        ));
    }
}
