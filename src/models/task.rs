use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Error returned when a wire string names no known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Represents the status of a task.
/// Corresponds to the `task_status` SQL enum.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is yet to be started.
    Open,
    /// Task is currently being worked on.
    InProgress,
    /// Task work is finished and awaiting review.
    Review,
    /// Task is completed or dropped.
    Closed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Closed => "closed",
        }
    }

    /// Statuses a task may be created in.
    pub fn is_initial(self) -> bool {
        matches!(self, TaskStatus::Open | TaskStatus::InProgress)
    }

    /// Whether a task in this status may move to `next`.
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        self == next
            || matches!(
                (self, next),
                (Open, InProgress)
                    | (Open, Closed)
                    | (InProgress, Open)
                    | (InProgress, Review)
                    | (InProgress, Closed)
                    | (Review, InProgress)
                    | (Review, Closed)
                    | (Closed, Open)
            )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| ParseEnumError {
                kind: "status",
                value: value.to_string(),
            })
    }
}

/// Represents the priority of a task.
/// Corresponds to the `task_priority` SQL enum.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "task_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Low,
        TaskPriority::Medium,
        TaskPriority::High,
        TaskPriority::Urgent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TaskPriority::ALL
            .into_iter()
            .find(|priority| priority.as_str() == value)
            .ok_or_else(|| ParseEnumError {
                kind: "priority",
                value: value.to_string(),
            })
    }
}

/// Represents a task entity as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Task {
    /// Database identity of the task.
    pub id: i64,
    /// The title of the task.
    pub title: String,
    /// An optional description for the task.
    pub description: Option<String>,
    /// The current status of the task.
    pub status: TaskStatus,
    /// The priority of the task.
    pub priority: Option<TaskPriority>,
    /// The user who created, and therefore owns, the task.
    pub owner_id: i64,
    /// The user the task is assigned to, if any.
    pub assignee_id: Option<i64>,
    /// Optional due date for the task.
    pub due_date: Option<DateTime<Utc>>,
    /// Timestamp of when the task was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last update to the task.
    pub updated_at: DateTime<Utc>,
}

/// A status change the transition table does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move a task from '{from}' to '{to}'")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Validated data for a task about to be inserted. The owner is supplied by the store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTask {
    /// Materializes the entity the store will persist.
    pub fn into_task(self, id: i64, owner_id: i64, now: DateTime<Utc>) -> Task {
        Task {
            id,
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            owner_id,
            assignee_id: self.assignee_id,
            due_date: self.due_date,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A set of field changes to apply to an existing task.
///
/// `None` leaves a field untouched; for nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Option<TaskPriority>>,
    pub assignee_id: Option<Option<i64>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskChanges {
    /// The assignee this change introduces, if it sets one.
    pub fn new_assignee(&self) -> Option<i64> {
        self.assignee_id.flatten()
    }
}

impl Task {
    /// Applies `changes` in place, refusing disallowed status transitions.
    /// On error the task is left untouched.
    pub fn apply(&mut self, changes: TaskChanges, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if let Some(next) = changes.status {
            if !self.status.can_transition_to(next) {
                return Err(TransitionError {
                    from: self.status,
                    to: next,
                });
            }
            self.status = next;
        }
        if let Some(title) = changes.title {
            self.title = title;
        }
        if let Some(description) = changes.description {
            self.description = description;
        }
        if let Some(priority) = changes.priority {
            self.priority = priority;
        }
        if let Some(assignee_id) = changes.assignee_id {
            self.assignee_id = assignee_id;
        }
        if let Some(due_date) = changes.due_date {
            self.due_date = due_date;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Represents query parameters for filtering tasks when listing them.
///
/// Listing is always scoped to tasks the caller owns or is assigned to
/// (administrators see every task); these filters narrow that scope further.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Filter tasks by status.
    pub status: Option<TaskStatus>,
    /// Filter tasks by priority.
    pub priority: Option<TaskPriority>,
    /// Filter tasks by assignee's user ID.
    pub assignee_id: Option<i64>,
    /// Filter tasks by owner's user ID.
    pub owner_id: Option<i64>,
    /// Search term matched against title and description (case-insensitive).
    pub search: Option<String>,
}

impl TaskFilter {
    /// In-process evaluation of the filter, mirroring the SQL the Postgres store builds.
    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|status| status != task.status) {
            return false;
        }
        if self.priority.is_some() && self.priority != task.priority {
            return false;
        }
        if self.assignee_id.is_some() && self.assignee_id != task.assignee_id {
            return false;
        }
        if self.owner_id.is_some_and(|owner| owner != task.owner_id) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                task.title.to_lowercase().contains(&term)
                    || task
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        let now = Utc::now();
        NewTask {
            title: "Write report".to_string(),
            description: Some("Quarterly numbers".to_string()),
            status: TaskStatus::Open,
            priority: Some(TaskPriority::High),
            assignee_id: None,
            due_date: None,
        }
        .into_task(1, 10, now)
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
        assert!("done".parse::<TaskStatus>().is_err());
        assert!("OPEN".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        assert!(Open.can_transition_to(InProgress));
        assert!(Open.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Review));
        assert!(InProgress.can_transition_to(Review));
        assert!(Review.can_transition_to(Closed));
        assert!(!Review.can_transition_to(Open));
        assert!(Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(InProgress));
        for status in TaskStatus::ALL {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn test_apply_changes() {
        let mut task = sample_task();
        let later = task.created_at + chrono::Duration::minutes(5);
        task.apply(
            TaskChanges {
                status: Some(TaskStatus::Closed),
                description: Some(None),
                assignee_id: Some(Some(3)),
                ..TaskChanges::default()
            },
            later,
        )
        .unwrap();

        assert_eq!(task.status, TaskStatus::Closed);
        assert_eq!(task.description, None);
        assert_eq!(task.assignee_id, Some(3));
        assert_eq!(task.title, "Write report");
        assert_eq!(task.updated_at, later);
    }

    #[test]
    fn test_rejected_transition_leaves_task_untouched() {
        let mut task = sample_task();
        let before = task.clone();
        let err = task
            .apply(
                TaskChanges {
                    title: Some("Renamed".to_string()),
                    status: Some(TaskStatus::Review),
                    ..TaskChanges::default()
                },
                Utc::now(),
            )
            .unwrap_err();

        assert_eq!(err.from, TaskStatus::Open);
        assert_eq!(err.to, TaskStatus::Review);
        assert_eq!(task, before);
    }

    #[test]
    fn test_filter_matches() {
        let task = sample_task();
        assert!(TaskFilter::default().matches(&task));
        assert!(TaskFilter {
            search: Some("REPORT".to_string()),
            ..TaskFilter::default()
        }
        .matches(&task));
        assert!(TaskFilter {
            search: Some("quarterly".to_string()),
            ..TaskFilter::default()
        }
        .matches(&task));
        assert!(!TaskFilter {
            status: Some(TaskStatus::Closed),
            ..TaskFilter::default()
        }
        .matches(&task));
        assert!(!TaskFilter {
            assignee_id: Some(4),
            ..TaskFilter::default()
        }
        .matches(&task));
    }
}
