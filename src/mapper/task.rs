use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use super::{nullable, Violations};
use crate::models::{NewTask, Task, TaskChanges, TaskPriority, TaskStatus};

const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 1000;
const STATUSES: [&str; 4] = ["open", "in_progress", "review", "closed"];
const INITIAL_STATUSES: [&str; 2] = ["open", "in_progress"];
const PRIORITIES: [&str; 4] = ["low", "medium", "high", "urgent"];

/// Wire shape of a task. Carries every entity field, so it maps back losslessly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDto {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Option<TaskPriority>,
    pub owner_id: i64,
    pub assignee_id: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn task_to_dto(task: &Task) -> TaskDto {
    TaskDto {
        id: task.id,
        title: task.title.clone(),
        description: task.description.clone(),
        status: task.status,
        priority: task.priority,
        owner_id: task.owner_id,
        assignee_id: task.assignee_id,
        due_date: task.due_date,
        created_at: task.created_at,
        updated_at: task.updated_at,
    }
}

/// Rebuilds the entity from its wire shape, enforcing the field constraints.
pub fn task_from_dto(dto: TaskDto) -> Result<Task, ValidationErrors> {
    let mut violations = Violations::new();
    violations.text("title", &dto.title, 1, TITLE_MAX);
    if let Some(description) = &dto.description {
        violations.length("description", description, 0, DESCRIPTION_MAX);
    }
    violations.id("id", dto.id);
    violations.id("owner_id", dto.owner_id);
    if let Some(assignee_id) = dto.assignee_id {
        violations.id("assignee_id", assignee_id);
    }
    violations.finish()?;

    Ok(Task {
        id: dto.id,
        title: dto.title,
        description: dto.description,
        status: dto.status,
        priority: dto.priority,
        owner_id: dto.owner_id,
        assignee_id: dto.assignee_id,
        due_date: dto.due_date,
        created_at: dto.created_at,
        updated_at: dto.updated_at,
    })
}

impl From<&Task> for TaskDto {
    fn from(task: &Task) -> Self {
        task_to_dto(task)
    }
}

impl TryFrom<TaskDto> for Task {
    type Error = ValidationErrors;

    fn try_from(dto: TaskDto) -> Result<Self, Self::Error> {
        task_from_dto(dto)
    }
}

fn check_title(violations: &mut Violations, title: &str) -> String {
    violations.text("title", title, 1, TITLE_MAX);
    title.trim().to_string()
}

fn check_description(violations: &mut Violations, description: &str) {
    violations.length("description", description, 0, DESCRIPTION_MAX);
}

fn check_priority(violations: &mut Violations, priority: &str) -> Option<TaskPriority> {
    violations.parse("priority", priority, &PRIORITIES)
}

fn check_assignee(violations: &mut Violations, assignee_id: i64) {
    violations.id("assignee_id", assignee_id);
}

/// Body of `POST /api/tasks`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskCreateDto {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(alias = "assigneeId")]
    pub assignee_id: Option<i64>,
    #[serde(alias = "dueDate")]
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskCreateDto {
    fn check(&self) -> (Violations, NewTask) {
        let mut violations = Violations::new();
        let title = violations
            .required("title", self.title.as_ref())
            .map(|title| check_title(&mut violations, title))
            .unwrap_or_default();
        if let Some(description) = &self.description {
            check_description(&mut violations, description);
        }
        let status = match &self.status {
            None => TaskStatus::Open,
            Some(raw) => match violations.parse::<TaskStatus>("status", raw, &STATUSES) {
                Some(status) if status.is_initial() => status,
                Some(_) => {
                    violations.add(
                        "status",
                        "enum",
                        format!("a new task must start as one of: {}", INITIAL_STATUSES.join(", ")),
                    );
                    TaskStatus::Open
                }
                None => TaskStatus::Open,
            },
        };
        let priority = self
            .priority
            .as_deref()
            .and_then(|raw| check_priority(&mut violations, raw));
        if let Some(assignee_id) = self.assignee_id {
            check_assignee(&mut violations, assignee_id);
        }

        let task = NewTask {
            title,
            description: self.description.clone(),
            status,
            priority,
            assignee_id: self.assignee_id,
            due_date: self.due_date,
        };
        (violations, task)
    }

    pub fn to_new_task(&self) -> Result<NewTask, ValidationErrors> {
        let (violations, task) = self.check();
        violations.finish().map(|_| task)
    }
}

impl Validate for TaskCreateDto {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.check().0.finish()
    }
}

/// Body of `PUT /api/tasks/{id}`: replaces every field, clearing optional ones left out.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskUpdateDto {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(alias = "assigneeId")]
    pub assignee_id: Option<i64>,
    #[serde(alias = "dueDate")]
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskUpdateDto {
    fn check(&self) -> (Violations, TaskChanges) {
        let mut violations = Violations::new();
        let title = violations
            .required("title", self.title.as_ref())
            .map(|title| check_title(&mut violations, title));
        if let Some(description) = &self.description {
            check_description(&mut violations, description);
        }
        let status = violations
            .required("status", self.status.as_ref())
            .and_then(|raw| violations.parse::<TaskStatus>("status", raw, &STATUSES));
        let priority = self
            .priority
            .as_deref()
            .and_then(|raw| check_priority(&mut violations, raw));
        if let Some(assignee_id) = self.assignee_id {
            check_assignee(&mut violations, assignee_id);
        }

        let changes = TaskChanges {
            title,
            description: Some(self.description.clone()),
            status,
            priority: Some(priority),
            assignee_id: Some(self.assignee_id),
            due_date: Some(self.due_date),
        };
        (violations, changes)
    }

    pub fn to_changes(&self) -> Result<TaskChanges, ValidationErrors> {
        let (violations, changes) = self.check();
        violations.finish().map(|_| changes)
    }
}

impl Validate for TaskUpdateDto {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.check().0.finish()
    }
}

/// Body of `PATCH /api/tasks/{id}`.
///
/// Absent keys are left unchanged; `null` clears a nullable field. `title`
/// and `status` cannot be cleared.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskPatchDto {
    #[serde(default, deserialize_with = "nullable")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub status: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub priority: Option<Option<String>>,
    #[serde(default, alias = "assigneeId", deserialize_with = "nullable")]
    pub assignee_id: Option<Option<i64>>,
    #[serde(default, alias = "dueDate", deserialize_with = "nullable")]
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskPatchDto {
    fn check(&self) -> (Violations, TaskChanges) {
        let mut violations = Violations::new();
        let title = self.title.as_ref().and_then(|title| {
            violations
                .required("title", title.as_ref())
                .map(|title| check_title(&mut violations, title))
        });
        if let Some(Some(description)) = &self.description {
            check_description(&mut violations, description);
        }
        let status = self.status.as_ref().and_then(|status| {
            violations
                .required("status", status.as_ref())
                .and_then(|raw| violations.parse::<TaskStatus>("status", raw, &STATUSES))
        });
        let priority = self.priority.as_ref().map(|priority| {
            priority
                .as_deref()
                .and_then(|raw| check_priority(&mut violations, raw))
        });
        if let Some(Some(assignee_id)) = self.assignee_id {
            check_assignee(&mut violations, assignee_id);
        }

        let changes = TaskChanges {
            title,
            description: self.description.clone(),
            status,
            priority,
            assignee_id: self.assignee_id,
            due_date: self.due_date,
        };
        (violations, changes)
    }

    pub fn to_changes(&self) -> Result<TaskChanges, ValidationErrors> {
        let (violations, changes) = self.check();
        violations.finish().map(|_| changes)
    }
}

impl Validate for TaskPatchDto {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.check().0.finish()
    }
}
