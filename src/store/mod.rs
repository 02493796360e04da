//! Persistence port for users and tasks.
//!
//! `Store` is implemented by `PgStore` (PostgreSQL through sqlx) and by
//! `MemoryStore` (process-local, used in development and tests). Task
//! mutations take the acting user and check ownership inside the same atomic
//! write that applies them.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use validator::{ValidationError, ValidationErrors};

use crate::error::AppError;
use crate::models::{
    Actor, NewTask, NewUser, Task, TaskChanges, TaskFilter, TransitionError, User, UserChanges,
    UserPage,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Failures a store operation can report.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("user {actor} may not modify task {task}")]
    Forbidden { actor: i64, task: i64 },
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("user {0} does not exist")]
    UnknownAssignee(i64),
    /// The database refused the data itself; retrying cannot succeed.
    #[error("write rejected: {0}")]
    Rejected(String),
    /// Transient failure before anything was committed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The write may or may not have been committed.
    #[error("write outcome unknown: {0}")]
    Aborted(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn task_not_found(id: i64) -> Self {
        StoreError::NotFound { entity: "task", id }
    }

    pub fn user_not_found(id: i64) -> Self {
        StoreError::NotFound { entity: "user", id }
    }
}

fn single_violation(field: &'static str, code: &'static str, message: String) -> ValidationErrors {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    errors
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> AppError {
        match error {
            StoreError::NotFound { entity, id } => {
                AppError::NotFound(format!("{} with id {} not found", capitalize(entity), id))
            }
            StoreError::Forbidden { .. } => {
                AppError::Forbidden("You do not have permission to modify this task".into())
            }
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Transition(e) => {
                AppError::ValidationError(single_violation("status", "transition", e.to_string()))
            }
            StoreError::UnknownAssignee(id) => AppError::ValidationError(single_violation(
                "assignee_id",
                "unknown_user",
                format!("assignee_id {} does not name an existing user", id),
            )),
            StoreError::Rejected(msg) => AppError::BadRequest(msg),
            StoreError::Unavailable(msg) => AppError::Unavailable(msg),
            StoreError::Aborted(msg) => AppError::Aborted(msg),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Entity store contract.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a user. A taken email or subject is a `Conflict`.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn find_user(&self, id: i64) -> StoreResult<Option<User>>;

    async fn find_user_by_subject(&self, subject: &str) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// One page of live users plus the total count of live users.
    async fn list_users(&self, page: UserPage) -> StoreResult<(Vec<User>, i64)>;

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User>;

    async fn soft_delete_user(&self, id: i64) -> StoreResult<()>;

    /// Inserts a task owned by `owner_id`. A repeated `idempotency_key` from the same
    /// owner returns the task created the first time.
    async fn create_task(
        &self,
        owner_id: i64,
        task: NewTask,
        idempotency_key: Option<String>,
    ) -> StoreResult<Task>;

    async fn find_task(&self, id: i64) -> StoreResult<Option<Task>>;

    /// Tasks visible to `viewer` (owned or assigned; administrators see all),
    /// narrowed by `filter`, newest first.
    async fn list_tasks(&self, viewer: Actor, filter: TaskFilter) -> StoreResult<Vec<Task>>;

    async fn update_task(&self, actor: Actor, id: i64, changes: TaskChanges) -> StoreResult<Task>;

    async fn delete_task(&self, actor: Actor, id: i64) -> StoreResult<()>;
}
