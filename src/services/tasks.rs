use std::sync::Arc;
use std::time::Duration;

use validator::Validate;

use super::{read, write};
use crate::auth::Principal;
use crate::error::AppError;
use crate::mapper::{TaskCreateDto, TaskDto, TaskPatchDto, TaskUpdateDto};
use crate::models::{TaskChanges, TaskFilter};
use crate::store::Store;

const IDEMPOTENCY_KEY_MAX: usize = 128;

/// Task operations on behalf of a resolved principal.
///
/// Reads are authorized here; writes hand the principal's `Actor` to the store,
/// which checks ownership inside the write transaction.
pub struct TaskService {
    store: Arc<dyn Store>,
    timeout: Duration,
}

/// Checks an `Idempotency-Key` header value.
pub fn check_idempotency_key(key: &str) -> Result<(), AppError> {
    let len = key.chars().count();
    if len == 0 || len > IDEMPOTENCY_KEY_MAX {
        return Err(AppError::BadRequest(format!(
            "Idempotency-Key must be between 1 and {} characters",
            IDEMPOTENCY_KEY_MAX
        )));
    }
    Ok(())
}

/// The store checks ownership before the assignee and the status transition,
/// so a success or a field violation means the principal was authorized.
fn note_ownership<T>(principal: &Principal, result: &Result<T, AppError>) {
    if matches!(result, Ok(_) | Err(AppError::ValidationError(_))) {
        principal.authorize();
    }
}

impl TaskService {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn list(&self, principal: &Principal, filter: TaskFilter) -> Result<Vec<TaskDto>, AppError> {
        // The store scopes the listing to what the principal may view.
        principal.authorize();
        let tasks = read(self.timeout, self.store.list_tasks(principal.actor(), filter)).await?;
        Ok(tasks.iter().map(TaskDto::from).collect())
    }

    pub async fn get(&self, principal: &Principal, id: i64) -> Result<TaskDto, AppError> {
        let task = read(self.timeout, self.store.find_task(id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task with id {} not found", id)))?;
        if !principal.actor().may_view(&task) {
            return Err(AppError::Forbidden(
                "You do not have permission to view this task".into(),
            ));
        }
        principal.authorize();
        Ok(TaskDto::from(&task))
    }

    pub async fn create(
        &self,
        principal: &Principal,
        dto: TaskCreateDto,
        idempotency_key: Option<String>,
    ) -> Result<TaskDto, AppError> {
        if let Some(key) = &idempotency_key {
            check_idempotency_key(key)?;
        }
        let new_task = dto.to_new_task()?;
        principal.authorize();
        let task = write(
            self.timeout,
            self.store.create_task(principal.user_id, new_task, idempotency_key),
        )
        .await?;
        log::info!("User {} created task {}", principal.user_id, task.id);
        Ok(TaskDto::from(&task))
    }

    pub async fn replace(&self, principal: &Principal, id: i64, dto: TaskUpdateDto) -> Result<TaskDto, AppError> {
        dto.validate()?;
        self.apply(principal, id, dto.to_changes()?).await
    }

    pub async fn patch(&self, principal: &Principal, id: i64, dto: TaskPatchDto) -> Result<TaskDto, AppError> {
        dto.validate()?;
        self.apply(principal, id, dto.to_changes()?).await
    }

    async fn apply(&self, principal: &Principal, id: i64, changes: TaskChanges) -> Result<TaskDto, AppError> {
        let result = write(self.timeout, self.store.update_task(principal.actor(), id, changes)).await;
        note_ownership(principal, &result);
        let task = result?;
        log::info!("User {} updated task {}", principal.user_id, task.id);
        Ok(TaskDto::from(&task))
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), AppError> {
        let result = write(self.timeout, self.store.delete_task(principal.actor(), id)).await;
        note_ownership(principal, &result);
        result?;
        log::info!("User {} deleted task {}", principal.user_id, id);
        Ok(())
    }
}
