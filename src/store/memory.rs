//! Process-local store for development and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{Store, StoreError, StoreResult};
use crate::models::{
    Actor, NewTask, NewUser, SortOrder, Task, TaskChanges, TaskFilter, User, UserChanges,
    UserPage, UserSortField,
};

/// Thread-safe in-memory store. A single lock makes every write atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<i64, User>,
    tasks: BTreeMap<i64, Task>,
    idempotency: HashMap<(i64, String), i64>,
    last_user_id: i64,
    last_task_id: i64,
}

impl MemoryState {
    fn live_user(&self, id: i64) -> Option<&User> {
        self.users.get(&id).filter(|user| !user.is_deleted())
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| !u.is_deleted() && u.email == email && Some(u.id) != except)
    }

    fn check_assignee(&self, assignee_id: Option<i64>) -> StoreResult<()> {
        match assignee_id {
            Some(id) if self.live_user(id).is_none() => Err(StoreError::UnknownAssignee(id)),
            _ => Ok(()),
        }
    }

    /// Loads a task for mutation by `actor`.
    fn task_for_write(&self, actor: Actor, id: i64) -> StoreResult<&Task> {
        let task = self.tasks.get(&id).ok_or_else(|| StoreError::task_not_found(id))?;
        if !actor.may_modify(task) {
            return Err(StoreError::Forbidden {
                actor: actor.user_id,
                task: id,
            });
        }
        Ok(task)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }
}

fn compare_users(sort: UserSortField, a: &User, b: &User) -> std::cmp::Ordering {
    match sort {
        UserSortField::Id => a.id.cmp(&b.id),
        UserSortField::Email => a.email.cmp(&b.email),
        UserSortField::FirstName => a.first_name.cmp(&b.first_name),
        UserSortField::LastName => a.last_name.cmp(&b.last_name),
        UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
    }
    .then(a.id.cmp(&b.id))
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.write()?;
        if state.email_taken(&user.email, None) {
            return Err(StoreError::Conflict(format!(
                "A user with email {} already exists",
                user.email
            )));
        }
        if state.users.values().any(|u| u.subject == user.subject) {
            return Err(StoreError::Conflict("Subject already registered".into()));
        }
        state.last_user_id += 1;
        let user = user.into_user(state.last_user_id, Utc::now());
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.read()?.live_user(id).cloned())
    }

    async fn find_user_by_subject(&self, subject: &str) -> StoreResult<Option<User>> {
        let state = self.read()?;
        Ok(state
            .users
            .values()
            .find(|u| !u.is_deleted() && u.subject == subject)
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.read()?;
        Ok(state
            .users
            .values()
            .find(|u| !u.is_deleted() && u.email == email)
            .cloned())
    }

    async fn list_users(&self, page: UserPage) -> StoreResult<(Vec<User>, i64)> {
        let state = self.read()?;
        let mut users: Vec<&User> = state.users.values().filter(|u| !u.is_deleted()).collect();
        users.sort_by(|a, b| {
            let ordering = compare_users(page.sort, a, b);
            match page.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        let total = users.len() as i64;
        let window = users
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((window, total))
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User> {
        let mut state = self.write()?;
        if state.live_user(id).is_none() {
            return Err(StoreError::user_not_found(id));
        }
        if let Some(email) = &changes.email {
            if state.email_taken(email, Some(id)) {
                return Err(StoreError::Conflict(format!(
                    "A user with email {} already exists",
                    email
                )));
            }
        }
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::user_not_found(id))?;
        user.apply(changes, Utc::now());
        Ok(user.clone())
    }

    async fn soft_delete_user(&self, id: i64) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.users.get_mut(&id) {
            Some(user) if !user.is_deleted() => {
                let now = Utc::now();
                user.deleted_at = Some(now);
                user.updated_at = now;
                Ok(())
            }
            _ => Err(StoreError::user_not_found(id)),
        }
    }

    async fn create_task(
        &self,
        owner_id: i64,
        task: NewTask,
        idempotency_key: Option<String>,
    ) -> StoreResult<Task> {
        let mut state = self.write()?;
        if let Some(key) = &idempotency_key {
            if let Some(existing) = state
                .idempotency
                .get(&(owner_id, key.clone()))
                .and_then(|id| state.tasks.get(id))
            {
                return Ok(existing.clone());
            }
        }
        state.check_assignee(task.assignee_id)?;

        state.last_task_id += 1;
        let task = task.into_task(state.last_task_id, owner_id, Utc::now());
        if let Some(key) = idempotency_key {
            state.idempotency.insert((owner_id, key), task.id);
        }
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn find_task(&self, id: i64) -> StoreResult<Option<Task>> {
        Ok(self.read()?.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, viewer: Actor, filter: TaskFilter) -> StoreResult<Vec<Task>> {
        let state = self.read()?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| viewer.may_view(task) && filter.matches(task))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks)
    }

    async fn update_task(&self, actor: Actor, id: i64, changes: TaskChanges) -> StoreResult<Task> {
        let mut state = self.write()?;
        let mut task = state.task_for_write(actor, id)?.clone();
        state.check_assignee(changes.new_assignee())?;
        task.apply(changes, Utc::now())?;
        state.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn delete_task(&self, actor: Actor, id: i64) -> StoreResult<()> {
        let mut state = self.write()?;
        state.task_for_write(actor, id)?;
        state.tasks.remove(&id);
        state.idempotency.retain(|_, task_id| *task_id != id);
        Ok(())
    }
}
