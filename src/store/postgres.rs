//! PostgreSQL store.
//!
//! Every write runs in its own transaction. Rows a write depends on are locked
//! with `SELECT ... FOR UPDATE` before ownership and transition checks, so the
//! checks and the write see the same state. Failures before `COMMIT` roll the
//! transaction back; a failure at `COMMIT` leaves the outcome unknown and is
//! reported as `StoreError::Aborted`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};

use super::{Store, StoreError, StoreResult};
use crate::models::{
    Actor, NewTask, NewUser, Task, TaskChanges, TaskFilter, User, UserChanges, UserPage,
};

const USER_COLUMNS: &str =
    "id, subject, email, first_name, last_name, password_digest, role, created_at, updated_at, deleted_at";
const TASK_COLUMNS: &str =
    "id, title, description, status, priority, owner_id, assignee_id, due_date, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Maps a driver error raised before commit.
fn classify(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            let message = match db.constraint() {
                Some("users_email_active") => "A user with this email already exists",
                Some("users_subject_key") => "Subject already registered",
                _ => "Record already exists",
            };
            return StoreError::Conflict(message.to_string());
        }
        if db.code().map_or(false, |code| is_permanent(&code)) {
            log::warn!("Database rejected write: {}", db.message());
            return StoreError::Rejected(db.message().to_string());
        }
    }
    log::error!("Database error: {}", error);
    StoreError::Unavailable(error.to_string())
}

/// SQLSTATE classes that fail the same way on every retry: data exceptions
/// (22xxx) plus not-null, foreign-key and check violations.
fn is_permanent(code: &str) -> bool {
    code.starts_with("22") || matches!(code, "23502" | "23503" | "23514")
}

async fn commit(tx: Transaction<'_, Postgres>) -> StoreResult<()> {
    tx.commit().await.map_err(|e| {
        log::error!("Commit failed, write outcome unknown: {}", e);
        StoreError::Aborted(e.to_string())
    })
}

/// Escapes `LIKE` metacharacters so a search term matches literally.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(classify)
    }

    async fn lock_task(
        tx: &mut Transaction<'static, Postgres>,
        actor: Actor,
        id: i64,
    ) -> StoreResult<Task> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE id = $1 FOR UPDATE",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(classify)?
        .ok_or_else(|| StoreError::task_not_found(id))?;

        if !actor.may_modify(&task) {
            return Err(StoreError::Forbidden {
                actor: actor.user_id,
                task: id,
            });
        }
        Ok(task)
    }

    /// Share-locks the assignee row so it cannot be deleted before commit.
    async fn check_assignee(
        tx: &mut Transaction<'static, Postgres>,
        assignee_id: Option<i64>,
    ) -> StoreResult<()> {
        let Some(id) = assignee_id else {
            return Ok(());
        };
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users WHERE id = $1 AND deleted_at IS NULL FOR SHARE",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(classify)?;
        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::UnknownAssignee(id)),
        }
    }

    async fn find_by_idempotency_key(
        tx: &mut Transaction<'static, Postgres>,
        owner_id: i64,
        key: &str,
    ) -> StoreResult<Option<Task>> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE owner_id = $1 AND idempotency_key = $2",
            TASK_COLUMNS
        ))
        .bind(owner_id)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(classify)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tx = self.begin().await?;
        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (subject, email, first_name, last_name, password_digest, role) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.subject)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_digest)
        .bind(user.role)
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;
        commit(tx).await?;
        Ok(created)
    }

    async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }

    async fn find_user_by_subject(&self, subject: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE subject = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }

    async fn list_users(&self, page: UserPage) -> StoreResult<(Vec<User>, i64)> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;

        // Sort column and direction come from closed enums, never from raw input.
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE deleted_at IS NULL ORDER BY {} {}, id ASC LIMIT $1 OFFSET $2",
            USER_COLUMNS,
            page.sort.column(),
            page.order.as_sql()
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok((users, total))
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User> {
        let mut tx = self.begin().await?;
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?
        .ok_or_else(|| StoreError::user_not_found(id))?;

        let updated = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET \
                email = COALESCE($2, email), \
                first_name = COALESCE($3, first_name), \
                last_name = COALESCE($4, last_name), \
                password_digest = COALESCE($5, password_digest), \
                updated_at = $6 \
             WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(&changes.email)
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(&changes.password_digest)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;
        commit(tx).await?;
        Ok(updated)
    }

    async fn soft_delete_user(&self, id: i64) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE users SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::user_not_found(id));
        }
        commit(tx).await
    }

    async fn create_task(
        &self,
        owner_id: i64,
        task: NewTask,
        idempotency_key: Option<String>,
    ) -> StoreResult<Task> {
        let mut tx = self.begin().await?;
        if let Some(key) = &idempotency_key {
            if let Some(existing) = Self::find_by_idempotency_key(&mut tx, owner_id, key).await? {
                return Ok(existing);
            }
        }
        Self::check_assignee(&mut tx, task.assignee_id).await?;

        let now = Utc::now();
        let inserted = sqlx::query_as::<_, Task>(&format!(
            "INSERT INTO tasks \
                (title, description, status, priority, owner_id, assignee_id, due_date, idempotency_key, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (owner_id, idempotency_key) DO NOTHING \
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status)
        .bind(task.priority)
        .bind(owner_id)
        .bind(task.assignee_id)
        .bind(task.due_date)
        .bind(&idempotency_key)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;

        let created = match (inserted, &idempotency_key) {
            (Some(created), _) => created,
            // A concurrent request with the same key won the insert.
            (None, Some(key)) => Self::find_by_idempotency_key(&mut tx, owner_id, key)
                .await?
                .ok_or_else(|| StoreError::Unavailable("idempotent insert lost its row".into()))?,
            (None, None) => {
                return Err(StoreError::Unavailable("insert returned no row".into()));
            }
        };
        commit(tx).await?;
        Ok(created)
    }

    async fn find_task(&self, id: i64) -> StoreResult<Option<Task>> {
        sqlx::query_as::<_, Task>(&format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)
    }

    async fn list_tasks(&self, viewer: Actor, filter: TaskFilter) -> StoreResult<Vec<Task>> {
        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM tasks WHERE TRUE", TASK_COLUMNS));
        if !viewer.admin {
            query
                .push(" AND (owner_id = ")
                .push_bind(viewer.user_id)
                .push(" OR assignee_id = ")
                .push_bind(viewer.user_id)
                .push(")");
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(priority) = filter.priority {
            query.push(" AND priority = ").push_bind(priority);
        }
        if let Some(assignee_id) = filter.assignee_id {
            query.push(" AND assignee_id = ").push_bind(assignee_id);
        }
        if let Some(owner_id) = filter.owner_id {
            query.push(" AND owner_id = ").push_bind(owner_id);
        }
        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = like_pattern(term);
            query
                .push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR description ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        query.push(" ORDER BY created_at DESC, id DESC");

        query
            .build_query_as::<Task>()
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }

    async fn update_task(&self, actor: Actor, id: i64, changes: TaskChanges) -> StoreResult<Task> {
        let mut tx = self.begin().await?;
        let mut task = Self::lock_task(&mut tx, actor, id).await?;
        Self::check_assignee(&mut tx, changes.new_assignee()).await?;
        task.apply(changes, Utc::now())?;

        let updated = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET title = $2, description = $3, status = $4, priority = $5, \
                assignee_id = $6, due_date = $7, updated_at = $8 \
             WHERE id = $1 RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status)
        .bind(task.priority)
        .bind(task.assignee_id)
        .bind(task.due_date)
        .bind(task.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;
        commit(tx).await?;
        Ok(updated)
    }

    async fn delete_task(&self, actor: Actor, id: i64) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        Self::lock_task(&mut tx, actor, id).await?;
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        commit(tx).await
    }
}
