use actix_web::{delete, get, patch, post, put, web, HttpRequest, HttpResponse, Responder};

use crate::{
    auth::CurrentPrincipal,
    error::AppError,
    mapper::{TaskCreateDto, TaskPatchDto, TaskUpdateDto},
    models::TaskFilter,
    services::TaskService,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Lists the tasks the caller owns or is assigned to (administrators see all).
///
/// ## Query Parameters:
/// - `status`, `priority`: exact match on the snake_case value.
/// - `assignee_id`, `owner_id`: exact match on a user id.
/// - `search`: case-insensitive substring of title or description.
#[get("")]
pub async fn get_tasks(
    CurrentPrincipal(principal): CurrentPrincipal,
    tasks: web::Data<TaskService>,
    query: web::Query<TaskFilter>,
) -> Result<impl Responder, AppError> {
    let tasks = tasks.list(&principal, query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(tasks))
}

/// Creates a task owned by the caller.
///
/// An `Idempotency-Key` header makes the request safe to resubmit: a repeated
/// key returns the task created the first time.
#[post("")]
pub async fn create_task(
    CurrentPrincipal(principal): CurrentPrincipal,
    tasks: web::Data<TaskService>,
    req: HttpRequest,
    body: web::Json<TaskCreateDto>,
) -> Result<impl Responder, AppError> {
    let idempotency_key = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| AppError::BadRequest("Idempotency-Key must be visible ASCII".into()))
        })
        .transpose()?;

    let task = tasks
        .create(&principal, body.into_inner(), idempotency_key)
        .await?;
    Ok(HttpResponse::Created()
        .insert_header(("Location", format!("/api/tasks/{}", task.id)))
        .json(task))
}

/// Fetches one task; visible to its owner, its assignee and administrators.
#[get("/{id}")]
pub async fn get_task(
    CurrentPrincipal(principal): CurrentPrincipal,
    tasks: web::Data<TaskService>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let task = tasks.get(&principal, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(task))
}

/// Replaces a task. Optional fields left out of the body are cleared.
#[put("/{id}")]
pub async fn update_task(
    CurrentPrincipal(principal): CurrentPrincipal,
    tasks: web::Data<TaskService>,
    path: web::Path<i64>,
    body: web::Json<TaskUpdateDto>,
) -> Result<impl Responder, AppError> {
    let task = tasks
        .replace(&principal, path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(task))
}

/// Changes only the fields present in the body; `null` clears a nullable field.
#[patch("/{id}")]
pub async fn patch_task(
    CurrentPrincipal(principal): CurrentPrincipal,
    tasks: web::Data<TaskService>,
    path: web::Path<i64>,
    body: web::Json<TaskPatchDto>,
) -> Result<impl Responder, AppError> {
    let task = tasks
        .patch(&principal, path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(task))
}

#[delete("/{id}")]
pub async fn delete_task(
    CurrentPrincipal(principal): CurrentPrincipal,
    tasks: web::Data<TaskService>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    tasks.delete(&principal, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
