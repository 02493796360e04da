use actix_web::{delete, get, patch, post, put, web, HttpResponse, Responder};

use crate::{
    auth::CurrentPrincipal,
    error::AppError,
    mapper::{UserCreateDto, UserListQuery, UserPatchDto, UserUpdateDto},
    services::UserService,
};

pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";

/// Registers a new user. Public.
#[post("")]
pub async fn register(
    users: web::Data<UserService>,
    body: web::Json<UserCreateDto>,
) -> Result<impl Responder, AppError> {
    let user = users.register(body.into_inner()).await?;
    Ok(HttpResponse::Created()
        .insert_header(("Location", format!("/api/users/{}", user.id)))
        .json(user))
}

/// Lists users one page at a time; the total count goes in `X-Total-Count`.
#[get("")]
pub async fn list_users(
    CurrentPrincipal(principal): CurrentPrincipal,
    users: web::Data<UserService>,
    query: web::Query<UserListQuery>,
) -> Result<impl Responder, AppError> {
    // Any signed-in user may browse the directory.
    principal.authorize();
    let (page, total) = users.list(query.into_inner()).await?;
    Ok(HttpResponse::Ok()
        .insert_header((TOTAL_COUNT_HEADER, total.to_string()))
        .json(page))
}

#[get("/{id}")]
pub async fn get_user(
    CurrentPrincipal(principal): CurrentPrincipal,
    users: web::Data<UserService>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let user = users.get(&principal, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[put("/{id}")]
pub async fn update_user(
    CurrentPrincipal(principal): CurrentPrincipal,
    users: web::Data<UserService>,
    path: web::Path<i64>,
    body: web::Json<UserUpdateDto>,
) -> Result<impl Responder, AppError> {
    let user = users
        .replace(&principal, path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(user))
}

#[patch("/{id}")]
pub async fn patch_user(
    CurrentPrincipal(principal): CurrentPrincipal,
    users: web::Data<UserService>,
    path: web::Path<i64>,
    body: web::Json<UserPatchDto>,
) -> Result<impl Responder, AppError> {
    let user = users
        .patch(&principal, path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(user))
}

/// Soft-deletes the account; the user can no longer log in or authenticate.
#[delete("/{id}")]
pub async fn delete_user(
    CurrentPrincipal(principal): CurrentPrincipal,
    users: web::Data<UserService>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    users.delete(&principal, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
