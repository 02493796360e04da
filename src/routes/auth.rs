use actix_web::{post, web, HttpResponse, Responder};

use crate::{auth::LoginRequest, error::AppError, services::UserService};

/// Login user
///
/// Checks email and password and returns a bearer token.
#[post("/login")]
pub async fn login(
    users: web::Data<UserService>,
    login_data: web::Json<LoginRequest>,
) -> Result<impl Responder, AppError> {
    let response = users.authenticate(login_data.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}
