pub mod auth;
pub mod health;
pub mod tasks;
pub mod users;

use actix_web::web;

/// Routes mounted under `/api`.
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(auth::login)
        .service(
            web::scope("/users")
                .service(users::register)
                .service(users::list_users)
                .service(users::get_user)
                .service(users::update_user)
                .service(users::patch_user)
                .service(users::delete_user),
        )
        .service(
            web::scope("/tasks")
                .service(tasks::get_tasks)
                .service(tasks::create_task)
                .service(tasks::get_task)
                .service(tasks::update_task)
                .service(tasks::patch_task)
                .service(tasks::delete_task),
        );
}
