#![doc = "The `task_manager` library crate."]
#![doc = ""]
#![doc = "Bearer-token authentication, principal resolution, owner-scoped task and user"]
#![doc = "persistence, and validated DTO mapping, assembled into an actix-web application."]
#![doc = "The binary (`main.rs`) loads the configuration, picks a store and serves `configure`."]

pub mod auth;
pub mod config;
pub mod error;
pub mod mapper;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::http::header::{self, HeaderName};
use actix_web::web;

use crate::auth::{AuthMiddleware, PrincipalResolver, TokenIssuer, TokenValidator};
use crate::config::Config;
use crate::error::AppError;
use crate::services::{TaskService, UserService};
use crate::store::Store;

/// Every long-lived component, wired once at start-up.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub validator: Arc<TokenValidator>,
    pub issuer: Arc<TokenIssuer>,
    pub resolver: web::Data<PrincipalResolver>,
    pub tasks: web::Data<TaskService>,
    pub users: web::Data<UserService>,
}

impl AppState {
    pub fn build(config: &Config, store: Arc<dyn Store>) -> Self {
        let validator = Arc::new(TokenValidator::new(
            &config.jwt_secret,
            config.trusted_issuers.clone(),
            config.jwt_leeway_secs,
        ));
        let issuer = Arc::new(TokenIssuer::new(
            &config.jwt_secret,
            &config.jwt_issuer,
            config.jwt_ttl_secs,
        ));
        let resolver = web::Data::new(PrincipalResolver::new(
            store.clone(),
            config.provisioning,
            config.store_timeout,
        ));
        let tasks = web::Data::new(TaskService::new(store.clone(), config.store_timeout));
        let users = web::Data::new(UserService::new(
            store.clone(),
            issuer.clone(),
            config.bcrypt_cost,
            config.store_timeout,
        ));

        AppState {
            store,
            validator,
            issuer,
            resolver,
            tasks,
            users,
        }
    }
}

/// Registers application data, extractor error handlers, the health checks and the `/api` scope.
pub fn configure(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::from(state.store.clone()))
            .app_data(state.resolver.clone())
            .app_data(state.tasks.clone())
            .app_data(state.users.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                AppError::BadRequest(format!("Invalid JSON body: {}", err)).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                AppError::BadRequest(format!("Invalid query string: {}", err)).into()
            }))
            .app_data(web::PathConfig::default().error_handler(|err, _req| {
                AppError::BadRequest(format!("Invalid path: {}", err)).into()
            }))
            .service(routes::health::health)
            .service(routes::health::ready)
            .service(
                web::scope("/api")
                    .wrap(AuthMiddleware::new(state.validator.clone()))
                    .configure(routes::config),
            );
    }
}

/// CORS policy for a comma-separated origin list; `*` allows any origin.
pub fn cors(origins: &str) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .expose_headers(vec![
            header::LOCATION,
            HeaderName::from_static("x-total-count"),
        ])
        .max_age(3600);

    if origins.trim() == "*" {
        return cors.allow_any_origin();
    }
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}
