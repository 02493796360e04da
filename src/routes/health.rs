use std::time::Duration;

use actix_web::{get, web, HttpResponse, Responder};
use chrono::Utc;
use serde_json::json;

use crate::services::read;
use crate::store::Store;

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check endpoint
///
/// Public liveness check. Reports the server time and the crate version
/// without touching the store.
#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check: whether the data store answers a trivial read in time.
/// An unreachable store turns the reply into a `503` with `"status": "degraded"`.
#[get("/health/ready")]
pub async fn ready(store: web::Data<dyn Store>) -> impl Responder {
    let store_up = match read(STORE_CHECK_TIMEOUT, store.find_user(0)).await {
        Ok(_) => true,
        Err(err) => {
            log::warn!("Readiness check failed: {}", err);
            false
        }
    };

    let (status, store_state) = if store_up { ("ok", "up") } else { ("degraded", "down") };
    let body = json!({
        "status": status,
        "store": store_state,
        "timestamp": Utc::now(),
    });
    if store_up {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
