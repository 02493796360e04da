//!
//! # Error Handling
//!
//! This module defines `AppError`, the single error type every layer of the
//! request pipeline surfaces to the HTTP boundary.
//!
//! `AppError` implements `actix_web::error::ResponseError` so handlers can
//! return `Result<_, AppError>` and have failures rendered as JSON bodies of
//! the form `{"error": <message>, "code": <machine code>}`. Validation
//! failures additionally carry a `fields` object listing every violated
//! constraint, and `Unavailable` responses carry a `Retry-After` header.

use std::collections::BTreeMap;

use actix_web::{
    error::ResponseError,
    http::{header, StatusCode},
    HttpResponse,
};
use serde_json::{json, Value};
use validator::{ValidationErrors, ValidationErrorsKind};

/// Represents all possible errors that can occur within the application.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The bearer credential is malformed or its signature does not verify (HTTP 401).
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    /// The bearer credential verified but is past its expiry (HTTP 401).
    #[error("Token has expired")]
    ExpiredToken,
    /// The bearer credential was minted by an issuer this service does not trust (HTTP 401).
    #[error("Untrusted token issuer: {0}")]
    UntrustedIssuer(String),
    /// The token is valid but its subject has no matching user (HTTP 401).
    #[error("Unknown principal: {0}")]
    UnknownPrincipal(String),
    /// Credentials are missing or wrong (HTTP 401).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// The caller is authenticated but may not touch the resource (HTTP 403).
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// A requested resource was not found (HTTP 404).
    #[error("Not Found: {0}")]
    NotFound(String),
    /// The write collides with existing data, e.g. a registered email (HTTP 409).
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The request body or query string could not be parsed (HTTP 400).
    #[error("Bad Request: {0}")]
    BadRequest(String),
    /// One or more field constraints were violated (HTTP 422).
    /// Carries every violation, not just the first.
    #[error("Validation Error: {0}")]
    ValidationError(ValidationErrors),
    /// A transient store or validator failure; the caller may retry (HTTP 503).
    #[error("Service Unavailable: {0}")]
    Unavailable(String),
    /// A write whose outcome is unknown; only an idempotent re-submission is safe (HTTP 500).
    #[error("Aborted: {0}")]
    Aborted(String),
    /// An unexpected server-side error (HTTP 500).
    #[error("Internal Server Error: {0}")]
    InternalServerError(String),
}

impl AppError {
    /// Stable machine-readable code included in every error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidToken(_) => "invalid_token",
            AppError::ExpiredToken => "expired_token",
            AppError::UntrustedIssuer(_) => "untrusted_issuer",
            AppError::UnknownPrincipal(_) => "unknown_principal",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::ValidationError(_) => "validation_error",
            AppError::Unavailable(_) => "unavailable",
            AppError::Aborted(_) => "aborted",
            AppError::InternalServerError(_) => "internal_error",
        }
    }

    /// True for failures of the authentication boundary (token or principal).
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AppError::InvalidToken(_)
                | AppError::ExpiredToken
                | AppError::UntrustedIssuer(_)
                | AppError::UnknownPrincipal(_)
                | AppError::Unauthorized(_)
        )
    }

    fn message(&self) -> String {
        match self {
            AppError::InvalidToken(msg)
            | AppError::UnknownPrincipal(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg)
            | AppError::Unavailable(msg)
            | AppError::Aborted(msg)
            | AppError::InternalServerError(msg) => msg.clone(),
            AppError::ExpiredToken => "Token has expired".to_string(),
            AppError::UntrustedIssuer(issuer) => format!("Untrusted token issuer: {}", issuer),
            AppError::ValidationError(_) => "Validation failed".to_string(),
        }
    }
}

/// Renders every field violation as `{"field": [{"code", "message"}]}`, sorted by field name.
pub fn violations_json(errors: &ValidationErrors) -> Value {
    let mut fields: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
    for (field, kind) in errors.errors() {
        if let ValidationErrorsKind::Field(list) = kind {
            let entries = list
                .iter()
                .map(|err| {
                    json!({
                        "code": err.code,
                        "message": err.message,
                    })
                })
                .collect();
            fields.insert(*field, entries);
        }
    }
    json!(fields)
}

/// Converts `AppError` variants into `HttpResponse` objects.
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidToken(_)
            | AppError::ExpiredToken
            | AppError::UntrustedIssuer(_)
            | AppError::UnknownPrincipal(_)
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Aborted(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({
            "error": self.message(),
            "code": self.code(),
        });
        match self {
            AppError::ValidationError(errors) => {
                body["fields"] = violations_json(errors);
            }
            AppError::Aborted(_) => {
                body["retry"] = json!("idempotent-resubmission");
            }
            _ => {}
        }

        let mut response = HttpResponse::build(self.status_code());
        if self.is_authentication_failure() {
            response.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
        }
        if let AppError::Unavailable(_) = self {
            response.insert_header((header::RETRY_AFTER, "1"));
        }
        response.json(body)
    }
}

/// Converts `validator::ValidationErrors` into `AppError::ValidationError`.
impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> AppError {
        AppError::ValidationError(errors)
    }
}

/// Password hashing failures are server-side problems.
impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> AppError {
        AppError::InternalServerError(error.to_string())
    }
}
