use std::collections::HashSet;

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::User;

/// Represents the claims encoded within a JWT (JSON Web Token).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject of the token: the user's stable external identity.
    pub sub: String,
    /// Issuer that minted the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Expiration timestamp (seconds since epoch).
    pub exp: u64,
    /// Issued-at timestamp (seconds since epoch).
    #[serde(default)]
    pub iat: u64,
    /// Unique token id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Space-separated granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Claims {
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|scope| scope.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Extracts the credential from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Result<&str, AppError> {
    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::InvalidToken("Authorization header must use the Bearer scheme".into()))?
        .trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AppError::InvalidToken("Malformed bearer credential".into()));
    }
    Ok(token)
}

/// Verifies bearer tokens against the shared HS256 key and the trusted issuer list.
///
/// Validation is pure: it reads nothing but the token and its own configuration.
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
    trusted_issuers: HashSet<String>,
}

impl TokenValidator {
    pub fn new(secret: &str, trusted_issuers: impl IntoIterator<Item = String>, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            trusted_issuers: trusted_issuers.into_iter().collect(),
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken(e.to_string()),
            }
        })?;
        let claims = data.claims;

        match claims.iss.as_deref() {
            Some(issuer) if self.trusted_issuers.contains(issuer) => {}
            Some(issuer) => return Err(AppError::UntrustedIssuer(issuer.to_string())),
            None => return Err(AppError::UntrustedIssuer("<none>".to_string())),
        }
        if claims.sub.trim().is_empty() {
            return Err(AppError::InvalidToken("Token subject is empty".into()));
        }
        Ok(claims)
    }
}

/// Mints tokens for users who log in with a local password.
pub struct TokenIssuer {
    key: EncodingKey,
    issuer: String,
    ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(secret: &str, issuer: &str, ttl_secs: u64) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            ttl_secs,
        }
    }

    pub fn claims_for(&self, user: &User) -> Claims {
        let now = Utc::now().timestamp().max(0) as u64;
        Claims {
            sub: user.subject.clone(),
            iss: Some(self.issuer.clone()),
            exp: now + self.ttl_secs,
            iat: now,
            jti: Some(Uuid::new_v4().to_string()),
            email: Some(user.email.clone()),
            given_name: Some(user.first_name.clone()),
            family_name: Some(user.last_name.clone()),
            roles: vec![user.role.as_str().to_string()],
            scope: Some("tasks users".to_string()),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, AppError> {
        self.sign(&self.claims_for(user))
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.key)
            .map_err(|e| AppError::InternalServerError(format!("Failed to generate token: {}", e)))
    }
}
