use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::ProvisioningPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub server_host: String,
    pub server_port: u16,
    /// Shared HS256 signing key.
    pub jwt_secret: String,
    /// Issuer stamped on tokens minted by `/api/login`.
    pub jwt_issuer: String,
    /// Issuers accepted on incoming tokens, `jwt_issuer` included.
    pub trusted_issuers: Vec<String>,
    pub jwt_ttl_secs: u64,
    pub jwt_leeway_secs: u64,
    pub provisioning: ProvisioningPolicy,
    pub store_timeout: Duration,
    pub bcrypt_cost: u32,
    /// Comma-separated origins, or `*`.
    pub cors_origins: String,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any name-to-value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = non_empty(lookup("DATABASE_URL")).filter(|url| url != "memory");
        let jwt_secret =
            non_empty(lookup("JWT_SECRET")).ok_or(ConfigError::MissingEnvVar("JWT_SECRET"))?;
        let jwt_issuer =
            non_empty(lookup("JWT_ISSUER")).unwrap_or_else(|| "task-manager".to_string());

        let mut trusted_issuers = vec![jwt_issuer.clone()];
        if let Some(extra) = lookup("JWT_TRUSTED_ISSUERS") {
            for issuer in extra.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !trusted_issuers.iter().any(|known| known == issuer) {
                    trusted_issuers.push(issuer.to_string());
                }
            }
        }

        let store_timeout_ms: u64 = parse(&lookup, "STORE_TIMEOUT_MS", 5000)?;
        if store_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "STORE_TIMEOUT_MS",
                reason: "must be greater than zero".into(),
            });
        }
        let bcrypt_cost: u32 = parse(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                name: "BCRYPT_COST",
                reason: "must be between 4 and 31".into(),
            });
        }

        Ok(Config {
            database_url,
            db_max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            server_host: non_empty(lookup("SERVER_HOST")).unwrap_or_else(|| "127.0.0.1".to_string()),
            server_port: parse(&lookup, "SERVER_PORT", 8080)?,
            jwt_secret,
            jwt_issuer,
            trusted_issuers,
            jwt_ttl_secs: parse(&lookup, "JWT_TTL_SECS", 86_400)?,
            jwt_leeway_secs: parse(&lookup, "JWT_LEEWAY_SECS", 0)?,
            provisioning: parse(&lookup, "PRINCIPAL_PROVISIONING", ProvisioningPolicy::Reject)?,
            store_timeout: Duration::from_millis(store_timeout_ms),
            bcrypt_cost,
            cors_origins: non_empty(lookup("CORS_ALLOWED_ORIGINS")).unwrap_or_else(|| "*".to_string()),
            admin_email: non_empty(lookup("ADMIN_EMAIL")),
            admin_password: non_empty(lookup("ADMIN_PASSWORD")),
        })
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }
}
