use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::stage::AuthorizationMark;
use crate::auth::token::Claims;
use crate::error::AppError;
use crate::mapper::{new_user_from_claims, violated_fields};
use crate::models::{Actor, Role, User};
use crate::services::{read, write};
use crate::store::Store;

/// The authenticated identity behind the current request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: i64,
    pub subject: String,
    pub email: String,
    pub role: Role,
    pub scopes: Vec<String>,
    pub(crate) authorization: AuthorizationMark,
}

/// Principals are equal when they carry the same identity and grants.
impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.subject == other.subject
            && self.email == other.email
            && self.role == other.role
            && self.scopes == other.scopes
    }
}

impl Eq for Principal {}

impl Principal {
    /// Role comes from the stored user; token role claims grant nothing.
    pub fn from_user(user: &User, claims: &Claims) -> Self {
        Principal {
            user_id: user.id,
            subject: user.subject.clone(),
            email: user.email.clone(),
            role: user.role,
            scopes: claims.scopes(),
            authorization: AuthorizationMark::default(),
        }
    }

    /// Records that this request passed its authorization check.
    pub fn authorize(&self) {
        self.authorization.set();
    }

    pub fn authorization(&self) -> &AuthorizationMark {
        &self.authorization
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            admin: self.is_admin(),
        }
    }

    /// Users may act on their own account; administrators on any.
    pub fn may_access_user(&self, user_id: i64) -> bool {
        self.is_admin() || self.user_id == user_id
    }
}

/// What to do with a verified token whose subject has no stored user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningPolicy {
    /// Fail with `UnknownPrincipal`.
    #[default]
    Reject,
    /// Create a user from the token's claims.
    Auto,
}

impl FromStr for ProvisioningPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ProvisioningPolicy::Reject),
            "auto" => Ok(ProvisioningPolicy::Auto),
            other => Err(format!("expected 'reject' or 'auto', got '{}'", other)),
        }
    }
}

/// Maps verified claims to a stored user.
pub struct PrincipalResolver {
    store: Arc<dyn Store>,
    policy: ProvisioningPolicy,
    timeout: Duration,
}

impl PrincipalResolver {
    pub fn new(store: Arc<dyn Store>, policy: ProvisioningPolicy, timeout: Duration) -> Self {
        Self {
            store,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> ProvisioningPolicy {
        self.policy
    }

    pub async fn resolve(&self, claims: &Claims) -> Result<Principal, AppError> {
        let found = read(self.timeout, self.store.find_user_by_subject(&claims.sub)).await?;
        if let Some(user) = found {
            return Ok(Principal::from_user(&user, claims));
        }

        match self.policy {
            ProvisioningPolicy::Reject => Err(AppError::UnknownPrincipal(format!(
                "No user for subject {}",
                claims.sub
            ))),
            ProvisioningPolicy::Auto => self.provision(claims).await,
        }
    }

    async fn provision(&self, claims: &Claims) -> Result<Principal, AppError> {
        let new_user = new_user_from_claims(claims).map_err(|errors| {
            AppError::UnknownPrincipal(format!(
                "No user for subject {} and its claims cannot provision one (invalid: {})",
                claims.sub,
                violated_fields(&errors).join(", ")
            ))
        })?;

        match write(self.timeout, self.store.create_user(new_user)).await {
            Ok(user) => {
                log::info!("Provisioned user {} for subject {}", user.id, user.subject);
                Ok(Principal::from_user(&user, claims))
            }
            Err(AppError::Conflict(_)) => {
                // Either a concurrent request provisioned this subject, or the email
                // belongs to a different subject; only the former resolves.
                read(self.timeout, self.store.find_user_by_subject(&claims.sub))
                    .await?
                    .map(|user| Principal::from_user(&user, claims))
                    .ok_or_else(|| {
                        AppError::UnknownPrincipal(format!(
                            "Cannot provision subject {}: email already registered",
                            claims.sub
                        ))
                    })
            }
            Err(e) => Err(e),
        }
    }
}
