use std::sync::Arc;
use std::time::Duration;

use validator::Validate;

use super::{read, write};
use crate::auth::password::verify_password;
use crate::auth::token::TokenIssuer;
use crate::auth::{AuthResponse, LoginRequest, Principal};
use crate::error::AppError;
use crate::mapper::{UserCreateDto, UserDto, UserListQuery, UserPatchDto, UserUpdateDto};
use crate::models::{Role, UserChanges};
use crate::store::Store;

/// Registration, login and profile management.
pub struct UserService {
    store: Arc<dyn Store>,
    issuer: Arc<TokenIssuer>,
    bcrypt_cost: u32,
    timeout: Duration,
}

fn forbidden() -> AppError {
    AppError::Forbidden("You may only manage your own account".into())
}

impl UserService {
    pub fn new(
        store: Arc<dyn Store>,
        issuer: Arc<TokenIssuer>,
        bcrypt_cost: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            issuer,
            bcrypt_cost,
            timeout,
        }
    }

    pub async fn register(&self, dto: UserCreateDto) -> Result<UserDto, AppError> {
        self.create(dto, Role::User).await
    }

    async fn create(&self, dto: UserCreateDto, role: Role) -> Result<UserDto, AppError> {
        let new_user = dto.to_new_user(role, self.bcrypt_cost)?;
        let user = write(self.timeout, self.store.create_user(new_user)).await?;
        log::info!("Registered user {} ({})", user.id, user.email);
        Ok(UserDto::from(&user))
    }

    /// Exchanges email and password for a bearer token.
    pub async fn authenticate(&self, request: LoginRequest) -> Result<AuthResponse, AppError> {
        request.validate()?;
        let email = request.email.as_deref().unwrap_or_default().trim();
        let password = request.password.as_deref().unwrap_or_default();

        let user = read(self.timeout, self.store.find_user_by_email(email)).await?;
        let user = match user {
            Some(user)
                if user
                    .password_digest
                    .as_deref()
                    .is_some_and(|digest| verify_password(password, digest)) =>
            {
                user
            }
            _ => {
                log::warn!("Failed login attempt for {}", email);
                return Err(AppError::Unauthorized("Invalid email or password".into()));
            }
        };

        let token = self.issuer.issue(&user)?;
        Ok(AuthResponse {
            token,
            user_id: user.id,
        })
    }

    pub async fn list(&self, query: UserListQuery) -> Result<(Vec<UserDto>, i64), AppError> {
        let page = query.to_page()?;
        let (users, total) = read(self.timeout, self.store.list_users(page)).await?;
        Ok((users.iter().map(UserDto::from).collect(), total))
    }

    /// Authorization is checked before existence, so other users' ids reveal nothing.
    pub async fn get(&self, principal: &Principal, id: i64) -> Result<UserDto, AppError> {
        if !principal.may_access_user(id) {
            return Err(forbidden());
        }
        principal.authorize();
        let user = read(self.timeout, self.store.find_user(id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))?;
        Ok(UserDto::from(&user))
    }

    pub async fn replace(&self, principal: &Principal, id: i64, dto: UserUpdateDto) -> Result<UserDto, AppError> {
        if !principal.may_access_user(id) {
            return Err(forbidden());
        }
        principal.authorize();
        let changes = dto.to_changes(self.bcrypt_cost)?;
        self.apply(id, changes).await
    }

    pub async fn patch(&self, principal: &Principal, id: i64, dto: UserPatchDto) -> Result<UserDto, AppError> {
        if !principal.may_access_user(id) {
            return Err(forbidden());
        }
        principal.authorize();
        let changes = dto.to_changes(self.bcrypt_cost)?;
        self.apply(id, changes).await
    }

    async fn apply(&self, id: i64, changes: UserChanges) -> Result<UserDto, AppError> {
        let user = write(self.timeout, self.store.update_user(id, changes)).await?;
        log::info!("Updated user {}", user.id);
        Ok(UserDto::from(&user))
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), AppError> {
        if !principal.may_access_user(id) {
            return Err(forbidden());
        }
        principal.authorize();
        write(self.timeout, self.store.soft_delete_user(id)).await?;
        log::info!("User {} deleted user {}", principal.user_id, id);
        Ok(())
    }

    /// Creates the configured administrator unless a user with that email exists.
    pub async fn seed_admin(&self, email: &str, password: &str) -> Result<Option<UserDto>, AppError> {
        if read(self.timeout, self.store.find_user_by_email(email)).await?.is_some() {
            return Ok(None);
        }
        let dto = UserCreateDto {
            email: Some(email.to_string()),
            first_name: Some("Admin".to_string()),
            last_name: Some("User".to_string()),
            password: Some(password.to_string()),
        };
        self.create(dto, Role::Admin).await.map(Some)
    }
}
