use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use super::Violations;
use crate::auth::password::hash_password;
use crate::auth::token::Claims;
use crate::error::AppError;
use crate::models::{NewUser, Role, SortOrder, User, UserChanges, UserPage, UserSortField};

const NAME_MAX: usize = 100;
const PATCH_NAME_MIN: usize = 2;
const PASSWORD_MIN: usize = 3;
const SORT_FIELDS: [&str; 5] = ["id", "email", "first_name", "last_name", "created_at"];

/// Outbound user representation. The password digest never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        UserDto {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// Validated, trimmed profile fields shared by create and full replacement.
struct Profile {
    email: String,
    first_name: String,
    last_name: String,
    password: String,
}

fn check_profile(
    email: Option<&String>,
    first_name: Option<&String>,
    last_name: Option<&String>,
    password: Option<&String>,
) -> Result<Profile, ValidationErrors> {
    let mut violations = Violations::new();
    if let Some(email) = violations.required("email", email) {
        violations.email("email", email);
    }
    if let Some(first_name) = violations.required("first_name", first_name) {
        violations.text("first_name", first_name, 1, NAME_MAX);
    }
    if let Some(last_name) = violations.required("last_name", last_name) {
        violations.text("last_name", last_name, 1, NAME_MAX);
    }
    if let Some(password) = violations.required("password", password) {
        violations.length("password", password, PASSWORD_MIN, usize::MAX);
    }
    violations.finish()?;

    let trimmed = |value: Option<&String>| value.map(|v| v.trim().to_string()).unwrap_or_default();
    Ok(Profile {
        email: trimmed(email),
        first_name: trimmed(first_name),
        last_name: trimmed(last_name),
        password: password.cloned().unwrap_or_default(),
    })
}

/// Builds the account provisioned for a verified token whose subject is unknown.
///
/// The claims pass the same email and name rules as registration, except that
/// names may be absent.
pub fn new_user_from_claims(claims: &Claims) -> Result<NewUser, ValidationErrors> {
    let mut violations = Violations::new();
    if let Some(email) = violations.required("email", claims.email.as_ref()) {
        violations.email("email", email);
    }
    if let Some(given_name) = &claims.given_name {
        violations.length("given_name", given_name.trim(), 0, NAME_MAX);
    }
    if let Some(family_name) = &claims.family_name {
        violations.length("family_name", family_name.trim(), 0, NAME_MAX);
    }
    violations.finish()?;

    let trimmed = |value: &Option<String>| value.as_deref().map(str::trim).unwrap_or_default().to_string();
    Ok(NewUser {
        subject: claims.sub.clone(),
        email: trimmed(&claims.email),
        first_name: trimmed(&claims.given_name),
        last_name: trimmed(&claims.family_name),
        password_digest: None,
        role: Role::User,
    })
}

/// Body of `POST /api/users`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserCreateDto {
    pub email: Option<String>,
    #[serde(alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(alias = "lastName")]
    pub last_name: Option<String>,
    pub password: Option<String>,
}

impl UserCreateDto {
    fn profile(&self) -> Result<Profile, ValidationErrors> {
        check_profile(
            self.email.as_ref(),
            self.first_name.as_ref(),
            self.last_name.as_ref(),
            self.password.as_ref(),
        )
    }

    /// Validates, hashes the password and assigns a fresh subject.
    pub fn to_new_user(&self, role: Role, bcrypt_cost: u32) -> Result<NewUser, AppError> {
        let profile = self.profile()?;
        Ok(NewUser {
            subject: Uuid::new_v4().to_string(),
            email: profile.email,
            first_name: profile.first_name,
            last_name: profile.last_name,
            password_digest: Some(hash_password(&profile.password, bcrypt_cost)?),
            role,
        })
    }
}

impl Validate for UserCreateDto {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.profile().map(|_| ())
    }
}

/// Body of `PUT /api/users/{id}`. Same constraints as registration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserUpdateDto {
    pub email: Option<String>,
    #[serde(alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(alias = "lastName")]
    pub last_name: Option<String>,
    pub password: Option<String>,
}

impl UserUpdateDto {
    fn profile(&self) -> Result<Profile, ValidationErrors> {
        check_profile(
            self.email.as_ref(),
            self.first_name.as_ref(),
            self.last_name.as_ref(),
            self.password.as_ref(),
        )
    }

    pub fn to_changes(&self, bcrypt_cost: u32) -> Result<UserChanges, AppError> {
        let profile = self.profile()?;
        Ok(UserChanges {
            email: Some(profile.email),
            first_name: Some(profile.first_name),
            last_name: Some(profile.last_name),
            password_digest: Some(hash_password(&profile.password, bcrypt_cost)?),
        })
    }
}

impl Validate for UserUpdateDto {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.profile().map(|_| ())
    }
}

/// Body of `PATCH /api/users/{id}`. Only the present fields change.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserPatchDto {
    pub email: Option<String>,
    #[serde(alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(alias = "lastName")]
    pub last_name: Option<String>,
    pub password: Option<String>,
}

impl UserPatchDto {
    fn check(&self) -> Result<(), ValidationErrors> {
        let mut violations = Violations::new();
        if let Some(email) = &self.email {
            violations.email("email", email);
        }
        if let Some(first_name) = &self.first_name {
            violations.text("first_name", first_name, PATCH_NAME_MIN, NAME_MAX);
        }
        if let Some(last_name) = &self.last_name {
            violations.text("last_name", last_name, PATCH_NAME_MIN, NAME_MAX);
        }
        if let Some(password) = &self.password {
            violations.length("password", password, PASSWORD_MIN, usize::MAX);
        }
        violations.finish()
    }

    pub fn to_changes(&self, bcrypt_cost: u32) -> Result<UserChanges, AppError> {
        self.check()?;
        let password_digest = match &self.password {
            Some(password) => Some(hash_password(password, bcrypt_cost)?),
            None => None,
        };
        Ok(UserChanges {
            email: self.email.as_deref().map(|v| v.trim().to_string()),
            first_name: self.first_name.as_deref().map(|v| v.trim().to_string()),
            last_name: self.last_name.as_deref().map(|v| v.trim().to_string()),
            password_digest,
        })
    }
}

impl Validate for UserPatchDto {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.check()
    }
}

/// Query string of `GET /api/users`, in react-admin's `_start`/`_end` convention.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListQuery {
    #[serde(rename = "_start")]
    pub start: Option<i64>,
    #[serde(rename = "_end")]
    pub end: Option<i64>,
    #[serde(rename = "_sort")]
    pub sort: Option<String>,
    #[serde(rename = "_order")]
    pub order: Option<String>,
}

impl UserListQuery {
    /// Resolves the requested window. Pages larger than `UserPage::MAX_LIMIT` are capped.
    pub fn to_page(&self) -> Result<UserPage, ValidationErrors> {
        let mut violations = Violations::new();
        let offset = self.start.unwrap_or(0);
        if offset < 0 {
            violations.add("_start", "range", "_start must not be negative");
        }
        let end = match self.end {
            Some(end) => end,
            None => match offset.checked_add(UserPage::DEFAULT_LIMIT) {
                Some(end) => end,
                None => {
                    violations.add("_start", "range", "_start is too large");
                    offset
                }
            },
        };
        if end < offset {
            violations.add("_end", "range", "_end must not be before _start");
        }
        let sort = match self.sort.as_deref() {
            None => UserSortField::default(),
            Some(raw) => match UserSortField::parse(raw) {
                Ok(sort) => sort,
                Err(_) => {
                    violations.add(
                        "_sort",
                        "enum",
                        format!("_sort must be one of: {}", SORT_FIELDS.join(", ")),
                    );
                    UserSortField::default()
                }
            },
        };
        let order = match self.order.as_deref() {
            None => SortOrder::default(),
            Some(raw) => match SortOrder::parse(raw) {
                Ok(order) => order,
                Err(_) => {
                    violations.add("_order", "enum", "_order must be ASC or DESC");
                    SortOrder::default()
                }
            },
        };
        violations.finish()?;

        Ok(UserPage {
            offset,
            limit: (end - offset).min(UserPage::MAX_LIMIT),
            sort,
            order,
        })
    }
}
