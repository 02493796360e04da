use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::task::ParseEnumError;

/// Role of a user. Corresponds to the `user_role` SQL enum.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// A registered user as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: i64,
    /// Stable external identity, carried as the token `sub` claim.
    pub subject: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// bcrypt digest; `None` for users provisioned from a token without a local password.
    pub password_digest: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the user is soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn apply(&mut self, changes: UserChanges, now: DateTime<Utc>) {
        if let Some(email) = changes.email {
            self.email = email;
        }
        if let Some(first_name) = changes.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            self.last_name = last_name;
        }
        if let Some(digest) = changes.password_digest {
            self.password_digest = Some(digest);
        }
        self.updated_at = now;
    }
}

/// Data for a user about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub subject: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_digest: Option<String>,
    pub role: Role,
}

impl NewUser {
    pub fn into_user(self, id: i64, now: DateTime<Utc>) -> User {
        User {
            id,
            subject: self.subject,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            password_digest: self.password_digest,
            role: self.role,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Profile changes; absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_digest: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self == &UserChanges::default()
    }
}

/// Columns the user listing may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserSortField {
    #[default]
    Id,
    Email,
    FirstName,
    LastName,
    CreatedAt,
}

impl UserSortField {
    pub fn column(self) -> &'static str {
        match self {
            UserSortField::Id => "id",
            UserSortField::Email => "email",
            UserSortField::FirstName => "first_name",
            UserSortField::LastName => "last_name",
            UserSortField::CreatedAt => "created_at",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseEnumError> {
        match value {
            "id" => Ok(UserSortField::Id),
            "email" => Ok(UserSortField::Email),
            "first_name" | "firstName" => Ok(UserSortField::FirstName),
            "last_name" | "lastName" => Ok(UserSortField::LastName),
            "created_at" | "createdAt" => Ok(UserSortField::CreatedAt),
            other => Err(ParseEnumError {
                kind: "sort field",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    /// Case-insensitive `ASC` / `DESC`.
    pub fn parse(value: &str) -> Result<Self, ParseEnumError> {
        if value.eq_ignore_ascii_case("asc") {
            Ok(SortOrder::Asc)
        } else if value.eq_ignore_ascii_case("desc") {
            Ok(SortOrder::Desc)
        } else {
            Err(ParseEnumError {
                kind: "sort order",
                value: value.to_string(),
            })
        }
    }
}

/// One page of the user listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPage {
    pub offset: i64,
    pub limit: i64,
    pub sort: UserSortField,
    pub order: SortOrder,
}

impl UserPage {
    pub const DEFAULT_LIMIT: i64 = 25;
    pub const MAX_LIMIT: i64 = 100;
}

impl Default for UserPage {
    fn default() -> Self {
        UserPage {
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
            sort: UserSortField::default(),
            order: SortOrder::default(),
        }
    }
}
