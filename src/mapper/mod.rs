//! Conversion between wire DTOs and stored entities.
//!
//! Inbound DTOs keep every field optional and take enum values as strings, so
//! a missing field, an out-of-range value or an unrecognised enum name becomes
//! a field violation. A value of the wrong JSON type or a key the DTO does not
//! know fails deserialization and is answered as a malformed request. Each DTO
//! implements `validator::Validate` by hand and reports every violated
//! constraint in a single `ValidationErrors`.

pub mod task;
pub mod user;

use std::borrow::Cow;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use validator::{ValidationError, ValidationErrors};

pub use task::{task_from_dto, task_to_dto, TaskCreateDto, TaskDto, TaskPatchDto, TaskUpdateDto};
pub use user::{new_user_from_claims, UserCreateDto, UserDto, UserListQuery, UserPatchDto, UserUpdateDto};

lazy_static! {
    pub static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern compiles");
}

/// Deserializes a field that distinguishes "absent" from an explicit `null`.
///
/// Use with `#[serde(default, deserialize_with = "nullable")]`: an absent key
/// stays `None`, `null` becomes `Some(None)`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Accumulates field violations while a DTO is checked.
#[derive(Debug, Default)]
pub(crate) struct Violations {
    errors: ValidationErrors,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, code: &'static str, message: impl Into<Cow<'static, str>>) {
        let mut error = ValidationError::new(code);
        error.message = Some(message.into());
        self.errors.add(field, error);
    }

    /// Records `required` when the value is absent.
    pub fn required<'a, T>(&mut self, field: &'static str, value: Option<&'a T>) -> Option<&'a T> {
        if value.is_none() {
            self.add(field, "required", format!("{} is required", field));
        }
        value
    }

    /// Checks a character count against inclusive bounds.
    pub fn length(&mut self, field: &'static str, value: &str, min: usize, max: usize) -> bool {
        let count = value.chars().count();
        if count < min || count > max {
            let mut error = ValidationError::new("length");
            error.message = Some(Cow::Owned(if min == 0 {
                format!("{} must be at most {} characters", field, max)
            } else if max == usize::MAX {
                format!("{} must be at least {} characters", field, min)
            } else {
                format!("{} must be between {} and {} characters", field, min, max)
            }));
            error.add_param(Cow::Borrowed("min"), &min);
            if max != usize::MAX {
                error.add_param(Cow::Borrowed("max"), &max);
            }
            self.errors.add(field, error);
            return false;
        }
        true
    }

    /// A non-blank string whose trimmed form is `min..=max` characters long.
    pub fn text(&mut self, field: &'static str, value: &str, min: usize, max: usize) -> bool {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.add(field, "required", format!("{} must not be blank", field));
            return false;
        }
        self.length(field, trimmed, min, max)
    }

    pub fn email(&mut self, field: &'static str, value: &str) -> bool {
        let value = value.trim();
        if !EMAIL_REGEX.is_match(value) {
            self.add(field, "email", format!("{} must be a valid email address", field));
            return false;
        }
        self.length(field, value, 1, 100)
    }

    /// Parses a wire enum, recording `enum` on failure.
    pub fn parse<T: FromStr>(&mut self, field: &'static str, value: &str, allowed: &[&str]) -> Option<T> {
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.add(
                    field,
                    "enum",
                    format!("{} must be one of: {}", field, allowed.join(", ")),
                );
                None
            }
        }
    }

    /// Identifiers are positive.
    pub fn id(&mut self, field: &'static str, value: i64) -> bool {
        if value < 1 {
            self.add(field, "range", format!("{} must be a positive identifier", field));
            return false;
        }
        true
    }

    pub fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Sorted names of every field with at least one violation.
pub fn violated_fields(errors: &ValidationErrors) -> Vec<&'static str> {
    let mut fields: Vec<&'static str> = errors.field_errors().into_keys().collect();
    fields.sort_unstable();
    fields
}

/// Codes recorded against `field`, in insertion order.
pub fn violation_codes(errors: &ValidationErrors, field: &str) -> Vec<String> {
    errors
        .field_errors()
        .get(field)
        .map(|list| list.iter().map(|e| e.code.to_string()).collect())
        .unwrap_or_default()
}
