pub mod extractors;
pub mod middleware;
pub mod password;
pub mod principal;
pub mod stage;
pub mod token;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::mapper::Violations;

// Re-export necessary items
pub use extractors::CurrentPrincipal;
pub use middleware::AuthMiddleware;
pub use principal::{Principal, PrincipalResolver, ProvisioningPolicy};
pub use stage::RequestStage;
pub use token::{bearer_token, Claims, TokenIssuer, TokenValidator};

/// Represents the payload for a user login request.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut violations = Violations::new();
        if let Some(email) = violations.required("email", self.email.as_ref()) {
            violations.email("email", email);
        }
        violations.required("password", self.password.as_ref());
        violations.finish()
    }
}

/// Response structure after successful authentication.
/// Contains the JWT access token and the ID of the authenticated user.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    /// The JWT (JSON Web Token) for bearer authentication.
    pub token: String,
    /// The identifier of the authenticated user.
    pub user_id: i64,
}
