use serde::{Deserialize, Serialize};

/// Identity resolved from the bearer token by `AuthMiddleware`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    /// Only present when the identity provider marked the address as verified.
    pub email: Option<String>,
    pub is_admin: bool,
}

impl AuthenticatedUser {
    pub fn verified_email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }
}
