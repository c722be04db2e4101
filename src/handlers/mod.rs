pub mod access;
pub mod admin;
pub mod entitlement;
pub mod membership;
pub mod webhook;

pub use access::access_config;
pub use admin::admin_config;
pub use entitlement::entitlement_config;
pub use membership::membership_config;
pub use webhook::webhook_config;

use crate::error::{AppError, AppResult};
use crate::models::AuthenticatedUser;
use actix_web::{HttpMessage, HttpRequest};

/// 从请求扩展中读取认证用户（由 AuthMiddleware 写入）
fn current_user(req: &HttpRequest) -> AppResult<AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))
}
