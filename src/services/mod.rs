pub mod access_service;
pub mod cancellation_service;
pub mod entitlement_service;
pub mod rate_limit_service;
pub mod subscription_service;

pub use access_service::*;
pub use cancellation_service::*;
pub use entitlement_service::*;
pub use rate_limit_service::*;
pub use subscription_service::*;
