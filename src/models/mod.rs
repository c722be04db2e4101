pub mod access;
pub mod auth;
pub mod common;
pub mod entitlement;
pub mod membership;

pub use access::*;
pub use auth::*;
pub use common::*;
pub use entitlement::*;
pub use membership::*;
