pub mod dates;
pub mod geo;
pub mod jwt;
pub mod qr_token;
pub mod retry;

pub use dates::compute_end_date;
pub use geo::*;
pub use jwt::*;
pub use qr_token::*;
pub use retry::{RetryPolicy, retry_with_backoff};
