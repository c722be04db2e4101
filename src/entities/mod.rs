pub mod check_ins;
pub mod membership_plans;
pub mod rate_limit_counters;
pub mod user_memberships;

pub use check_ins as check_in_entity;
pub use membership_plans as membership_plan_entity;
pub use rate_limit_counters as rate_limit_counter_entity;
pub use user_memberships as user_membership_entity;

pub use user_memberships::{MembershipStatus, PaymentMethod, PaymentStatus};
