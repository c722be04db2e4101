//! Persistence seam between the services and PostgreSQL.
//!
//! Every write that has to be race-safe is expressed here as a single
//! conditional statement or a constraint-backed insert, so the services never
//! need read-modify-write cycles of their own.

pub mod sea_orm_store;

#[cfg(test)]
pub mod memory;

pub use sea_orm_store::SeaOrmStore;

use crate::entities::{
    MembershipStatus, PaymentStatus, check_in_entity, membership_plan_entity,
    rate_limit_counter_entity, user_membership_entity,
};
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct NewMembership {
    pub user_id: i64,
    pub plan_id: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: MembershipStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub external_subscription_ref: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub processor_synced_at: Option<DateTime<Utc>>,
}

/// A processor observation translated into record columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorState {
    pub external_subscription_ref: String,
    pub status: MembershipStatus,
    pub payment_status: PaymentStatus,
    pub end_date: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn find_plan(&self, plan_id: i64) -> AppResult<Option<membership_plan_entity::Model>>;

    /// Most recent record by start_date, ties broken by id.
    async fn latest_for_user(&self, user_id: i64)
    -> AppResult<Option<user_membership_entity::Model>>;

    async fn latest_active_for_user(
        &self,
        user_id: i64,
    ) -> AppResult<Option<user_membership_entity::Model>>;

    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> AppResult<Option<user_membership_entity::Model>>;

    async fn find_membership(&self, id: i64) -> AppResult<Option<user_membership_entity::Model>>;

    /// Fails with `DuplicateActiveMembership` when the user already has an active row.
    async fn insert_membership(
        &self,
        membership: NewMembership,
    ) -> AppResult<user_membership_entity::Model>;

    /// `active` -> `expired` only while the row is still active and past its end date.
    async fn expire_if_lapsed(&self, id: i64, now: DateTime<Utc>) -> AppResult<bool>;

    /// Sets cancelled_at once. Status is left untouched.
    async fn mark_cancel_requested(&self, id: i64, at: DateTime<Utc>) -> AppResult<bool>;

    /// Flips an active row to cancelled right away.
    async fn mark_cancelled(&self, id: i64, at: DateTime<Utc>) -> AppResult<bool>;

    /// Applies the observation unless a newer one was already applied. Also
    /// links `external_subscription_ref` when the row has none yet.
    async fn apply_processor_state(&self, id: i64, state: ProcessorState) -> AppResult<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckInStore: Send + Sync {
    async fn open_session(&self, user_id: i64) -> AppResult<Option<check_in_entity::Model>>;

    /// Fails with `DuplicateSession` when an open session already exists.
    async fn insert_open_session(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
        location: Option<String>,
    ) -> AppResult<check_in_entity::Model>;

    /// Closes the most recent open session. `None` when nothing was open.
    async fn close_latest_open(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Option<check_in_entity::Model>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically counts one hit against `key`, opening a new window when the
    /// previous one has expired.
    async fn hit(
        &self,
        key: &str,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> AppResult<rate_limit_counter_entity::Model>;

    /// Deletes counters whose window ended at or before `now`. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;
}
