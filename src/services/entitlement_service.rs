use crate::entities::{MembershipStatus, user_membership_entity as um};
use crate::error::AppResult;
use crate::models::{EntitlementStatus, MembershipSummary};
use crate::store::MembershipStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Decides whether a member currently holds paid access.
#[derive(Clone)]
pub struct EntitlementService {
    store: Arc<dyn MembershipStore>,
}

impl EntitlementService {
    pub fn new(store: Arc<dyn MembershipStore>) -> Self {
        Self { store }
    }

    pub async fn has_valid_entitlement(&self, user_id: i64) -> AppResult<bool> {
        self.has_valid_entitlement_at(user_id, Utc::now()).await
    }

    /// The stored status is never trusted on its own: end_date is re-checked
    /// against `now` on every call.
    pub async fn has_valid_entitlement_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self
            .current_record_at(user_id, now)
            .await?
            .is_some_and(|record| record.grants_access_at(now)))
    }

    /// Most recent record for the user, expiring it first when it has lapsed.
    pub async fn current_record_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<um::Model>> {
        let Some(mut record) = self.store.latest_for_user(user_id).await? else {
            return Ok(None);
        };

        if record.is_lapsed_at(now) {
            // 条件更新，重复或并发执行都是安全的
            if self.store.expire_if_lapsed(record.id, now).await? {
                log::info!(
                    "Membership {} of user {} expired at {}",
                    record.id,
                    user_id,
                    record.end_date
                );
            }
            record.status = MembershipStatus::Expired;
        }

        Ok(Some(record))
    }

    pub async fn status(&self, user_id: i64) -> AppResult<EntitlementStatus> {
        self.status_at(user_id, Utc::now()).await
    }

    pub async fn status_at(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<EntitlementStatus> {
        let record = self.current_record_at(user_id, now).await?;
        let has_access = record.as_ref().is_some_and(|r| r.grants_access_at(now));

        Ok(EntitlementStatus {
            has_access,
            cancellation_requested: record.as_ref().is_some_and(|r| {
                r.status == MembershipStatus::Active && r.cancelled_at.is_some()
            }),
            access_until: record
                .as_ref()
                .filter(|_| has_access)
                .map(|r| r.end_date),
            managed: record.as_ref().is_some_and(um::Model::is_managed),
            membership: record.as_ref().map(MembershipSummary::from),
        })
    }
}
