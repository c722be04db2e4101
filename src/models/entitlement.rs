use crate::entities::{MembershipStatus, PaymentStatus, user_membership_entity as um};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct MembershipSummary {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: MembershipStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub managed: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<&um::Model> for MembershipSummary {
    fn from(m: &um::Model) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            plan_id: m.plan_id,
            start_date: m.start_date,
            end_date: m.end_date,
            status: m.status,
            payment_status: m.payment_status,
            payment_method: m.payment_method.clone(),
            managed: m.is_managed(),
            cancelled_at: m.cancelled_at,
        }
    }
}

impl From<um::Model> for MembershipSummary {
    fn from(m: um::Model) -> Self {
        Self::from(&m)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct EntitlementStatus {
    pub has_access: bool,
    pub membership: Option<MembershipSummary>,
    /// Authoritative: derived from the stored cancelled_at, never from client state.
    pub cancellation_requested: bool,
    pub access_until: Option<DateTime<Utc>>,
    pub managed: bool,
}

/// What happened on the billing side of a cancellation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingDisposition {
    NotManaged,
    ScheduledAtPeriodEnd,
    /// Managed record with no matching processor subscription; only the local row changed.
    ReconciliationGap,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CancellationEffect {
    GracePeriod { access_until: DateTime<Utc> },
    Immediate { effective_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct CancellationResult {
    pub membership_id: i64,
    pub effect: CancellationEffect,
    pub billing: BillingDisposition,
    /// True when an earlier request had already been recorded.
    pub already_requested: bool,
    pub message: String,
}
