use crate::models::MembershipSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartCheckoutRequest {
    #[schema(example = 1)]
    pub plan_id: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartCheckoutResponse {
    pub session_id: String,
    /// Stripe Checkout 会话 URL
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    Created,
    Updated,
    Unchanged,
    NoSubscription,
    Retryable,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResponse {
    pub status: ReconcileStatus,
    pub membership: Option<MembershipSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssignMembershipRequest {
    pub user_id: i64,
    pub plan_id: i64,
    #[schema(example = "cash")]
    pub payment_method: String,
    /// Defaults to now.
    pub start_date: Option<DateTime<Utc>>,
}
