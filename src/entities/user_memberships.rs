use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "membership_status")]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl std::fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipStatus::Active => write!(f, "active"),
            MembershipStatus::Expired => write!(f, "expired"),
            MembershipStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(
    rs_type = "String",
    db_type = "Enum",
    enum_name = "membership_payment_status"
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How a membership is paid for. Stored as free text in `payment_method`; the
/// column stays nullable because older rows were written without it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    ManagedSubscription,
    Cash,
    Card,
    BankTransfer,
    Staff,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::ManagedSubscription => "managed_subscription",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Staff => "staff",
            PaymentMethod::Other => "other",
        }
    }

    /// Trims and lowercases the stored value. `None` when the column is unset or blank.
    pub fn normalize(raw: Option<&str>) -> Option<String> {
        raw.map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
    }

    /// Unknown explicit values collapse to `Other` so they are never treated as managed.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        Self::normalize(raw).map(|v| match v.as_str() {
            "managed_subscription" => PaymentMethod::ManagedSubscription,
            "cash" => PaymentMethod::Cash,
            "card" => PaymentMethod::Card,
            "bank_transfer" => PaymentMethod::BankTransfer,
            "staff" => PaymentMethod::Staff,
            _ => PaymentMethod::Other,
        })
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "user_memberships")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
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
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Billed by the external processor. Decided only from the stored fields:
    /// an explicit method other than `managed_subscription` is never managed,
    /// and a bare subscription ref only counts when the method is unset.
    pub fn is_managed(&self) -> bool {
        match PaymentMethod::parse(self.payment_method.as_deref()) {
            Some(method) => method == PaymentMethod::ManagedSubscription,
            None => self
                .external_subscription_ref
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty()),
        }
    }

    pub fn grants_access_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active
            && self.payment_status == PaymentStatus::Paid
            && self.end_date > now
    }

    pub fn is_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active && self.end_date <= now
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(method: Option<&str>, ext_ref: Option<&str>) -> Model {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Model {
            id: 1,
            user_id: 7,
            plan_id: 1,
            start_date: start,
            end_date: start + Duration::days(30),
            status: MembershipStatus::Active,
            payment_status: PaymentStatus::Paid,
            payment_method: method.map(str::to_string),
            external_subscription_ref: ext_ref.map(str::to_string),
            cancelled_at: None,
            processor_synced_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_normalize_payment_method() {
        assert_eq!(
            PaymentMethod::normalize(Some("  Managed_Subscription ")),
            Some("managed_subscription".to_string())
        );
        assert_eq!(PaymentMethod::normalize(Some("   ")), None);
        assert_eq!(PaymentMethod::normalize(None), None);
        assert_eq!(PaymentMethod::parse(Some("BANK_TRANSFER")), Some(PaymentMethod::BankTransfer));
        assert_eq!(PaymentMethod::parse(Some("voucher")), Some(PaymentMethod::Other));
    }

    #[test]
    fn test_is_managed_classification() {
        assert!(record(Some("managed_subscription"), None).is_managed());
        assert!(record(Some(" MANAGED_SUBSCRIPTION"), Some("sub_1")).is_managed());
        assert!(record(None, Some("sub_1")).is_managed());
        assert!(record(Some(""), Some("sub_1")).is_managed());

        assert!(!record(None, None).is_managed());
        for explicit in ["cash", "card", "staff", "bank_transfer", "other", "voucher"] {
            assert!(
                !record(Some(explicit), Some("sub_1")).is_managed(),
                "{explicit} must never be managed"
            );
        }
    }

    #[test]
    fn test_grants_access_revalidates_end_date() {
        let rec = record(Some("cash"), None);
        assert!(rec.grants_access_at(rec.end_date - Duration::seconds(1)));
        assert!(!rec.grants_access_at(rec.end_date));
        assert!(rec.is_lapsed_at(rec.end_date));

        let mut unpaid = rec.clone();
        unpaid.payment_status = PaymentStatus::Failed;
        assert!(!unpaid.grants_access_at(rec.start_date));
    }
}
