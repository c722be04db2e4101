use crate::config::GracePeriodPolicy;
use crate::entities::{MembershipStatus, user_membership_entity as um};
use crate::error::{AppError, AppResult};
use crate::external::PaymentProcessor;
use crate::models::{AuthenticatedUser, BillingDisposition, CancellationEffect, CancellationResult};
use crate::services::{ReconcileOutcome, SubscriptionService};
use crate::store::MembershipStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Cancellation under the grace-period contract: access runs to end_date and
/// the processor is only ever asked to stop renewing.
///
/// Active -> ActivePendingCancellation (cancelled_at set, status still active)
/// -> Expired (lazily, once end_date passes).
#[derive(Clone)]
pub struct CancellationService {
    store: Arc<dyn MembershipStore>,
    processor: Arc<dyn PaymentProcessor>,
    subscriptions: SubscriptionService,
    policy: GracePeriodPolicy,
}

impl CancellationService {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        processor: Arc<dyn PaymentProcessor>,
        subscriptions: SubscriptionService,
        policy: GracePeriodPolicy,
    ) -> Self {
        Self {
            store,
            processor,
            subscriptions,
            policy,
        }
    }

    pub async fn cancel(&self, user: &AuthenticatedUser) -> AppResult<CancellationResult> {
        self.cancel_at(user, Utc::now()).await
    }

    pub async fn cancel_at(
        &self,
        user: &AuthenticatedUser,
        now: DateTime<Utc>,
    ) -> AppResult<CancellationResult> {
        let record = self
            .store
            .latest_active_for_user(user.user_id)
            .await?
            .ok_or(AppError::NoActiveMembership)?;

        if record.is_lapsed_at(now) {
            self.store.expire_if_lapsed(record.id, now).await?;
            return Err(AppError::NoActiveMembership);
        }

        // 仅依据存储的 payment_method 判断，处理方查询结果不参与
        if !record.is_managed() {
            return self
                .finish_locally(&record, now, BillingDisposition::NotManaged)
                .await;
        }

        // 处理方不可用时直接返回可重试错误，本地不做任何修改
        let subscription = self
            .subscriptions
            .find_subscription(
                user.user_id,
                record.external_subscription_ref.as_deref(),
                user.verified_email(),
            )
            .await?;

        // 已终止且不是本记录关联的订阅视为未找到（多半是旧的历史订阅）
        let subscription = subscription.filter(|s| {
            !s.status.is_terminal()
                || record.external_subscription_ref.as_deref() == Some(s.id.as_str())
        });

        let Some(subscription) = subscription else {
            log::warn!(
                "Reconciliation gap: managed membership {} of user {} has no processor subscription (ref={:?}); cancelling locally",
                record.id,
                user.user_id,
                record.external_subscription_ref
            );
            return self
                .finish_locally(&record, now, BillingDisposition::ReconciliationGap)
                .await;
        };

        if subscription.status.is_terminal() {
            self.subscriptions
                .apply_subscription(subscription, Some(user.user_id))
                .await?;
            return Err(AppError::NoActiveMembership);
        }

        let scheduled = if subscription.cancel_at_period_end {
            subscription
        } else {
            self.processor.cancel_at_period_end(&subscription.id).await?
        };
        log::info!(
            "Subscription {} of user {} set to cancel at period end ({})",
            scheduled.id,
            user.user_id,
            scheduled.current_period_end
        );

        let synced = match self
            .subscriptions
            .apply_subscription(scheduled, Some(user.user_id))
            .await?
        {
            ReconcileOutcome::Created(m) | ReconcileOutcome::Updated(m) if m.id == record.id => m,
            _ => self
                .store
                .find_membership(record.id)
                .await?
                .unwrap_or_else(|| record.clone()),
        };

        self.store.mark_cancel_requested(record.id, now).await?;
        Ok(self.grace_period_result(
            &record,
            synced.end_date,
            BillingDisposition::ScheduledAtPeriodEnd,
        ))
    }

    async fn finish_locally(
        &self,
        record: &um::Model,
        now: DateTime<Utc>,
        billing: BillingDisposition,
    ) -> AppResult<CancellationResult> {
        if billing == BillingDisposition::NotManaged && self.policy == GracePeriodPolicy::Immediate
        {
            self.store.mark_cancelled(record.id, now).await?;
            log::info!(
                "Membership {} of user {} cancelled immediately",
                record.id,
                record.user_id
            );
            return Ok(CancellationResult {
                membership_id: record.id,
                effect: CancellationEffect::Immediate { effective_at: now },
                billing,
                already_requested: record.cancelled_at.is_some(),
                message: "Your membership has been cancelled.".to_string(),
            });
        }

        if self.store.mark_cancel_requested(record.id, now).await? {
            log::info!(
                "Cancellation requested for membership {} of user {}",
                record.id,
                record.user_id
            );
        }
        Ok(self.grace_period_result(record, record.end_date, billing))
    }

    fn grace_period_result(
        &self,
        record: &um::Model,
        access_until: DateTime<Utc>,
        billing: BillingDisposition,
    ) -> CancellationResult {
        debug_assert_eq!(record.status, MembershipStatus::Active);
        CancellationResult {
            membership_id: record.id,
            effect: CancellationEffect::GracePeriod { access_until },
            billing,
            already_requested: record.cancelled_at.is_some(),
            message: format!(
                "Your membership has been cancelled. You keep access until {}.",
                access_until.format("%B %-d, %Y")
            ),
        }
    }
}
