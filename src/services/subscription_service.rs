use crate::config::EndDatePolicy;
use crate::entities::{
    MembershipStatus, PaymentMethod, PaymentStatus, user_membership_entity as um,
};
use crate::error::{AppError, AppResult};
use crate::external::{
    CheckoutRequest, CheckoutSessionHandle, PaymentProcessor, ProcessorSubscription,
    ProcessorSubscriptionStatus,
};
use crate::models::{
    AssignMembershipRequest, AuthenticatedUser, MembershipSummary, ReconcileResponse,
    ReconcileStatus,
};
use crate::services::EntitlementService;
use crate::store::{MembershipStore, NewMembership, ProcessorState};
use crate::utils::compute_end_date;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use stripe::Event;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Created(um::Model),
    Updated(um::Model),
    /// Nothing written: the observation was stale, a duplicate, or could not be placed.
    Unchanged(Option<um::Model>),
    NoSubscription,
    /// The processor could not be reached; try again later.
    Retryable(String),
}

impl From<ReconcileOutcome> for ReconcileResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        let (status, membership, message) = match outcome {
            ReconcileOutcome::Created(m) => (ReconcileStatus::Created, Some(m), None),
            ReconcileOutcome::Updated(m) => (ReconcileStatus::Updated, Some(m), None),
            ReconcileOutcome::Unchanged(m) => (ReconcileStatus::Unchanged, m, None),
            ReconcileOutcome::NoSubscription => (ReconcileStatus::NoSubscription, None, None),
            ReconcileOutcome::Retryable(msg) => (ReconcileStatus::Retryable, None, Some(msg)),
        };
        Self {
            status,
            membership: membership.map(MembershipSummary::from),
            message,
        }
    }
}

/// Processor subscription status -> local (status, payment_status).
/// `None` keeps whatever payment status the record already has.
fn map_status(status: ProcessorSubscriptionStatus) -> (MembershipStatus, Option<PaymentStatus>) {
    use ProcessorSubscriptionStatus::*;
    match status {
        Active | Trialing => (MembershipStatus::Active, Some(PaymentStatus::Paid)),
        PastDue | Unpaid => (MembershipStatus::Active, Some(PaymentStatus::Failed)),
        Incomplete | Paused => (MembershipStatus::Active, Some(PaymentStatus::Pending)),
        Canceled | IncompleteExpired => (MembershipStatus::Expired, None),
    }
}

/// Keeps local records in step with the billing processor. Every path
/// (polling, webhooks, cancellation) funnels through `apply_subscription`.
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn MembershipStore>,
    processor: Arc<dyn PaymentProcessor>,
    entitlement: EntitlementService,
    end_date_policy: EndDatePolicy,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        processor: Arc<dyn PaymentProcessor>,
        entitlement: EntitlementService,
        end_date_policy: EndDatePolicy,
    ) -> Self {
        Self {
            store,
            processor,
            entitlement,
            end_date_policy,
        }
    }

    /// Opens a hosted checkout for `plan_id`. Nothing is written locally: the
    /// record appears once the processor confirms the subscription.
    pub async fn start_checkout(
        &self,
        user: &AuthenticatedUser,
        plan_id: i64,
    ) -> AppResult<CheckoutSessionHandle> {
        let email = user.verified_email().ok_or_else(|| {
            AppError::ValidationError("A verified email is required to subscribe".to_string())
        })?;

        if self.entitlement.has_valid_entitlement(user.user_id).await? {
            return Err(AppError::DuplicateActiveMembership);
        }

        let plan = self
            .store
            .find_plan(plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Membership plan not found".to_string()))?;
        if plan.price <= 0 || plan.duration_days <= 0 {
            return Err(AppError::ValidationError(
                "Membership plan is not purchasable".to_string(),
            ));
        }

        let customers = self.processor.list_customers_by_email(email).await?;
        if customers.len() > 1 {
            log::warn!(
                "Multiple processor customers share the email of user {}; using the first",
                user.user_id
            );
        }
        let customer_id = match customers.into_iter().next() {
            Some(c) => c.id,
            None => self.processor.create_customer(email, user.user_id).await?.id,
        };

        let session = self
            .processor
            .create_checkout_session(CheckoutRequest {
                customer_id,
                user_id: user.user_id,
                plan_id: plan.id,
                plan_name: plan.name,
                unit_amount: plan.price,
                interval_days: plan.duration_days,
            })
            .await?;

        log::info!(
            "Checkout session {} opened for user {} plan {}",
            session.id,
            user.user_id,
            plan_id
        );
        Ok(session)
    }

    /// Polling fallback for missed webhooks. Processor failures never fail the
    /// call; they come back as `Retryable`.
    pub async fn reconcile(&self, user_id: i64, email: Option<&str>) -> AppResult<ReconcileOutcome> {
        let stored_ref = self
            .store
            .latest_for_user(user_id)
            .await?
            .and_then(|r| r.external_subscription_ref);

        match self
            .find_subscription(user_id, stored_ref.as_deref(), email)
            .await
        {
            Ok(Some(sub)) => self.apply_subscription(sub, Some(user_id)).await,
            Ok(None) => Ok(ReconcileOutcome::NoSubscription),
            Err(AppError::Processor(e)) => {
                log::warn!("Reconcile for user {user_id} deferred: {e}");
                Ok(ReconcileOutcome::Retryable(e.message))
            }
            Err(e) => Err(e),
        }
    }

    /// Looks the user's subscription up by the stored ref first, then by the
    /// customers registered under the verified email.
    pub async fn find_subscription(
        &self,
        user_id: i64,
        subscription_ref: Option<&str>,
        email: Option<&str>,
    ) -> AppResult<Option<ProcessorSubscription>> {
        if let Some(sub_ref) = subscription_ref.map(str::trim).filter(|r| !r.is_empty()) {
            match self.processor.retrieve_subscription(sub_ref).await {
                Ok(sub) => return Ok(Some(sub)),
                Err(e) if e.is_not_found() => {
                    log::warn!(
                        "Stored subscription {sub_ref} of user {user_id} not found at processor; falling back to email lookup"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        let Some(email) = email else {
            return Ok(None);
        };

        let mut candidates = Vec::new();
        for customer in self.processor.list_customers_by_email(email).await? {
            let subs = self
                .processor
                .list_subscriptions_by_customer(&customer.id)
                .await?;
            candidates.extend(subs.into_iter().filter(|s| {
                s.metadata_user_id().is_none_or(|owner| owner == user_id)
            }));
        }

        let live = candidates
            .iter()
            .filter(|s| !s.status.is_terminal())
            .count();
        if live > 1 {
            log::warn!("User {user_id} has {live} live subscriptions at the processor; using the latest");
        }

        // 优先未终止的订阅，其次账期结束时间最晚的
        Ok(candidates
            .into_iter()
            .max_by_key(|s| (!s.status.is_terminal(), s.current_period_end)))
    }

    /// Upserts the local record for `sub`. Writes are conditional on the
    /// observation being newer than the last one applied, so webhook
    /// redelivery and out-of-order events are harmless.
    pub async fn apply_subscription(
        &self,
        sub: ProcessorSubscription,
        fallback_user_id: Option<i64>,
    ) -> AppResult<ReconcileOutcome> {
        if let Some(existing) = self.store.find_by_subscription_ref(&sub.id).await? {
            return self.apply_to_record(existing, &sub).await;
        }

        let Some(user_id) = sub.metadata_user_id().or(fallback_user_id) else {
            log::warn!("Subscription {} carries no user_id; cannot place it", sub.id);
            return Ok(ReconcileOutcome::NoSubscription);
        };

        // 先清理已过期但仍标记为 active 的记录，避免唯一索引冲突
        self.entitlement
            .has_valid_entitlement_at(user_id, sub.observed_at)
            .await?;

        if let Some(active) = self.store.latest_active_for_user(user_id).await?
            && active.is_managed()
            && active.external_subscription_ref.is_none()
            && !sub.status.is_terminal()
        {
            log::info!("Linking subscription {} to membership {}", sub.id, active.id);
            return self.apply_to_record(active, &sub).await;
        }

        if sub.status.is_terminal() {
            log::info!("Ignoring terminal subscription {} with no local record", sub.id);
            return Ok(ReconcileOutcome::Unchanged(None));
        }

        let Some(plan_id) = sub.metadata_plan_id() else {
            log::warn!("Subscription {} carries no plan_id; cannot create membership", sub.id);
            return Ok(ReconcileOutcome::NoSubscription);
        };

        let (status, payment_status) = map_status(sub.status);
        let end_date = if sub.current_period_end > sub.current_period_start {
            sub.current_period_end
        } else {
            let plan = self
                .store
                .find_plan(plan_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Membership plan not found".to_string()))?;
            compute_end_date(sub.current_period_start, plan.duration_days, self.end_date_policy)?
        };

        let insert = self
            .store
            .insert_membership(NewMembership {
                user_id,
                plan_id,
                start_date: sub.current_period_start,
                end_date,
                status,
                payment_status: payment_status.unwrap_or(PaymentStatus::Pending),
                payment_method: Some(PaymentMethod::ManagedSubscription.as_str().to_string()),
                external_subscription_ref: Some(sub.id.clone()),
                cancelled_at: sub.cancel_at_period_end.then_some(sub.observed_at),
                processor_synced_at: Some(sub.observed_at),
            })
            .await;

        match insert {
            Ok(record) => {
                log::info!(
                    "Created membership {} for user {} from subscription {}",
                    record.id,
                    user_id,
                    sub.id
                );
                Ok(ReconcileOutcome::Created(record))
            }
            Err(AppError::DuplicateActiveMembership | AppError::ValidationError(_)) => {
                // 并发写入：另一个请求已经创建了记录
                match self.store.find_by_subscription_ref(&sub.id).await? {
                    Some(existing) => self.apply_to_record(existing, &sub).await,
                    None => {
                        log::warn!(
                            "Reconciliation gap: user {} already holds an active membership; subscription {} not linked",
                            user_id,
                            sub.id
                        );
                        Ok(ReconcileOutcome::Unchanged(None))
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_to_record(
        &self,
        existing: um::Model,
        sub: &ProcessorSubscription,
    ) -> AppResult<ReconcileOutcome> {
        // 账期在本记录开始前就已结束的终止订阅不能再作用于该记录
        if sub.status.is_terminal() && existing.start_date >= sub.current_period_end {
            log::warn!(
                "Ignoring terminal subscription {} (period ended {}) for membership {} starting {}",
                sub.id,
                sub.current_period_end,
                existing.id,
                existing.start_date
            );
            return Ok(ReconcileOutcome::Unchanged(Some(existing)));
        }

        let (status, payment_status) = map_status(sub.status);
        let state = ProcessorState {
            external_subscription_ref: sub.id.clone(),
            status,
            payment_status: payment_status.unwrap_or(existing.payment_status),
            end_date: sub.current_period_end.max(existing.start_date),
            cancelled_at: if sub.cancel_at_period_end {
                existing.cancelled_at.or(Some(sub.observed_at))
            } else {
                None
            },
            observed_at: sub.observed_at,
        };

        match self.store.apply_processor_state(existing.id, state).await {
            Ok(true) => {
                let updated = self
                    .store
                    .find_membership(existing.id)
                    .await?
                    .unwrap_or(existing);
                log::info!(
                    "Membership {} synced from subscription {} ({:?})",
                    updated.id,
                    sub.id,
                    sub.status
                );
                Ok(ReconcileOutcome::Updated(updated))
            }
            Ok(false) => Ok(ReconcileOutcome::Unchanged(Some(existing))),
            Err(AppError::DuplicateActiveMembership) => {
                log::warn!(
                    "Reconciliation gap: subscription {} would reactivate membership {} while another is active",
                    sub.id,
                    existing.id
                );
                Ok(ReconcileOutcome::Unchanged(Some(existing)))
            }
            Err(e) => Err(e),
        }
    }

    /// Re-fetches the subscription so the applied state is always the current one.
    pub async fn sync_subscription(
        &self,
        subscription_id: &str,
        fallback_user_id: Option<i64>,
    ) -> AppResult<ReconcileOutcome> {
        let sub = self.processor.retrieve_subscription(subscription_id).await?;
        self.apply_subscription(sub, fallback_user_id).await
    }

    pub async fn handle_webhook_event(&self, event: Event) -> AppResult<ReconcileOutcome> {
        let payload = serde_json::to_value(&event)?;
        self.handle_webhook_payload(&payload).await
    }

    /// Dispatches a verified event given as its JSON body.
    pub async fn handle_webhook_payload(
        &self,
        payload: &serde_json::Value,
    ) -> AppResult<ReconcileOutcome> {
        let event_type = payload["type"].as_str().unwrap_or_default();
        match subscription_ref_from_payload(payload) {
            Some((sub_id, fallback_user_id)) => {
                log::info!("Webhook {event_type} -> syncing subscription {sub_id}");
                self.sync_subscription(&sub_id, fallback_user_id).await
            }
            None => {
                log::info!("Unhandled event type: {event_type}");
                Ok(ReconcileOutcome::Unchanged(None))
            }
        }
    }

    /// Admin assignment of memberships paid outside the processor.
    pub async fn assign_membership(
        &self,
        admin: &AuthenticatedUser,
        request: AssignMembershipRequest,
    ) -> AppResult<um::Model> {
        if !admin.is_admin {
            return Err(AppError::PermissionDenied);
        }

        let method = PaymentMethod::normalize(Some(request.payment_method.as_str()))
            .ok_or_else(|| AppError::ValidationError("payment_method is required".to_string()))?;
        if PaymentMethod::parse(Some(method.as_str())) == Some(PaymentMethod::ManagedSubscription) {
            return Err(AppError::ValidationError(
                "Managed subscriptions are created by the billing processor".to_string(),
            ));
        }

        let plan = self
            .store
            .find_plan(request.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Membership plan not found".to_string()))?;

        let now = Utc::now();
        let start: DateTime<Utc> = request.start_date.unwrap_or(now);
        let end = compute_end_date(start, plan.duration_days, self.end_date_policy)?;

        self.entitlement
            .has_valid_entitlement_at(request.user_id, now)
            .await?;

        let record = self
            .store
            .insert_membership(NewMembership {
                user_id: request.user_id,
                plan_id: plan.id,
                start_date: start,
                end_date: end,
                status: MembershipStatus::Active,
                payment_status: PaymentStatus::Paid,
                payment_method: Some(method),
                external_subscription_ref: None,
                cancelled_at: None,
                processor_synced_at: None,
            })
            .await?;

        log::info!(
            "Admin {} assigned membership {} (plan {}) to user {}",
            admin.user_id,
            record.id,
            plan.id,
            request.user_id
        );
        Ok(record)
    }
}

/// `subscription` may arrive as a bare id or an expanded object.
fn subscription_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
        serde_json::Value::Object(obj) => obj.get("id")?.as_str().map(str::to_string),
        _ => None,
    }
}

/// Subscription id referenced by a webhook event, plus the user id the event
/// itself carries (checkout sessions only).
pub fn subscription_ref_from_payload(payload: &serde_json::Value) -> Option<(String, Option<i64>)> {
    let object = &payload["data"]["object"];
    match payload["type"].as_str()? {
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            Some((object["id"].as_str()?.to_string(), None))
        }
        "invoice.payment_succeeded" | "invoice.payment_failed" => {
            subscription_id(&object["subscription"]).map(|id| (id, None))
        }
        "checkout.session.completed" => {
            let user_id = object["client_reference_id"]
                .as_str()
                .and_then(|v| v.parse().ok());
            subscription_id(&object["subscription"]).map(|id| (id, user_id))
        }
        _ => None,
    }
}
