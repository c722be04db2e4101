//! In-memory store for service tests. Mirrors the partial unique indexes and
//! the conditional writes of the PostgreSQL store.

use super::{CheckInStore, MembershipStore, NewMembership, ProcessorState, RateLimitStore};
use crate::entities::{
    MembershipStatus, check_in_entity as ci, membership_plan_entity as plans,
    rate_limit_counter_entity as rlc, user_membership_entity as um,
};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    plans: Vec<plans::Model>,
    memberships: Vec<um::Model>,
    check_ins: Vec<ci::Model>,
    counters: HashMap<String, rlc::Model>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plan(&self, name: &str, price: i64, duration_days: i32) -> plans::Model {
        let mut state = self.state.lock().unwrap();
        let plan = plans::Model {
            id: state.next_id(),
            name: name.to_string(),
            price,
            duration_days,
            access_level: "standard".to_string(),
            created_at: None,
        };
        state.plans.push(plan.clone());
        plan
    }

    pub fn counter_keys(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<String> = state.counters.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Inserts a row as-is, bypassing constraint checks. Used to seed legacy data.
    pub fn seed_membership(&self, membership: NewMembership) -> um::Model {
        let mut state = self.state.lock().unwrap();
        let record = to_model(state.next_id(), membership);
        state.memberships.push(record.clone());
        record
    }

    pub fn membership(&self, id: i64) -> Option<um::Model> {
        let state = self.state.lock().unwrap();
        state.memberships.iter().find(|m| m.id == id).cloned()
    }

    pub fn memberships_for(&self, user_id: i64) -> Vec<um::Model> {
        let state = self.state.lock().unwrap();
        state
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn sessions_for(&self, user_id: i64) -> Vec<ci::Model> {
        let state = self.state.lock().unwrap();
        state
            .check_ins
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }
}

fn to_model(id: i64, m: NewMembership) -> um::Model {
    um::Model {
        id,
        user_id: m.user_id,
        plan_id: m.plan_id,
        start_date: m.start_date,
        end_date: m.end_date,
        status: m.status,
        payment_status: m.payment_status,
        payment_method: m.payment_method,
        external_subscription_ref: m.external_subscription_ref,
        cancelled_at: m.cancelled_at,
        processor_synced_at: m.processor_synced_at,
        created_at: None,
        updated_at: None,
    }
}

fn latest<'a>(records: impl Iterator<Item = &'a um::Model>) -> Option<um::Model> {
    records
        .max_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)))
        .cloned()
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn find_plan(&self, plan_id: i64) -> AppResult<Option<plans::Model>> {
        let state = self.state.lock().unwrap();
        Ok(state.plans.iter().find(|p| p.id == plan_id).cloned())
    }

    async fn latest_for_user(&self, user_id: i64) -> AppResult<Option<um::Model>> {
        let state = self.state.lock().unwrap();
        Ok(latest(state.memberships.iter().filter(|m| m.user_id == user_id)))
    }

    async fn latest_active_for_user(&self, user_id: i64) -> AppResult<Option<um::Model>> {
        let state = self.state.lock().unwrap();
        Ok(latest(state.memberships.iter().filter(|m| {
            m.user_id == user_id && m.status == MembershipStatus::Active
        })))
    }

    async fn find_by_subscription_ref(&self, subscription_ref: &str) -> AppResult<Option<um::Model>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .memberships
            .iter()
            .find(|m| m.external_subscription_ref.as_deref() == Some(subscription_ref))
            .cloned())
    }

    async fn find_membership(&self, id: i64) -> AppResult<Option<um::Model>> {
        Ok(self.membership(id))
    }

    async fn insert_membership(&self, membership: NewMembership) -> AppResult<um::Model> {
        if membership.end_date < membership.start_date {
            return Err(AppError::ValidationError(
                "end_date must not be before start_date".to_string(),
            ));
        }
        let mut state = self.state.lock().unwrap();
        if membership.status == MembershipStatus::Active
            && state
                .memberships
                .iter()
                .any(|m| m.user_id == membership.user_id && m.status == MembershipStatus::Active)
        {
            return Err(AppError::DuplicateActiveMembership);
        }
        if let Some(r) = membership.external_subscription_ref.as_deref()
            && state
                .memberships
                .iter()
                .any(|m| m.external_subscription_ref.as_deref() == Some(r))
        {
            return Err(AppError::ValidationError(
                "Subscription is already linked to another membership".to_string(),
            ));
        }
        let record = to_model(state.next_id(), membership);
        state.memberships.push(record.clone());
        Ok(record)
    }

    async fn expire_if_lapsed(&self, id: i64, now: DateTime<Utc>) -> AppResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.memberships.iter_mut().find(|m| m.id == id) {
            Some(m) if m.status == MembershipStatus::Active && m.end_date <= now => {
                m.status = MembershipStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_cancel_requested(&self, id: i64, at: DateTime<Utc>) -> AppResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.memberships.iter_mut().find(|m| m.id == id) {
            Some(m) if m.status == MembershipStatus::Active && m.cancelled_at.is_none() => {
                m.cancelled_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_cancelled(&self, id: i64, at: DateTime<Utc>) -> AppResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.memberships.iter_mut().find(|m| m.id == id) {
            Some(m) if m.status == MembershipStatus::Active => {
                m.status = MembershipStatus::Cancelled;
                m.cancelled_at = m.cancelled_at.or(Some(at));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_processor_state(&self, id: i64, state_in: ProcessorState) -> AppResult<bool> {
        let mut state = self.state.lock().unwrap();
        let ref_taken = state.memberships.iter().any(|m| {
            m.id != id
                && m.external_subscription_ref.as_deref()
                    == Some(state_in.external_subscription_ref.as_str())
        });
        let Some(m) = state.memberships.iter_mut().find(|m| m.id == id) else {
            return Ok(false);
        };
        let fresh = m.processor_synced_at.is_none_or(|t| t < state_in.observed_at);
        let linkable = m.external_subscription_ref.is_none()
            || m.external_subscription_ref.as_deref()
                == Some(state_in.external_subscription_ref.as_str());
        if !fresh || !linkable {
            return Ok(false);
        }
        if ref_taken {
            return Err(AppError::ValidationError(
                "Subscription is already linked to another membership".to_string(),
            ));
        }
        m.status = state_in.status;
        m.payment_status = state_in.payment_status;
        m.end_date = state_in.end_date;
        m.cancelled_at = state_in.cancelled_at;
        m.external_subscription_ref = Some(state_in.external_subscription_ref);
        m.processor_synced_at = Some(state_in.observed_at);
        Ok(true)
    }
}

#[async_trait]
impl CheckInStore for MemoryStore {
    async fn open_session(&self, user_id: i64) -> AppResult<Option<ci::Model>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .check_ins
            .iter()
            .filter(|s| s.user_id == user_id && s.is_open())
            .max_by_key(|s| (s.check_in_time, s.id))
            .cloned())
    }

    async fn insert_open_session(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
        location: Option<String>,
    ) -> AppResult<ci::Model> {
        let mut state = self.state.lock().unwrap();
        if state
            .check_ins
            .iter()
            .any(|s| s.user_id == user_id && s.is_open())
        {
            return Err(AppError::DuplicateSession);
        }
        let session = ci::Model {
            id: state.next_id(),
            user_id,
            check_in_time: at,
            check_out_time: None,
            location,
        };
        state.check_ins.push(session.clone());
        Ok(session)
    }

    async fn close_latest_open(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Option<ci::Model>> {
        let mut state = self.state.lock().unwrap();
        let session = state
            .check_ins
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.is_open())
            .max_by_key(|s| (s.check_in_time, s.id));
        Ok(session.map(|s| {
            s.check_out_time = Some(at);
            s.clone()
        }))
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(&self, key: &str, window_secs: i64, now: DateTime<Utc>) -> AppResult<rlc::Model> {
        let mut state = self.state.lock().unwrap();
        let fresh = rlc::Model {
            key: key.to_string(),
            count: 1,
            window_started_at: now,
            expires_at: now + Duration::seconds(window_secs),
        };
        let counter = state
            .counters
            .entry(key.to_string())
            .and_modify(|c| {
                if c.expires_at <= now {
                    *c = fresh.clone();
                } else {
                    c.count += 1;
                }
            })
            .or_insert_with(|| fresh.clone());
        Ok(counter.clone())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.counters.len();
        state.counters.retain(|_, c| c.expires_at > now);
        Ok((before - state.counters.len()) as u64)
    }
}
