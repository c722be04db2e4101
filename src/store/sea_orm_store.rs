use super::{CheckInStore, MembershipStore, NewMembership, ProcessorState, RateLimitStore};
use crate::entities::{
    MembershipStatus, check_in_entity as ci, membership_plan_entity as plans,
    rate_limit_counter_entity as rlc, user_membership_entity as um,
};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseBackend,
    DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    Statement, TransactionTrait,
};

const SUBSCRIPTION_REF_INDEX: &str = "ux_user_memberships_subscription_ref";

#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn unique_violation(err: &DbErr) -> Option<String> {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => Some(msg),
        _ => None,
    }
}

fn map_membership_write_error(err: DbErr) -> AppError {
    match unique_violation(&err) {
        Some(msg) if msg.contains(SUBSCRIPTION_REF_INDEX) => AppError::ValidationError(
            "Subscription is already linked to another membership".to_string(),
        ),
        Some(_) => AppError::DuplicateActiveMembership,
        None => err.into(),
    }
}

// 同一用户的签到/签退串行化，事务结束自动释放
async fn lock_user<C: ConnectionTrait>(conn: &C, user_id: i64) -> Result<(), DbErr> {
    conn.execute(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        "SELECT pg_advisory_xact_lock($1)",
        [user_id.into()],
    ))
    .await?;
    Ok(())
}

#[async_trait]
impl MembershipStore for SeaOrmStore {
    async fn find_plan(&self, plan_id: i64) -> AppResult<Option<plans::Model>> {
        Ok(plans::Entity::find_by_id(plan_id).one(&self.db).await?)
    }

    async fn latest_for_user(&self, user_id: i64) -> AppResult<Option<um::Model>> {
        let record = um::Entity::find()
            .filter(um::Column::UserId.eq(user_id))
            .order_by_desc(um::Column::StartDate)
            .order_by_desc(um::Column::Id)
            .one(&self.db)
            .await?;
        Ok(record)
    }

    async fn latest_active_for_user(&self, user_id: i64) -> AppResult<Option<um::Model>> {
        let record = um::Entity::find()
            .filter(um::Column::UserId.eq(user_id))
            .filter(um::Column::Status.eq(MembershipStatus::Active))
            .order_by_desc(um::Column::StartDate)
            .order_by_desc(um::Column::Id)
            .one(&self.db)
            .await?;
        Ok(record)
    }

    async fn find_by_subscription_ref(&self, subscription_ref: &str) -> AppResult<Option<um::Model>> {
        let record = um::Entity::find()
            .filter(um::Column::ExternalSubscriptionRef.eq(subscription_ref))
            .one(&self.db)
            .await?;
        Ok(record)
    }

    async fn find_membership(&self, id: i64) -> AppResult<Option<um::Model>> {
        Ok(um::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn insert_membership(&self, membership: NewMembership) -> AppResult<um::Model> {
        if membership.end_date < membership.start_date {
            return Err(AppError::ValidationError(
                "end_date must not be before start_date".to_string(),
            ));
        }
        let now = Utc::now();
        um::ActiveModel {
            user_id: Set(membership.user_id),
            plan_id: Set(membership.plan_id),
            start_date: Set(membership.start_date),
            end_date: Set(membership.end_date),
            status: Set(membership.status),
            payment_status: Set(membership.payment_status),
            payment_method: Set(membership.payment_method),
            external_subscription_ref: Set(membership.external_subscription_ref),
            cancelled_at: Set(membership.cancelled_at),
            processor_synced_at: Set(membership.processor_synced_at),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(map_membership_write_error)
    }

    async fn expire_if_lapsed(&self, id: i64, now: DateTime<Utc>) -> AppResult<bool> {
        let res = um::Entity::update_many()
            .set(um::ActiveModel {
                status: Set(MembershipStatus::Expired),
                updated_at: Set(Some(now)),
                ..Default::default()
            })
            .filter(um::Column::Id.eq(id))
            .filter(um::Column::Status.eq(MembershipStatus::Active))
            .filter(um::Column::EndDate.lte(now))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn mark_cancel_requested(&self, id: i64, at: DateTime<Utc>) -> AppResult<bool> {
        let res = um::Entity::update_many()
            .set(um::ActiveModel {
                cancelled_at: Set(Some(at)),
                updated_at: Set(Some(at)),
                ..Default::default()
            })
            .filter(um::Column::Id.eq(id))
            .filter(um::Column::Status.eq(MembershipStatus::Active))
            .filter(um::Column::CancelledAt.is_null())
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn mark_cancelled(&self, id: i64, at: DateTime<Utc>) -> AppResult<bool> {
        let res = um::Entity::update_many()
            .set(um::ActiveModel {
                status: Set(MembershipStatus::Cancelled),
                updated_at: Set(Some(at)),
                ..Default::default()
            })
            // 保留首次取消时间
            .col_expr(
                um::Column::CancelledAt,
                Func::coalesce([
                    SimpleExpr::from(Expr::col(um::Column::CancelledAt)),
                    Expr::val(at).into(),
                ])
                .into(),
            )
            .filter(um::Column::Id.eq(id))
            .filter(um::Column::Status.eq(MembershipStatus::Active))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn apply_processor_state(&self, id: i64, state: ProcessorState) -> AppResult<bool> {
        let res = um::Entity::update_many()
            .set(um::ActiveModel {
                status: Set(state.status),
                payment_status: Set(state.payment_status),
                end_date: Set(state.end_date),
                cancelled_at: Set(state.cancelled_at),
                external_subscription_ref: Set(Some(state.external_subscription_ref.clone())),
                processor_synced_at: Set(Some(state.observed_at)),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(um::Column::Id.eq(id))
            .filter(
                Condition::any()
                    .add(um::Column::ProcessorSyncedAt.is_null())
                    .add(um::Column::ProcessorSyncedAt.lt(state.observed_at)),
            )
            .filter(
                Condition::any()
                    .add(um::Column::ExternalSubscriptionRef.is_null())
                    .add(um::Column::ExternalSubscriptionRef.eq(state.external_subscription_ref)),
            )
            .exec(&self.db)
            .await
            .map_err(map_membership_write_error)?;
        Ok(res.rows_affected > 0)
    }
}

#[async_trait]
impl CheckInStore for SeaOrmStore {
    async fn open_session(&self, user_id: i64) -> AppResult<Option<ci::Model>> {
        let session = ci::Entity::find()
            .filter(ci::Column::UserId.eq(user_id))
            .filter(ci::Column::CheckOutTime.is_null())
            .order_by_desc(ci::Column::CheckInTime)
            .one(&self.db)
            .await?;
        Ok(session)
    }

    async fn insert_open_session(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
        location: Option<String>,
    ) -> AppResult<ci::Model> {
        let txn = self.db.begin().await?;
        lock_user(&txn, user_id).await?;

        let open = ci::Entity::find()
            .filter(ci::Column::UserId.eq(user_id))
            .filter(ci::Column::CheckOutTime.is_null())
            .one(&txn)
            .await?;
        if open.is_some() {
            return Err(AppError::DuplicateSession);
        }

        let session = ci::ActiveModel {
            user_id: Set(user_id),
            check_in_time: Set(at),
            check_out_time: Set(None),
            location: Set(location),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => AppError::DuplicateSession,
            None => e.into(),
        })?;

        txn.commit().await?;
        Ok(session)
    }

    async fn close_latest_open(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Option<ci::Model>> {
        let txn = self.db.begin().await?;
        lock_user(&txn, user_id).await?;

        let Some(open) = ci::Entity::find()
            .filter(ci::Column::UserId.eq(user_id))
            .filter(ci::Column::CheckOutTime.is_null())
            .order_by_desc(ci::Column::CheckInTime)
            .order_by_desc(ci::Column::Id)
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };

        let res = ci::Entity::update_many()
            .set(ci::ActiveModel {
                check_out_time: Set(Some(at)),
                ..Default::default()
            })
            .filter(ci::Column::Id.eq(open.id))
            .filter(ci::Column::CheckOutTime.is_null())
            .exec(&txn)
            .await?;
        if res.rows_affected == 0 {
            return Ok(None);
        }

        txn.commit().await?;
        Ok(Some(ci::Model {
            check_out_time: Some(at),
            ..open
        }))
    }
}

#[async_trait]
impl RateLimitStore for SeaOrmStore {
    async fn hit(&self, key: &str, window_secs: i64, now: DateTime<Utc>) -> AppResult<rlc::Model> {
        let expires_at = now + Duration::seconds(window_secs);
        // 窗口过期则重置计数，否则原子自增
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"INSERT INTO rate_limit_counters (key, count, window_started_at, expires_at)
               VALUES ($1, 1, $2, $3)
               ON CONFLICT (key) DO UPDATE SET
                 count = CASE WHEN rate_limit_counters.expires_at <= $2
                              THEN 1 ELSE rate_limit_counters.count + 1 END,
                 window_started_at = CASE WHEN rate_limit_counters.expires_at <= $2
                              THEN $2 ELSE rate_limit_counters.window_started_at END,
                 expires_at = CASE WHEN rate_limit_counters.expires_at <= $2
                              THEN $3 ELSE rate_limit_counters.expires_at END
               RETURNING key, count, window_started_at, expires_at"#,
            [key.into(), now.into(), expires_at.into()],
        );
        rlc::Entity::find()
            .from_raw_sql(stmt)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::InternalError("rate limit upsert returned no row".to_string()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = rlc::Entity::delete_many()
            .filter(rlc::Column::ExpiresAt.lte(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
