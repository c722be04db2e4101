use crate::config::RateLimitConfig;
use crate::error::{AppError, AppResult};
use crate::store::RateLimitStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const SCOPE_CANCEL: &str = "cancel";
pub const SCOPE_CHECK_IN: &str = "check_in";
pub const SCOPE_CHECK_OUT: &str = "check_out";
pub const SCOPE_QR_SCAN: &str = "qr_scan";
pub const SCOPE_CHECKOUT: &str = "checkout";
pub const SCOPE_RECONCILE: &str = "reconcile";

/// Fixed-window limiter over a counter shared by every instance.
#[derive(Clone)]
pub struct RateLimitService {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimitService {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub async fn check(&self, scope: &str, user_id: i64) -> AppResult<()> {
        self.check_at(scope, user_id, Utc::now()).await
    }

    pub async fn check_at(&self, scope: &str, user_id: i64, now: DateTime<Utc>) -> AppResult<()> {
        let key = format!("{scope}:{user_id}");
        let counter = self.store.hit(&key, self.config.window_secs, now).await?;
        if counter.count == 1 {
            // 新窗口开启时顺带清理过期计数，失败不影响本次请求
            self.purge_expired_at(now).await;
        }
        if counter.count > self.config.max_requests {
            let retry_after_secs = (counter.expires_at - now).num_seconds().max(1);
            log::warn!("Rate limit hit for {key} ({} requests)", counter.count);
            return Err(AppError::RateLimited { retry_after_secs });
        }
        Ok(())
    }

    /// Removes counters whose window has ended.
    pub async fn purge_expired(&self) {
        self.purge_expired_at(Utc::now()).await
    }

    async fn purge_expired_at(&self, now: DateTime<Utc>) {
        match self.store.purge_expired(now).await {
            Ok(0) => {}
            Ok(removed) => log::debug!("Purged {removed} expired rate limit counters"),
            Err(e) => log::warn!("Failed to purge expired rate limit counters: {e}"),
        }
    }
}
