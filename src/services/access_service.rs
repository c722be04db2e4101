use crate::entities::check_in_entity as ci;
use crate::error::{AppError, AppResult};
use crate::models::{AccessAction, AuthenticatedUser, LocationClaim, QrToken};
use crate::services::EntitlementService;
use crate::store::CheckInStore;
use crate::utils::{Coordinate, Geofence, QrTokenService};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Gates physical entry and exit. A user has at most one open session.
#[derive(Clone)]
pub struct AccessService {
    entitlement: EntitlementService,
    sessions: Arc<dyn CheckInStore>,
    geofence: Geofence,
    qr: QrTokenService,
}

impl AccessService {
    pub fn new(
        entitlement: EntitlementService,
        sessions: Arc<dyn CheckInStore>,
        geofence: Geofence,
        qr: QrTokenService,
    ) -> Self {
        Self {
            entitlement,
            sessions,
            geofence,
            qr,
        }
    }

    /// Exit while a session is open, entry otherwise.
    pub async fn determine_action(&self, user_id: i64) -> AppResult<AccessAction> {
        Ok(match self.sessions.open_session(user_id).await? {
            Some(_) => AccessAction::Exit,
            None => AccessAction::Entry,
        })
    }

    pub async fn check_in(&self, user_id: i64, claim: LocationClaim) -> AppResult<ci::Model> {
        self.check_in_at(user_id, claim, Utc::now()).await
    }

    pub async fn check_in_at(
        &self,
        user_id: i64,
        claim: LocationClaim,
        now: DateTime<Utc>,
    ) -> AppResult<ci::Model> {
        if !self.entitlement.has_valid_entitlement_at(user_id, now).await? {
            return Err(AppError::NoActiveMembership);
        }

        let position = Coordinate::from_claim(claim.lat, claim.lng)?;
        let distance = self.geofence.check(position)?;

        if self.sessions.open_session(user_id).await?.is_some() {
            return Err(AppError::DuplicateSession);
        }

        // 并发签到由唯一索引兜底，冲突同样返回 DuplicateSession
        let session = self
            .sessions
            .insert_open_session(user_id, now, Some(position.to_location_string()))
            .await?;
        log::info!(
            "User {} checked in (session {}, {:.0} m from facility)",
            user_id,
            session.id,
            distance
        );
        Ok(session)
    }

    pub async fn check_out(&self, user_id: i64, claim: LocationClaim) -> AppResult<ci::Model> {
        self.check_out_at(user_id, claim, Utc::now()).await
    }

    /// Closing an open session does not require a valid membership.
    pub async fn check_out_at(
        &self,
        user_id: i64,
        claim: LocationClaim,
        now: DateTime<Utc>,
    ) -> AppResult<ci::Model> {
        if self.sessions.open_session(user_id).await?.is_none() {
            return Err(AppError::NoOpenSession);
        }

        let position = Coordinate::from_claim(claim.lat, claim.lng)?;
        self.geofence.check(position)?;

        let session = self
            .sessions
            .close_latest_open(user_id, now)
            .await?
            .ok_or(AppError::NoOpenSession)?;
        log::info!("User {} checked out (session {})", user_id, session.id);
        Ok(session)
    }

    pub async fn issue_qr_token(&self, user_id: i64) -> AppResult<QrToken> {
        self.issue_qr_token_at(user_id, Utc::now()).await
    }

    pub async fn issue_qr_token_at(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<QrToken> {
        let action = self.determine_action(user_id).await?;
        self.qr.issue_at(user_id, action, now)
    }

    pub async fn scan_qr(
        &self,
        scanner: &AuthenticatedUser,
        token: &str,
        claim: LocationClaim,
    ) -> AppResult<(AccessAction, ci::Model)> {
        self.scan_qr_at(scanner, token, claim, Utc::now()).await
    }

    /// Verifies the token and performs the action it was issued for, as long as
    /// that is still the user's current action. Only the token's owner or staff
    /// may redeem it.
    pub async fn scan_qr_at(
        &self,
        scanner: &AuthenticatedUser,
        token: &str,
        claim: LocationClaim,
        now: DateTime<Utc>,
    ) -> AppResult<(AccessAction, ci::Model)> {
        let claims = self.qr.verify_at(token, now)?;
        let user_id = claims.user_id()?;
        if scanner.user_id != user_id && !scanner.is_admin {
            log::warn!(
                "User {} tried to redeem a QR code issued to user {}",
                scanner.user_id,
                user_id
            );
            return Err(AppError::PermissionDenied);
        }

        let current = self.determine_action(user_id).await?;
        if claims.action != current {
            return Err(AppError::QrCodeMismatch {
                expected: claims.action.to_string(),
                actual: current.to_string(),
            });
        }

        let session = match claims.action {
            AccessAction::Entry => self.check_in_at(user_id, claim, now).await?,
            AccessAction::Exit => self.check_out_at(user_id, claim, now).await?,
        };
        Ok((claims.action, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MembershipStatus;
    use crate::services::entitlement_service::tests::{day, membership};
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    const GYM: Coordinate = Coordinate {
        lat: 40.7128,
        lng: -74.0060,
    };

    fn at_gym() -> LocationClaim {
        LocationClaim {
            lat: Some(GYM.lat),
            lng: Some(GYM.lng),
        }
    }

    // 约 1000 米外
    fn far_away() -> LocationClaim {
        LocationClaim {
            lat: Some(GYM.lat + 0.009),
            lng: Some(GYM.lng),
        }
    }

    fn member(user_id: i64) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id,
            email: None,
            is_admin: false,
        }
    }

    fn build(store: Arc<MemoryStore>) -> AccessService {
        AccessService::new(
            EntitlementService::new(store.clone()),
            store,
            Geofence::new(GYM, 100.0),
            QrTokenService::new("qr-secret", 60),
        )
    }

    fn with_member(user_id: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_membership(membership(user_id, Some("cash"), None));
        store
    }

    #[tokio::test]
    async fn test_check_in_then_out() {
        let store = with_member(1);
        let svc = build(store.clone());

        assert_eq!(svc.determine_action(1).await.unwrap(), AccessAction::Entry);
        let session = svc.check_in_at(1, at_gym(), day(5)).await.unwrap();
        assert!(session.is_open());
        assert_eq!(svc.determine_action(1).await.unwrap(), AccessAction::Exit);

        let closed = svc
            .check_out_at(1, at_gym(), day(5) + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(closed.id, session.id);
        assert_eq!(closed.check_out_time, Some(day(5) + Duration::hours(1)));
        assert_eq!(svc.determine_action(1).await.unwrap(), AccessAction::Entry);
    }

    #[tokio::test]
    async fn test_double_check_in_is_rejected() {
        let store = with_member(1);
        let svc = build(store.clone());

        svc.check_in_at(1, at_gym(), day(5)).await.unwrap();
        let err = svc.check_in_at(1, at_gym(), day(5)).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateSession));
        assert_eq!(store.sessions_for(1).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_check_ins_leave_one_open_session() {
        let store = with_member(1);
        let svc = build(store.clone());

        let (a, b) = tokio::join!(
            svc.check_in_at(1, at_gym(), day(5)),
            svc.check_in_at(1, at_gym(), day(5))
        );
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(store.sessions_for(1).iter().filter(|s| s.is_open()).count(), 1);
    }

    #[tokio::test]
    async fn test_check_in_without_membership() {
        let store = Arc::new(MemoryStore::new());
        let svc = build(store.clone());
        let err = svc.check_in_at(1, at_gym(), day(5)).await.unwrap_err();
        assert!(matches!(err, AppError::NoActiveMembership));
        assert!(store.sessions_for(1).is_empty());
    }

    #[tokio::test]
    async fn test_check_in_after_end_date_expires_membership() {
        let store = with_member(1);
        let svc = build(store.clone());
        let err = svc.check_in_at(1, at_gym(), day(31)).await.unwrap_err();
        assert!(matches!(err, AppError::NoActiveMembership));
        assert_eq!(store.memberships_for(1)[0].status, MembershipStatus::Expired);
    }

    #[tokio::test]
    async fn test_geofence_rejections() {
        let store = with_member(1);
        let svc = build(store.clone());

        let err = svc.check_in_at(1, far_away(), day(5)).await.unwrap_err();
        assert!(matches!(err, AppError::LocationInvalid(_)));

        let err = svc
            .check_in_at(1, LocationClaim::default(), day(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LocationUnsupported(_)));
        assert!(store.sessions_for(1).is_empty());
    }

    #[tokio::test]
    async fn test_check_out_outside_geofence_keeps_session_open() {
        let store = with_member(1);
        let svc = build(store.clone());
        svc.check_in_at(1, at_gym(), day(5)).await.unwrap();

        let err = svc.check_out_at(1, far_away(), day(5)).await.unwrap_err();
        assert!(matches!(err, AppError::LocationInvalid(_)));
        assert!(store.sessions_for(1)[0].is_open());
    }

    #[tokio::test]
    async fn test_check_out_without_session() {
        let svc = build(with_member(1));
        let err = svc.check_out_at(1, at_gym(), day(5)).await.unwrap_err();
        assert!(matches!(err, AppError::NoOpenSession));
    }

    #[tokio::test]
    async fn test_qr_scan_performs_current_action() {
        let store = with_member(1);
        let svc = build(store.clone());

        let entry = svc.issue_qr_token_at(1, day(5)).await.unwrap();
        assert_eq!(entry.action, AccessAction::Entry);
        let (action, session) = svc.scan_qr_at(&member(1), &entry.token, at_gym(), day(5)).await.unwrap();
        assert_eq!(action, AccessAction::Entry);
        assert!(session.is_open());

        let exit = svc.issue_qr_token_at(1, day(5)).await.unwrap();
        assert_eq!(exit.action, AccessAction::Exit);
        let (action, session) = svc.scan_qr_at(&member(1), &exit.token, at_gym(), day(5)).await.unwrap();
        assert_eq!(action, AccessAction::Exit);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_qr_expired_and_mismatch() {
        let store = with_member(1);
        let svc = build(store.clone());

        let entry = svc.issue_qr_token_at(1, day(5)).await.unwrap();
        let err = svc
            .scan_qr_at(&member(1), &entry.token, at_gym(), day(5) + Duration::seconds(61))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QrCodeExpired));

        // 用户已签到后，旧的入场码不再匹配
        svc.check_in_at(1, at_gym(), day(5)).await.unwrap();
        let err = svc.scan_qr_at(&member(1), &entry.token, at_gym(), day(5)).await.unwrap_err();
        match err {
            AppError::QrCodeMismatch { expected, actual } => {
                assert_eq!(expected, "entry");
                assert_eq!(actual, "exit");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_qr_code_only_redeemable_by_owner_or_staff() {
        let store = with_member(1);
        store.seed_membership(membership(2, Some("cash"), None));
        let svc = build(store.clone());

        let entry = svc.issue_qr_token_at(1, day(5)).await.unwrap();
        let err = svc
            .scan_qr_at(&member(2), &entry.token, at_gym(), day(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
        assert!(store.sessions_for(1).is_empty());
        assert!(store.sessions_for(2).is_empty());

        let staff = AuthenticatedUser {
            user_id: 99,
            email: None,
            is_admin: true,
        };
        let (action, session) = svc
            .scan_qr_at(&staff, &entry.token, at_gym(), day(5))
            .await
            .unwrap();
        assert_eq!(action, AccessAction::Entry);
        assert_eq!(session.user_id, 1);
    }
}
