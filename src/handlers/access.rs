use super::current_user;
use crate::models::*;
use crate::services::{
    AccessService, RateLimitService, SCOPE_CHECK_IN, SCOPE_CHECK_OUT, SCOPE_QR_SCAN,
};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use serde_json::json;

#[utoipa::path(
    post,
    path = "/access/check-in",
    tag = "access",
    request_body = LocationClaim,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "签到成功", body = SessionResponse),
        (status = 404, description = "没有有效会员"),
        (status = 409, description = "已有未结束的签到"),
        (status = 422, description = "位置无效或不在场馆范围内")
    )
)]
pub async fn check_in(
    access_service: web::Data<AccessService>,
    rate_limit_service: web::Data<RateLimitService>,
    req: HttpRequest,
    body: web::Json<LocationClaim>,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;
    rate_limit_service.check(SCOPE_CHECK_IN, user.user_id).await?;

    match access_service.check_in(user.user_id, body.into_inner()).await {
        Ok(session) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": SessionResponse::from(session)
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/access/check-out",
    tag = "access",
    request_body = LocationClaim,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "签退成功", body = SessionResponse),
        (status = 409, description = "没有未结束的签到"),
        (status = 422, description = "位置无效或不在场馆范围内")
    )
)]
pub async fn check_out(
    access_service: web::Data<AccessService>,
    rate_limit_service: web::Data<RateLimitService>,
    req: HttpRequest,
    body: web::Json<LocationClaim>,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;
    rate_limit_service.check(SCOPE_CHECK_OUT, user.user_id).await?;

    match access_service.check_out(user.user_id, body.into_inner()).await {
        Ok(session) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": SessionResponse::from(session)
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/access/action",
    tag = "access",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "当前应执行的动作（入场/离场）", body = AccessActionResponse)
    )
)]
pub async fn current_action(
    access_service: web::Data<AccessService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;

    match access_service.determine_action(user.user_id).await {
        Ok(action) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": AccessActionResponse { action }
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/access/qr-token",
    tag = "access",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "生成短期二维码令牌", body = QrToken)
    )
)]
pub async fn qr_token(
    access_service: web::Data<AccessService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;

    match access_service.issue_qr_token(user.user_id).await {
        Ok(token) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": token
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/access/qr-scan",
    tag = "access",
    request_body = QrScanRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "扫码签到/签退成功", body = QrScanResponse),
        (status = 401, description = "二维码签名无效"),
        (status = 403, description = "只能使用本人的二维码（工作人员除外）"),
        (status = 409, description = "二维码与当前动作不匹配"),
        (status = 410, description = "二维码已过期")
    )
)]
pub async fn qr_scan(
    access_service: web::Data<AccessService>,
    rate_limit_service: web::Data<RateLimitService>,
    req: HttpRequest,
    body: web::Json<QrScanRequest>,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;
    rate_limit_service.check(SCOPE_QR_SCAN, user.user_id).await?;

    let body = body.into_inner();
    match access_service.scan_qr(&user, &body.token, body.location()).await {
        Ok((action, session)) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": QrScanResponse {
                action,
                session: SessionResponse::from(session),
            }
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn access_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/access")
            .route("/check-in", web::post().to(check_in))
            .route("/check-out", web::post().to(check_out))
            .route("/action", web::get().to(current_action))
            .route("/qr-token", web::get().to(qr_token))
            .route("/qr-scan", web::post().to(qr_scan)),
    );
}
