use super::current_user;
use crate::models::*;
use crate::services::{CancellationService, EntitlementService, RateLimitService, SCOPE_CANCEL};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use serde_json::json;

#[utoipa::path(
    post,
    path = "/entitlement/cancel",
    tag = "entitlement",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "取消成功，宽限期内仍可使用", body = CancellationResult),
        (status = 401, description = "未授权"),
        (status = 404, description = "没有有效会员"),
        (status = 429, description = "请求过于频繁"),
        (status = 503, description = "支付服务暂不可用，可重试")
    )
)]
pub async fn cancel(
    cancellation_service: web::Data<CancellationService>,
    rate_limit_service: web::Data<RateLimitService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;
    rate_limit_service.check(SCOPE_CANCEL, user.user_id).await?;

    match cancellation_service.cancel(&user).await {
        Ok(result) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": result,
            "message": result.message
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/entitlement/status",
    tag = "entitlement",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "当前会员状态", body = EntitlementStatus),
        (status = 401, description = "未授权")
    )
)]
pub async fn status(
    entitlement_service: web::Data<EntitlementService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;

    match entitlement_service.status(user.user_id).await {
        Ok(status) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": status
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn entitlement_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/entitlement")
            .route("/cancel", web::post().to(cancel))
            .route("/status", web::get().to(status)),
    );
}
