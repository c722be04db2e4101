use super::current_user;
use crate::models::*;
use crate::services::{RateLimitService, SCOPE_CHECKOUT, SCOPE_RECONCILE, SubscriptionService};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use serde_json::json;

#[utoipa::path(
    post,
    path = "/membership/checkout",
    tag = "membership",
    request_body = StartCheckoutRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "创建 Stripe Checkout 会话成功", body = StartCheckoutResponse),
        (status = 400, description = "邮箱未验证或套餐不可购买"),
        (status = 409, description = "已有有效会员")
    )
)]
pub async fn checkout(
    subscription_service: web::Data<SubscriptionService>,
    rate_limit_service: web::Data<RateLimitService>,
    req: HttpRequest,
    body: web::Json<StartCheckoutRequest>,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;
    rate_limit_service.check(SCOPE_CHECKOUT, user.user_id).await?;

    match subscription_service.start_checkout(&user, body.plan_id).await {
        Ok(session) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": StartCheckoutResponse {
                session_id: session.id,
                checkout_url: session.url,
            }
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/membership/reconcile",
    tag = "membership",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "与支付方同步会员状态", body = ReconcileResponse)
    )
)]
pub async fn reconcile(
    subscription_service: web::Data<SubscriptionService>,
    rate_limit_service: web::Data<RateLimitService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;
    rate_limit_service.check(SCOPE_RECONCILE, user.user_id).await?;

    match subscription_service
        .reconcile(user.user_id, user.verified_email())
        .await
    {
        Ok(outcome) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": ReconcileResponse::from(outcome)
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn membership_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/membership")
            .route("/checkout", web::post().to(checkout))
            .route("/reconcile", web::post().to(reconcile)),
    );
}
