use crate::error::AppError;
use crate::external::StripeService;
use crate::services::{ReconcileOutcome, SubscriptionService};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use log::{error, info, warn};

/// Stripe webhook处理器
///
/// 订阅相关事件只用来触发重新拉取订阅状态，事件体本身不作为最终状态
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    stripe_service: web::Data<StripeService>,
    subscription_service: web::Data<SubscriptionService>,
) -> Result<HttpResponse> {
    let signature = match req.headers().get("stripe-signature") {
        Some(sig) => sig.to_str().unwrap_or(""),
        None => {
            warn!("Missing Stripe-Signature header");
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Missing Stripe-Signature header"
            })));
        }
    };

    let payload = std::str::from_utf8(&body).map_err(|_| {
        error!("Invalid UTF-8 in webhook payload");
        actix_web::error::ErrorBadRequest("Invalid payload encoding")
    })?;

    // 验证webhook签名
    let event = match stripe_service.verify_webhook_signature(payload, signature) {
        Ok(event) => event,
        Err(e) => {
            error!("Webhook signature verification failed: {e}");
            return Ok(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Invalid signature"
            })));
        }
    };

    info!("Received Stripe webhook event: {} ({})", event.type_, event.id);

    match subscription_service.handle_webhook_event(event).await {
        Ok(outcome) => {
            if let ReconcileOutcome::Created(m) | ReconcileOutcome::Updated(m) = &outcome {
                info!("Webhook applied to membership {}", m.id);
            }
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "received": true
            })))
        }
        // 暂时性错误返回非 2xx，让 Stripe 稍后重投
        Err(e) if e.is_retryable() || matches!(e, AppError::DatabaseError(_)) => {
            error!("Webhook processing deferred: {e}");
            Ok(e.error_response())
        }
        Err(e) => {
            error!("Failed to process webhook event: {e}");
            // 返回200状态码避免Stripe重试，但记录错误
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "received": true,
                "error": format!("Processing failed: {}", e)
            })))
        }
    }
}

/// 配置webhook路由
pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhook").route("/stripe", web::post().to(stripe_webhook)));
}
