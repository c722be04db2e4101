use super::current_user;
use crate::models::*;
use crate::services::SubscriptionService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use serde_json::json;

#[utoipa::path(
    post,
    path = "/admin/memberships",
    tag = "admin",
    request_body = AssignMembershipRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "为用户分配会员（非订阅）", body = MembershipSummary),
        (status = 403, description = "需要管理员权限"),
        (status = 409, description = "用户已有有效会员")
    )
)]
pub async fn assign_membership(
    subscription_service: web::Data<SubscriptionService>,
    req: HttpRequest,
    body: web::Json<AssignMembershipRequest>,
) -> Result<HttpResponse> {
    let admin = current_user(&req)?;

    match subscription_service
        .assign_membership(&admin, body.into_inner())
        .await
    {
        Ok(record) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "data": MembershipSummary::from(record),
            "message": "会员分配成功"
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin").route("/memberships", web::post().to(assign_membership)),
    );
}
