use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{MembershipStatus, PaymentMethod, PaymentStatus};
use crate::handlers;
use crate::models::*;
use crate::utils::Coordinate;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::entitlement::cancel,
        handlers::entitlement::status,
        handlers::access::check_in,
        handlers::access::check_out,
        handlers::access::current_action,
        handlers::access::qr_token,
        handlers::access::qr_scan,
        handlers::membership::checkout,
        handlers::membership::reconcile,
        handlers::admin::assign_membership,
    ),
    components(
        schemas(
            MembershipStatus,
            PaymentStatus,
            PaymentMethod,
            MembershipSummary,
            EntitlementStatus,
            BillingDisposition,
            CancellationEffect,
            CancellationResult,
            AccessAction,
            AccessActionResponse,
            LocationClaim,
            Coordinate,
            SessionResponse,
            QrToken,
            QrScanRequest,
            QrScanResponse,
            StartCheckoutRequest,
            StartCheckoutResponse,
            ReconcileStatus,
            ReconcileResponse,
            AssignMembershipRequest,
            ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "entitlement", description = "Membership entitlement and cancellation API"),
        (name = "access", description = "Facility check-in / check-out API"),
        (name = "membership", description = "Subscription checkout and reconciliation API"),
        (name = "admin", description = "Staff membership management API"),
    ),
    info(
        title = "GymPass Backend API",
        version = "1.0.0",
        description = "Membership entitlement and access-control REST API documentation",
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
