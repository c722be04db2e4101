use crate::external::ProcessorError;
use crate::models::ApiError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Auth error: {0}")]
    AuthError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("No active membership")]
    NoActiveMembership,

    #[error("User already has an active membership")]
    DuplicateActiveMembership,

    #[error("Payment processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Location invalid: {0}")]
    LocationInvalid(String),

    #[error("Location unsupported: {0}")]
    LocationUnsupported(String),

    #[error("QR code expired")]
    QrCodeExpired,

    #[error("QR code is for {expected} but the current action is {actual}")]
    QrCodeMismatch { expected: String, actual: String },

    #[error("An open check-in session already exists")]
    DuplicateSession,

    #[error("No open check-in session")]
    NoOpenSession,

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl AppError {
    /// True when the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Processor(e) => e.is_transient(),
            AppError::RateLimited { .. } => true,
            _ => false,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) | AppError::JwtError(_) => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::NoActiveMembership => StatusCode::NOT_FOUND,
            AppError::DuplicateActiveMembership
            | AppError::DuplicateSession
            | AppError::NoOpenSession
            | AppError::QrCodeMismatch { .. } => StatusCode::CONFLICT,
            AppError::QrCodeExpired => StatusCode::GONE,
            AppError::LocationInvalid(_) | AppError::LocationUnsupported(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Processor(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Processor(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_)
            | AppError::InternalError(_)
            | AppError::SerdeJsonError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let mut correlation_id = None;
        let (error_code, message) = match self {
            AppError::ValidationError(msg) => {
                log::warn!("Validation error: {msg}");
                ("VALIDATION_ERROR", msg.clone())
            }
            AppError::AuthError(msg) => {
                log::warn!("Authentication error: {msg}");
                ("AUTH_ERROR", msg.clone())
            }
            AppError::JwtError(err) => {
                log::warn!("Token rejected: {err}");
                ("AUTH_ERROR", "Invalid token".to_string())
            }
            AppError::PermissionDenied => {
                log::warn!("Permission denied");
                ("FORBIDDEN", "Permission denied".to_string())
            }
            AppError::NotFound(msg) => ("NOT_FOUND", msg.clone()),
            AppError::NoActiveMembership => (
                "NO_ACTIVE_MEMBERSHIP",
                "You don't have an active membership".to_string(),
            ),
            AppError::DuplicateActiveMembership => (
                "DUPLICATE_ACTIVE_MEMBERSHIP",
                "You already have an active membership".to_string(),
            ),
            AppError::Processor(err) => {
                log::error!("Payment processor error: {err}");
                if err.is_transient() {
                    (
                        "PROCESSOR_UNAVAILABLE",
                        "Billing provider is temporarily unavailable, please try again"
                            .to_string(),
                    )
                } else {
                    ("PROCESSOR_ERROR", "Billing provider request failed".to_string())
                }
            }
            AppError::LocationInvalid(msg) => ("LOCATION_INVALID", msg.clone()),
            AppError::LocationUnsupported(msg) => ("LOCATION_UNSUPPORTED", msg.clone()),
            AppError::QrCodeExpired => (
                "QR_CODE_EXPIRED",
                "This QR code has expired, please generate a new one".to_string(),
            ),
            AppError::QrCodeMismatch { .. } => (
                "QR_CODE_MISMATCH",
                format!("{self}, please generate a new QR code"),
            ),
            AppError::DuplicateSession => (
                "DUPLICATE_SESSION",
                "You are already checked in".to_string(),
            ),
            AppError::NoOpenSession => (
                "NO_OPEN_SESSION",
                "You are not checked in".to_string(),
            ),
            AppError::RateLimited { .. } => ("RATE_LIMITED", self.to_string()),
            AppError::DatabaseError(err) => {
                let id = uuid::Uuid::new_v4().to_string();
                log::error!("Database error [correlation_id={id}]: {err}");
                correlation_id = Some(id);
                ("PERSISTENCE_ERROR", "Database error".to_string())
            }
            _ => {
                let id = uuid::Uuid::new_v4().to_string();
                log::error!("Internal error [correlation_id={id}]: {self}");
                correlation_id = Some(id);
                ("INTERNAL_ERROR", "Internal server error".to_string())
            }
        };

        let mut response = HttpResponse::build(status_code);
        if let AppError::RateLimited { retry_after_secs } = self {
            response.insert_header(("Retry-After", retry_after_secs.to_string()));
        }
        response.json(json!({
            "success": false,
            "error": ApiError {
                code: error_code.to_string(),
                message,
                retryable: self.is_retryable(),
                correlation_id,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ProcessorErrorKind;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::NoActiveMembership.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::DuplicateSession.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::QrCodeExpired.status_code(), StatusCode::GONE);
        assert_eq!(
            AppError::LocationInvalid("too far".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::RateLimited { retry_after_secs: 3 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_processor_errors_split_on_transience() {
        let unavailable = AppError::from(ProcessorError::new(
            ProcessorErrorKind::Unavailable,
            "timed out",
        ));
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(unavailable.is_retryable());

        let rejected = AppError::from(ProcessorError::new(
            ProcessorErrorKind::Rejected,
            "bad param",
        ));
        assert_eq!(rejected.status_code(), StatusCode::BAD_GATEWAY);
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn test_database_error_hides_detail() {
        let err = AppError::DatabaseError(sea_orm::DbErr::Custom("password=hunter2".into()));
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_error_body_envelope() {
        let err = AppError::DatabaseError(sea_orm::DbErr::Custom("password=hunter2".into()));
        let body = actix_web::body::to_bytes(err.error_response().into_body())
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "PERSISTENCE_ERROR");
        assert_eq!(value["error"]["retryable"], false);
        assert!(value["error"]["correlation_id"].is_string());
        assert!(!String::from_utf8_lossy(&body).contains("hunter2"));

        let err = AppError::from(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = actix_web::body::to_bytes(err.error_response().into_body())
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], "INTERNAL_ERROR");
    }
}
