use crate::entities::check_in_entity as ci;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    Entry,
    Exit,
}

impl std::fmt::Display for AccessAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessAction::Entry => write!(f, "entry"),
            AccessAction::Exit => write!(f, "exit"),
        }
    }
}

/// Device-reported position. Either field may be missing when the device has no fix.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct LocationClaim {
    #[schema(example = 40.7128)]
    pub lat: Option<f64>,
    #[schema(example = -74.006)]
    pub lng: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QrScanRequest {
    pub token: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl QrScanRequest {
    pub fn location(&self) -> LocationClaim {
        LocationClaim {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct SessionResponse {
    pub id: i64,
    pub user_id: i64,
    pub check_in_time: DateTime<Utc>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub location: Option<String>,
}

impl From<ci::Model> for SessionResponse {
    fn from(m: ci::Model) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            check_in_time: m.check_in_time,
            check_out_time: m.check_out_time,
            location: m.location,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessActionResponse {
    pub action: AccessAction,
}

/// Short-lived signed token rendered as a QR code by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct QrToken {
    pub token: String,
    pub action: AccessAction,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QrScanResponse {
    pub action: AccessAction,
    pub session: SessionResponse,
}
