use crate::error::{AppError, AppResult};
use crate::models::{AccessAction, QrToken};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QrClaims {
    pub sub: String, // user_id
    pub action: AccessAction,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl QrClaims {
    pub fn user_id(&self) -> AppResult<i64> {
        self.sub
            .parse()
            .map_err(|_| AppError::AuthError("Invalid QR code".to_string()))
    }
}

/// Signs and verifies the short-lived entry/exit QR tokens.
#[derive(Clone)]
pub struct QrTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: i64,
}

impl QrTokenService {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn issue_at(
        &self,
        user_id: i64,
        action: AccessAction,
        now: DateTime<Utc>,
    ) -> AppResult<QrToken> {
        let expires_at = now + Duration::seconds(self.ttl_secs);
        let claims = QrClaims {
            sub: user_id.to_string(),
            action,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(QrToken {
            token,
            action,
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(expires_at),
        })
    }

    /// Signature first, then expiry against `now`. jsonwebtoken's own exp check
    /// is disabled so expiry is reported as its own error and uses no leeway.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> AppResult<QrClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<QrClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                log::warn!("QR token rejected: {e}");
                AppError::AuthError("Invalid QR code".to_string())
            })?;

        if claims.exp <= now.timestamp() {
            return Err(AppError::QrCodeExpired);
        }
        Ok(claims)
    }
}
