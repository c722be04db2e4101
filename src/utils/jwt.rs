use crate::error::{AppError, AppResult};
use crate::models::AuthenticatedUser;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub role: String, // "member" or "admin"
    pub exp: i64,
    pub iat: i64,
    pub token_type: String, // "access" or "refresh"
}

impl Claims {
    pub fn into_user(self) -> AppResult<AuthenticatedUser> {
        let user_id = self
            .sub
            .parse::<i64>()
            .map_err(|_| AppError::AuthError("Invalid subject in token".to_string()))?;
        Ok(AuthenticatedUser {
            user_id,
            // 未验证的邮箱不能用于支付方客户查找
            email: self.email.filter(|_| self.email_verified),
            is_admin: self.role == "admin",
        })
    }
}

/// Access tokens are minted by the identity service; this side only verifies them.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_access_token(
        &self,
        user: &AuthenticatedUser,
        expires_in_secs: i64,
    ) -> AppResult<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(expires_in_secs);

        let claims = Claims {
            sub: user.user_id.to_string(),
            email: user.email.clone(),
            email_verified: user.email.is_some(),
            role: if user.is_admin { "admin" } else { "member" }.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            token_type: "access".to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(AppError::JwtError)
    }

    pub fn verify_token(&self, token: &str) -> AppResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(AppError::JwtError)
    }

    pub fn verify_access_token(&self, token: &str) -> AppResult<AuthenticatedUser> {
        let claims = self.verify_token(token)?;

        if claims.token_type != "access" {
            return Err(AppError::AuthError("Invalid access token type".to_string()));
        }

        claims.into_user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_keeps_verified_email_and_role() {
        let jwt = JwtService::new("secret");
        let user = AuthenticatedUser {
            user_id: 42,
            email: Some("a@example.com".to_string()),
            is_admin: true,
        };
        let token = jwt.generate_access_token(&user, 3600).unwrap();
        assert_eq!(jwt.verify_access_token(&token).unwrap(), user);
    }

    #[test]
    fn test_unverified_email_is_dropped() {
        let claims = Claims {
            sub: "5".to_string(),
            email: Some("b@example.com".to_string()),
            email_verified: false,
            role: "member".to_string(),
            exp: 0,
            iat: 0,
            token_type: "access".to_string(),
        };
        let user = claims.into_user().unwrap();
        assert_eq!(user.email, None);
        assert!(!user.is_admin);
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let jwt = JwtService::new("secret");
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "5".to_string(),
            email: None,
            email_verified: false,
            role: "member".to_string(),
            exp: now + 60,
            iat: now,
            token_type: "refresh".to_string(),
        };
        let token = encode(&Header::default(), &claims, &jwt.encoding_key).unwrap();
        assert!(matches!(
            jwt.verify_access_token(&token),
            Err(AppError::AuthError(_))
        ));
    }
}
