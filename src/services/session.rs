//! Signed session tokens (HS256) bound to an issuer/audience pair.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::services::ServiceError;

/// Token-type discriminators. Every claim set carries one and every
/// validator checks it, so a decoded field-subset of another token type can
/// never pass as this one.
pub const PURPOSE_ACCESS: &str = "access";
pub const PURPOSE_REFRESH: &str = "refresh";
pub const PURPOSE_TWO_FACTOR: &str = "2fa";

/// Claims for access tokens (short-lived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    /// Display-rank role name, e.g. "manager".
    pub role: Option<String>,
    /// Flattened permission set as "action:resource" strings.
    pub permissions: Vec<String>,
    /// Stores the user may act in.
    pub stores: Vec<Uuid>,
    /// Always "access".
    pub purpose: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Claims for refresh tokens (long-lived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    /// Always "refresh".
    pub purpose: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Claims for the temp token bridging password success and 2FA submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorClaims {
    pub sub: String,
    /// Always "2fa".
    pub purpose: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Access + refresh token pair issued after a full login.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
    two_factor_token_expiry_minutes: i64,
}

impl SessionService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
            two_factor_token_expiry_minutes: config.two_factor_token_expiry_minutes,
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_exp = true;
        validation
    }

    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: Option<String>,
        permissions: Vec<String>,
        stores: Vec<Uuid>,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            permissions,
            stores,
            purpose: PURPOSE_ACCESS.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.access_token_expiry_minutes)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            purpose: PURPOSE_REFRESH.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::days(self.refresh_token_expiry_days)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode refresh token: {}", e)))
    }

    pub fn issue_two_factor_token(&self, user_id: Uuid) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = TwoFactorClaims {
            sub: user_id.to_string(),
            purpose: PURPOSE_TWO_FACTOR.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.two_factor_token_expiry_minutes)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode 2fa token: {}", e)))
    }

    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, ServiceError> {
        let claims = decode::<AccessClaims>(token, &self.decoding_key, &self.validation())
            .map(|data| data.claims)
            .map_err(|_| ServiceError::InvalidToken)?;

        if claims.purpose != PURPOSE_ACCESS {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, ServiceError> {
        let claims = decode::<RefreshClaims>(token, &self.decoding_key, &self.validation())
            .map(|data| data.claims)
            .map_err(|_| ServiceError::InvalidToken)?;

        if claims.purpose != PURPOSE_REFRESH {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }

    pub fn validate_two_factor_token(&self, token: &str) -> Result<TwoFactorClaims, ServiceError> {
        let claims = decode::<TwoFactorClaims>(token, &self.decoding_key, &self.validation())
            .map(|data| data.claims)
            .map_err(|_| ServiceError::InvalidToken)?;

        if claims.purpose != PURPOSE_TWO_FACTOR {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> SessionService {
        SessionService::new(&JwtConfig {
            secret: "unit-test-secret-0123456789abcdef".to_string(),
            issuer: "identity-service".to_string(),
            audience: "erp-api".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            two_factor_token_expiry_minutes: 5,
        })
    }

    #[test]
    fn test_access_token_round_trip() {
        let service = test_service();
        let user_id = Uuid::new_v4();
        let token = service
            .issue_access_token(
                user_id,
                "a@b.com",
                Some("manager".to_string()),
                vec!["read:reports".to_string()],
                vec![],
            )
            .unwrap();

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role.as_deref(), Some("manager"));
        assert_eq!(claims.permissions, vec!["read:reports".to_string()]);
    }

    #[test]
    fn test_two_factor_token_is_not_an_access_token() {
        let service = test_service();
        let token = service.issue_two_factor_token(Uuid::new_v4()).unwrap();

        assert!(service.validate_two_factor_token(&token).is_ok());
        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_token_types_do_not_cross_validate() {
        let service = test_service();
        let user_id = Uuid::new_v4();
        let access = service
            .issue_access_token(user_id, "a@b.com", None, vec![], vec![])
            .unwrap();
        let refresh = service.issue_refresh_token(user_id).unwrap();
        let two_factor = service.issue_two_factor_token(user_id).unwrap();

        // Refresh claims are a field-subset of the other claim sets, so the
        // purpose check is what keeps each validator to its own token type.
        assert!(service.validate_refresh_token(&access).is_err());
        assert!(service.validate_refresh_token(&two_factor).is_err());
        assert!(service.validate_access_token(&refresh).is_err());
        assert!(service.validate_access_token(&two_factor).is_err());
        assert!(service.validate_two_factor_token(&refresh).is_err());
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let service = test_service();
        let other = SessionService::new(&JwtConfig {
            secret: "unit-test-secret-0123456789abcdef".to_string(),
            issuer: "identity-service".to_string(),
            audience: "other-api".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            two_factor_token_expiry_minutes: 5,
        });

        let token = service.issue_refresh_token(Uuid::new_v4()).unwrap();
        assert!(other.validate_refresh_token(&token).is_err());
    }
}
