//! Environment-driven configuration.

use serde::Deserialize;
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required but not set")]
    Missing(String),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub jwt: JwtConfig,
    pub smtp: SmtpConfig,
    pub rate_limit: RateLimitConfig,
    /// Issuer label rendered into TOTP provisioning URIs.
    pub totp_issuer: String,
    pub maintenance_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    /// Lifetime of the short-lived token bridging password and 2FA steps.
    pub two_factor_token_expiry_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub ip_limit: u32,
    pub ip_window_seconds: u64,
    pub user_limit: u32,
    pub user_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str.parse().map_err(|e: String| ConfigError::Invalid {
            key: "ENVIRONMENT".to_string(),
            message: e,
        })?;
        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", Some("dev-only-secret-change-me-0123456789ab"), is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("identity-service"), is_prod)?,
                audience: get_env("JWT_AUDIENCE", Some("erp-api"), is_prod)?,
                access_token_expiry_minutes: parse_env("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", "15", is_prod)?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "7", is_prod)?,
                two_factor_token_expiry_minutes: parse_env("JWT_2FA_TOKEN_EXPIRY_MINUTES", "5", is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", "587", is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@localhost"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                ip_limit: parse_env("RATE_LIMIT_IP_LIMIT", "1000", is_prod)?,
                ip_window_seconds: parse_env("RATE_LIMIT_IP_WINDOW_SECONDS", "3600", is_prod)?,
                user_limit: parse_env("RATE_LIMIT_USER_LIMIT", "5000", is_prod)?,
                user_window_seconds: parse_env("RATE_LIMIT_USER_WINDOW_SECONDS", "3600", is_prod)?,
            },
            totp_issuer: get_env("TOTP_ISSUER", Some("ERP"), is_prod)?,
            maintenance_interval_seconds: parse_env("MAINTENANCE_INTERVAL_SECONDS", "300", is_prod)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(ConfigError::Invalid {
                key: "JWT_ACCESS_TOKEN_EXPIRY_MINUTES".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(ConfigError::Invalid {
                key: "JWT_REFRESH_TOKEN_EXPIRY_DAYS".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.environment == Environment::Prod && self.jwt.secret.len() < 32 {
            return Err(ConfigError::Invalid {
                key: "JWT_SECRET".to_string(),
                message: "must be at least 32 bytes in production".to_string(),
            });
        }
        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(ConfigError::Missing(key.to_string()))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(ConfigError::Missing(key.to_string()))
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str, is_prod: bool) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_defaults_load() {
        let config = IdentityConfig::from_env().expect("dev defaults should load");
        assert_eq!(config.rate_limit.ip_limit, 1000);
        assert_eq!(config.rate_limit.user_limit, 5000);
        assert!(config.jwt.access_token_expiry_minutes > 0);
    }
}
