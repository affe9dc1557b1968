//! Shared harness for integration tests: in-memory store, mock notifier,
//! and a fully wired service graph.

use std::sync::Arc;

use identity_service::config::{
    Environment, IdentityConfig, JwtConfig, RateLimitConfig, SmtpConfig,
};
use identity_service::models::SanitizedUser;
use identity_service::notifier::MockNotifier;
use identity_service::store::MemoryStore;
use identity_service::IdentityService;

pub const TEST_IP: &str = "127.0.0.1";
pub const TEST_PASSWORD: &str = "Crust&Crumb77!";

pub struct TestHarness {
    pub identity: IdentityService,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<MockNotifier>,
}

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        log_level: "debug".to_string(),
        jwt: JwtConfig {
            secret: "integration-test-secret-0123456789abcdef".to_string(),
            issuer: "identity-service".to_string(),
            audience: "erp-api".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            two_factor_token_expiry_minutes: 5,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from_email: "noreply@localhost".to_string(),
        },
        rate_limit: RateLimitConfig {
            ip_limit: 1000,
            ip_window_seconds: 3600,
            user_limit: 5000,
            user_window_seconds: 3600,
        },
        totp_issuer: "identity-service".to_string(),
        maintenance_interval_seconds: 300,
    }
}

pub fn setup() -> TestHarness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();

    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(MockNotifier::new());
    let identity = IdentityService::new(&test_config(), store.clone(), notifier.clone());
    TestHarness {
        identity,
        store,
        notifier,
    }
}

/// Pull the token out of the most recent email; tokens are rendered inside a
/// `<code>` element.
pub fn token_from_last_email(notifier: &MockNotifier) -> String {
    let email = notifier.last_email().expect("no email was sent");
    let start = email.html.find("<code>").expect("no token in email") + "<code>".len();
    let end = email.html.find("</code>").expect("no token in email");
    email.html[start..end].to_string()
}

/// Register an account and complete email verification.
pub async fn register_verified(harness: &TestHarness, email: &str) -> SanitizedUser {
    harness
        .identity
        .auth
        .register(email, None, None, TEST_PASSWORD, TEST_IP)
        .await
        .expect("registration failed");

    let token = token_from_last_email(&harness.notifier);
    harness
        .identity
        .auth
        .verify_email(&token)
        .await
        .expect("email verification failed")
}
