//! Identity and access subsystem for a multi-store ERP: authentication with
//! lockout and two-factor, password policy enforcement, RBAC, API keys,
//! store access grants, rate limiting, and an append-only audit log.

pub mod config;
pub mod models;
pub mod notifier;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::config::IdentityConfig;
use crate::notifier::Notifier;
use crate::services::{
    maintenance, ApiKeyService, AuditService, AuthService, PasswordPolicyService, RateLimiter,
    RbacService, SessionService, StoreAccessService, TwoFactorService,
};
use crate::store::CredentialStore;

/// Initialize structured logging. `log_level` is the default filter; RUST_LOG
/// overrides it.
pub fn init_tracing(service_name: &str, log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    tracing::info!(service = %service_name, "Tracing initialized");
}

/// Wired-up service graph over one credential store and one notifier.
#[derive(Clone)]
pub struct IdentityService {
    pub auth: AuthService,
    pub two_factor: TwoFactorService,
    pub password_policy: PasswordPolicyService,
    pub rbac: RbacService,
    pub store_access: StoreAccessService,
    pub api_keys: ApiKeyService,
    pub audit: AuditService,
    pub session: SessionService,
    pub limiter: Arc<RateLimiter>,
    store: Arc<dyn CredentialStore>,
    maintenance_interval: Duration,
}

impl IdentityService {
    pub fn new(
        config: &IdentityConfig,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::with_config(&config.rate_limit));
        let session = SessionService::new(&config.jwt);
        let audit = AuditService::new(store.clone());
        let password_policy = PasswordPolicyService::new(store.clone());
        let rbac = RbacService::new(store.clone(), audit.clone());
        let store_access = StoreAccessService::new(store.clone(), audit.clone());
        let two_factor = TwoFactorService::new(
            store.clone(),
            notifier.clone(),
            audit.clone(),
            config.totp_issuer.clone(),
        );
        let api_keys = ApiKeyService::new(store.clone(), audit.clone(), limiter.clone());
        let auth = AuthService::new(
            store.clone(),
            notifier,
            session.clone(),
            two_factor.clone(),
            rbac.clone(),
            store_access.clone(),
            password_policy.clone(),
            audit.clone(),
            limiter.clone(),
        );

        Self {
            auth,
            two_factor,
            password_policy,
            rbac,
            store_access,
            api_keys,
            audit,
            session,
            limiter,
            store,
            maintenance_interval: Duration::from_secs(config.maintenance_interval_seconds),
        }
    }

    /// Seed system roles and the default permission catalog. Idempotent.
    pub async fn initialize(&self) -> Result<(), services::ServiceError> {
        self.rbac.initialize_default_roles().await
    }

    /// Start the background maintenance loop. Abort the handle on shutdown.
    pub fn start_maintenance(&self) -> JoinHandle<()> {
        maintenance::spawn_maintenance(
            self.store.clone(),
            self.audit.clone(),
            self.limiter.clone(),
            self.maintenance_interval,
        )
    }
}
