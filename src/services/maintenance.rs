//! Background maintenance: expired-token purges, rate-limit sweeps, and
//! audit retention, on one interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::services::audit::AuditService;
use crate::services::rate_limit::RateLimiter;
use crate::store::CredentialStore;

/// Run one maintenance pass. Failures are logged; a failing sweep never
/// stops the loop.
pub async fn run_once(store: &dyn CredentialStore, audit: &AuditService, limiter: &RateLimiter) {
    match store.purge_expired_otp_tokens(Utc::now()).await {
        Ok(purged) if purged > 0 => {
            tracing::debug!(purged, "Purged expired one-time tokens");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Failed to purge expired one-time tokens"),
    }

    let swept = limiter.sweep_expired();
    if swept > 0 {
        tracing::debug!(swept, "Swept expired rate-limit windows");
    }

    if let Err(e) = audit.clean_old_logs().await {
        tracing::error!(error = %e, "Audit retention sweep failed");
    }
}

/// Spawn the maintenance loop. The handle can be aborted on shutdown.
pub fn spawn_maintenance(
    store: Arc<dyn CredentialStore>,
    audit: AuditService,
    limiter: Arc<RateLimiter>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately; skip it so startup stays quiet.
        interval.tick().await;
        loop {
            interval.tick().await;
            run_once(store.as_ref(), &audit, &limiter).await;
        }
    })
}
