//! Append-only audit log with query, compliance, and anomaly views.
//!
//! Recording must never fail into the caller's control flow: a business
//! operation proceeds even when its audit write does not, and the failure is
//! only surfaced through local error logging.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::audit::actions;
use crate::models::{AuditEvent, AuditPage, AuditQuery, AuditSeverity};
use crate::services::ServiceError;
use crate::store::CredentialStore;

/// Failed logins from a single IP in 24h that trigger a CRITICAL finding.
const FAILED_LOGIN_IP_THRESHOLD: usize = 10;
/// Privilege changes in 24h that trigger a WARN finding.
const PRIVILEGE_CHANGE_THRESHOLD: usize = 5;
/// Default retention window when no policy is configured, in days (~7 years).
const DEFAULT_RETENTION_DAYS: i64 = 2555;

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn CredentialStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Record an event, swallowing any store failure. Callers never see an
    /// error from this path.
    pub async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.store.insert_audit_event(event.clone()).await {
            tracing::error!(
                error = %e,
                action = %event.action,
                "Failed to write audit event"
            );
        }
    }

    // --- conventions ---

    pub async fn log_auth_event(
        &self,
        action: &str,
        user_id: Option<Uuid>,
        success: bool,
        ip: Option<&str>,
    ) {
        let severity = if success {
            AuditSeverity::Info
        } else {
            AuditSeverity::Warn
        };
        let mut event = AuditEvent::new(action, "user", severity)
            .with_metadata(json!({ "success": success }));
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        if let Some(ip) = ip {
            event = event.with_ip(ip);
        }
        self.record(event).await;
    }

    pub async fn log_data_access(
        &self,
        user_id: Uuid,
        resource: &str,
        is_export: bool,
        store_id: Option<Uuid>,
    ) {
        let (action, severity) = if is_export {
            (actions::DATA_EXPORT, AuditSeverity::Warn)
        } else {
            ("data.read", AuditSeverity::Info)
        };
        let mut event = AuditEvent::new(action, resource, severity).with_user(user_id);
        if let Some(store_id) = store_id {
            event = event.with_store(store_id);
        }
        self.record(event).await;
    }

    pub async fn log_permission_change(
        &self,
        action: &str,
        actor: Option<Uuid>,
        resource: &str,
        resource_id: &str,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) {
        let mut event = AuditEvent::new(action, resource, AuditSeverity::Warn)
            .with_resource_id(resource_id)
            .with_snapshots(before, after);
        if let Some(actor) = actor {
            event = event.with_user(actor);
        }
        self.record(event).await;
    }

    pub async fn log_config_change(
        &self,
        action: &str,
        actor: Option<Uuid>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) {
        let mut event = AuditEvent::new(action, "configuration", AuditSeverity::Warn)
            .with_snapshots(before, after);
        if let Some(actor) = actor {
            event = event.with_user(actor);
        }
        self.record(event).await;
    }

    pub async fn log_security_event(&self, action: &str, user_id: Option<Uuid>, detail: &str) {
        let mut event = AuditEvent::new(action, "security", AuditSeverity::Critical)
            .with_metadata(json!({ "detail": detail }));
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        tracing::warn!(action = %action, detail = %detail, "Security event");
        self.record(event).await;
    }

    // --- query & reporting ---

    pub async fn query(&self, query: AuditQuery) -> Result<AuditPage, ServiceError> {
        let (events, total) = self.store.query_audit_events(&query).await?;
        Ok(AuditPage {
            events,
            total,
            page: query.page.max(1),
            page_size: if query.page_size == 0 { 50 } else { query.page_size },
        })
    }

    /// Aggregate counts over a window.
    pub async fn statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<AuditStatistics, ServiceError> {
        let events = self.store.audit_events_between(from, to).await?;

        let mut by_action: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut by_user: HashMap<Uuid, usize> = HashMap::new();
        for event in &events {
            *by_action.entry(event.action.clone()).or_default() += 1;
            *by_severity
                .entry(event.severity.as_str().to_string())
                .or_default() += 1;
            if let Some(user_id) = event.user_id {
                *by_user.entry(user_id).or_default() += 1;
            }
        }

        let mut top_users: Vec<(Uuid, usize)> = by_user.into_iter().collect();
        top_users.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
        top_users.truncate(10);

        Ok(AuditStatistics {
            total: events.len(),
            by_action,
            by_severity,
            top_users,
        })
    }

    pub async fn login_activity_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<LoginActivityReport, ServiceError> {
        let events = self.store.audit_events_between(from, to).await?;

        let mut successes = 0usize;
        let mut failures = 0usize;
        let mut users: std::collections::HashSet<Uuid> = std::collections::HashSet::new();
        for event in &events {
            match event.action.as_str() {
                a if a == actions::LOGIN_SUCCESS => {
                    successes += 1;
                    if let Some(user_id) = event.user_id {
                        users.insert(user_id);
                    }
                }
                a if a == actions::LOGIN_FAILED => failures += 1,
                _ => {}
            }
        }

        Ok(LoginActivityReport {
            from,
            to,
            successful_logins: successes,
            failed_logins: failures,
            unique_users: users.len(),
        })
    }

    /// Counts of compliance-relevant event classes over a window.
    pub async fn compliance_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ComplianceReport, ServiceError> {
        let events = self.store.audit_events_between(from, to).await?;

        let mut report = ComplianceReport {
            from,
            to,
            sensitive_access_events: 0,
            privilege_change_events: 0,
            security_events: 0,
            failed_login_events: 0,
            config_change_events: 0,
        };
        for event in &events {
            let action = event.action.as_str();
            if action.starts_with(actions::DATA_PREFIX) {
                report.sensitive_access_events += 1;
            }
            if action.starts_with(actions::PRIVILEGE_PREFIX) {
                report.privilege_change_events += 1;
            }
            if action.starts_with(actions::SECURITY_PREFIX)
                || event.severity == AuditSeverity::Critical
            {
                report.security_events += 1;
            }
            if action == actions::LOGIN_FAILED {
                report.failed_login_events += 1;
            }
            if action.starts_with(actions::CONFIG_PREFIX) {
                report.config_change_events += 1;
            }
        }
        Ok(report)
    }

    /// Heuristic scan of the last 24 hours for suspicious patterns.
    pub async fn detect_suspicious_activity(&self) -> Result<Vec<SuspiciousFinding>, ServiceError> {
        let to = Utc::now();
        let from = to - Duration::hours(24);
        let events = self.store.audit_events_between(from, to).await?;

        let mut findings = Vec::new();

        let mut failed_by_ip: HashMap<String, usize> = HashMap::new();
        let mut privilege_changes = 0usize;
        let mut has_critical = false;
        for event in &events {
            if event.action == actions::LOGIN_FAILED {
                if let Some(ip) = &event.ip_address {
                    *failed_by_ip.entry(ip.clone()).or_default() += 1;
                }
            }
            if event.action.starts_with(actions::PRIVILEGE_PREFIX) {
                privilege_changes += 1;
            }
            if event.severity == AuditSeverity::Critical {
                has_critical = true;
            }
        }

        for (ip, count) in failed_by_ip {
            if count > FAILED_LOGIN_IP_THRESHOLD {
                findings.push(SuspiciousFinding {
                    severity: AuditSeverity::Critical,
                    description: format!("{} failed logins from {} in the last 24h", count, ip),
                });
            }
        }
        if has_critical {
            findings.push(SuspiciousFinding {
                severity: AuditSeverity::Critical,
                description: "CRITICAL audit events present in the last 24h".to_string(),
            });
        }
        if privilege_changes > PRIVILEGE_CHANGE_THRESHOLD {
            findings.push(SuspiciousFinding {
                severity: AuditSeverity::Warn,
                description: format!("{} privilege changes in the last 24h", privilege_changes),
            });
        }

        Ok(findings)
    }

    /// Purge events past the retention window. CRITICAL events are kept.
    pub async fn clean_old_logs(&self) -> Result<u64, ServiceError> {
        let retention_days = self
            .store
            .active_password_policy()
            .await?
            .map(|p| p.data_retention_days)
            .unwrap_or(DEFAULT_RETENTION_DAYS);
        let cutoff = Utc::now() - Duration::days(retention_days);

        let purged = self.store.purge_audit_events_before(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, retention_days, "Purged expired audit events");
        }
        Ok(purged)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditStatistics {
    pub total: usize,
    pub by_action: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub top_users: Vec<(Uuid, usize)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginActivityReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub successful_logins: usize,
    pub failed_logins: usize,
    pub unique_users: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub sensitive_access_events: usize,
    pub privilege_change_events: usize,
    pub security_events: usize,
    pub failed_login_events: usize,
    pub config_change_events: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousFinding {
    pub severity: AuditSeverity,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> (AuditService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (AuditService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_query_filters_by_severity() {
        let (audit, _store) = service();
        audit
            .record(AuditEvent::new("a.one", "user", AuditSeverity::Info))
            .await;
        audit
            .record(AuditEvent::new("a.two", "user", AuditSeverity::Warn))
            .await;

        let page = audit
            .query(AuditQuery {
                severity: Some(AuditSeverity::Warn),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.events[0].action, "a.two");
    }

    #[tokio::test]
    async fn test_failed_login_burst_is_critical_finding() {
        let (audit, _store) = service();
        for _ in 0..11 {
            audit
                .record(
                    AuditEvent::new(actions::LOGIN_FAILED, "user", AuditSeverity::Warn)
                        .with_ip("203.0.113.9"),
                )
                .await;
        }

        let findings = audit.detect_suspicious_activity().await.unwrap();
        assert!(findings
            .iter()
            .any(|f| f.severity == AuditSeverity::Critical && f.description.contains("203.0.113.9")));
    }

    #[tokio::test]
    async fn test_privilege_change_burst_is_warn_finding() {
        let (audit, _store) = service();
        for _ in 0..6 {
            audit
                .record(AuditEvent::new(
                    actions::ROLE_ASSIGNED,
                    "role",
                    AuditSeverity::Warn,
                ))
                .await;
        }

        let findings = audit.detect_suspicious_activity().await.unwrap();
        assert!(findings.iter().any(|f| f.severity == AuditSeverity::Warn));
    }

    #[tokio::test]
    async fn test_compliance_report_classifies_events() {
        let (audit, _store) = service();
        audit
            .record(AuditEvent::new(actions::DATA_EXPORT, "reports", AuditSeverity::Warn))
            .await;
        audit
            .record(AuditEvent::new(actions::ROLE_ASSIGNED, "role", AuditSeverity::Warn))
            .await;
        audit
            .record(AuditEvent::new(actions::LOGIN_FAILED, "user", AuditSeverity::Warn))
            .await;
        audit
            .record(AuditEvent::new(
                actions::CONFIG_POLICY_UPDATED,
                "configuration",
                AuditSeverity::Warn,
            ))
            .await;

        let report = audit
            .compliance_report(Utc::now() - Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.sensitive_access_events, 1);
        assert_eq!(report.privilege_change_events, 1);
        assert_eq!(report.failed_login_events, 1);
        assert_eq!(report.config_change_events, 1);
    }

    #[tokio::test]
    async fn test_retention_keeps_critical() {
        let (audit, store) = service();
        let old = Utc::now() - Duration::days(3000);

        let mut info = AuditEvent::new("auth.login.success", "user", AuditSeverity::Info);
        info.created_at = old;
        let mut critical = AuditEvent::new("security.incident", "security", AuditSeverity::Critical);
        critical.created_at = old;
        store.insert_audit_event(info).await.unwrap();
        store.insert_audit_event(critical).await.unwrap();

        let purged = audit.clean_old_logs().await.unwrap();
        assert_eq!(purged, 1);

        let page = audit.query(AuditQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.events[0].severity, AuditSeverity::Critical);
    }
}
