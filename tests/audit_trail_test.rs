//! Audit trail coverage of the main flows.

mod common;

use chrono::{Duration, Utc};
use common::{register_verified, setup, TEST_IP, TEST_PASSWORD};
use identity_service::models::audit::actions;
use identity_service::models::{AuditQuery, AuditSeverity};

#[tokio::test]
async fn test_login_success_and_failure_are_recorded() {
    let harness = setup();
    let user = register_verified(&harness, "audited@example.com").await;

    let _ = harness
        .identity
        .auth
        .login("audited@example.com", "Wrong#Pass1!", TEST_IP, None)
        .await;
    harness
        .identity
        .auth
        .login("audited@example.com", TEST_PASSWORD, TEST_IP, None)
        .await
        .unwrap();

    let failures = harness
        .identity
        .audit
        .query(AuditQuery {
            action: Some(actions::LOGIN_FAILED.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failures.total, 1);

    let successes = harness
        .identity
        .audit
        .query(AuditQuery {
            user_id: Some(user.user_id),
            action: Some(actions::LOGIN_SUCCESS.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(successes.total, 1);
}

#[tokio::test]
async fn test_lockout_emits_critical_security_event() {
    let harness = setup();
    register_verified(&harness, "victim@example.com").await;

    for _ in 0..5 {
        let _ = harness
            .identity
            .auth
            .login("victim@example.com", "Wrong#Pass1!", TEST_IP, None)
            .await;
    }

    let critical = harness
        .identity
        .audit
        .query(AuditQuery {
            severity: Some(AuditSeverity::Critical),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(critical
        .events
        .iter()
        .any(|e| e.action == "security.account.locked"));
}

#[tokio::test]
async fn test_privilege_changes_appear_in_compliance_report() {
    let harness = setup();
    harness.identity.initialize().await.unwrap();
    let user = register_verified(&harness, "promoted@example.com").await;

    let roles = harness.identity.rbac.list_roles().await.unwrap();
    let admin = roles.iter().find(|r| r.name == "admin").unwrap();
    harness
        .identity
        .rbac
        .assign_role(user.user_id, admin.role_id, None)
        .await
        .unwrap();

    let report = harness
        .identity
        .audit
        .compliance_report(Utc::now() - Duration::hours(1), Utc::now())
        .await
        .unwrap();
    assert!(report.privilege_change_events >= 1);
}

#[tokio::test]
async fn test_login_activity_report_counts() {
    let harness = setup();
    register_verified(&harness, "reporter@example.com").await;

    let _ = harness
        .identity
        .auth
        .login("reporter@example.com", "Wrong#Pass1!", TEST_IP, None)
        .await;
    harness
        .identity
        .auth
        .login("reporter@example.com", TEST_PASSWORD, TEST_IP, None)
        .await
        .unwrap();
    harness
        .identity
        .auth
        .login("reporter@example.com", TEST_PASSWORD, TEST_IP, None)
        .await
        .unwrap();

    let report = harness
        .identity
        .audit
        .login_activity_report(Utc::now() - Duration::hours(1), Utc::now())
        .await
        .unwrap();
    assert_eq!(report.successful_logins, 2);
    assert_eq!(report.failed_logins, 1);
    assert_eq!(report.unique_users, 1);
}

#[tokio::test]
async fn test_pagination_is_stable() {
    let harness = setup();
    register_verified(&harness, "pager@example.com").await;

    for _ in 0..7 {
        let _ = harness
            .identity
            .auth
            .login("pager@example.com", TEST_PASSWORD, TEST_IP, None)
            .await;
    }

    let page1 = harness
        .identity
        .audit
        .query(AuditQuery {
            action: Some(actions::LOGIN_SUCCESS.to_string()),
            page: 1,
            page_size: 5,
            ..Default::default()
        })
        .await
        .unwrap();
    let page2 = harness
        .identity
        .audit
        .query(AuditQuery {
            action: Some(actions::LOGIN_SUCCESS.to_string()),
            page: 2,
            page_size: 5,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(page1.total, 7);
    assert_eq!(page1.events.len(), 5);
    assert_eq!(page2.events.len(), 2);
    let ids1: Vec<_> = page1.events.iter().map(|e| e.event_id).collect();
    assert!(page2.events.iter().all(|e| !ids1.contains(&e.event_id)));
}
