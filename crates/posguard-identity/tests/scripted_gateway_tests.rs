//! Integration tests for the scripted identity provider and request-error
//! classification.

use std::sync::Arc;
use std::time::Duration;

use posguard_identity::{
    AuthEventKind, IdentityError, IdentityGateway, ManualClock, ProviderConfig, RefreshBehavior,
    ScriptedIdentityGateway, is_auth_failure,
};

#[tokio::test]
async fn scripted_gateway_tests_events_arrive_in_delivery_order() {
    let gateway = ScriptedIdentityGateway::new(Arc::new(ManualClock::new(1_000)));
    let mut events = gateway.subscribe();

    gateway.sign_in(gateway.session_for("user-1", 2_000));
    gateway.sign_out();

    let first = events.next().await.expect("sign-in event");
    let second = events.next().await.expect("sign-out event");
    assert_eq!(first.kind, AuthEventKind::SignedIn);
    assert_eq!(first.session.map(|s| s.user.id), Some("user-1".to_string()));
    assert_eq!(second.kind, AuthEventKind::SignedOut);
    assert!(second.session.is_none());
}

#[tokio::test]
async fn scripted_gateway_tests_lookup_failure_is_reported_and_resettable() {
    let gateway = ScriptedIdentityGateway::new(Arc::new(ManualClock::new(0)));
    gateway.set_session(Some(gateway.session_for("user-1", 100)));
    gateway.fail_lookups(Some(IdentityError::Storage("locked".to_string())));

    assert_eq!(
        gateway.current_session().await,
        Err(IdentityError::Storage("locked".to_string()))
    );

    gateway.fail_lookups(None);
    let session = gateway
        .current_session()
        .await
        .expect("lookup should succeed")
        .expect("session should be held");
    assert_eq!(session.expires_at(), 100);
    assert_eq!(gateway.session_reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn scripted_gateway_tests_failed_refresh_keeps_old_session() {
    let clock = Arc::new(ManualClock::new(500));
    let gateway = ScriptedIdentityGateway::new(clock);
    gateway.set_session(Some(gateway.session_for("user-1", 510)));
    gateway.set_refresh_delay(Duration::from_secs(2));
    gateway.set_refresh_behavior(RefreshBehavior::Fail(IdentityError::Expired(
        "refresh token revoked".to_string(),
    )));

    let result = gateway.refresh_session().await;

    assert!(matches!(result, Err(IdentityError::Expired(_))));
    let held = gateway
        .current_session()
        .await
        .expect("lookup should succeed")
        .expect("session should still be held");
    assert_eq!(held.expires_at(), 510);
}

#[test]
fn scripted_gateway_tests_provider_config_rejects_plain_http_remote() {
    let error = ProviderConfig::new("http://pos.example.test", "anon").unwrap_err();
    assert!(matches!(error, IdentityError::InvalidConfig(_)));
    assert!(ProviderConfig::new("https://pos.example.test", "anon").is_ok());
}

#[test]
fn scripted_gateway_tests_transient_errors_are_not_auth_failures() {
    assert!(!is_auth_failure("connection reset by peer", None));
    assert!(!is_auth_failure("timeout", Some("504")));
    assert!(is_auth_failure("invalid claim: missing sub", Some("401")));
}
