//! Benchmark smoke test for cached validation and profile decoding.

use std::sync::Arc;
use std::time::Instant;

use posguard_core::UserProfile;
use posguard_identity::{ManualClock, ScriptedIdentityGateway};
use posguard_session::{SignOutReason, SignOutSink, ValidationCache};

struct IgnoreSignOut;

impl SignOutSink for IgnoreSignOut {
    fn sign_out(&self, _reason: SignOutReason) {}
}

#[tokio::test]
async fn benchmark_cached_checks_stay_off_the_provider() {
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let gateway = Arc::new(ScriptedIdentityGateway::new(clock.clone()));
    gateway.set_session(Some(gateway.session_for("bench-user", 1_700_003_600)));
    let cache = ValidationCache::new(
        gateway.clone(),
        clock,
        Arc::new(IgnoreSignOut),
        std::time::Duration::from_secs(30),
    );

    let start = Instant::now();
    let mut valid = 0usize;
    for _ in 0..10_000 {
        if cache.check().await {
            valid += 1;
        }
    }

    let elapsed_ms = start.elapsed().as_millis();
    println!("benchmark_cached_check_elapsed_ms={elapsed_ms}");
    println!("benchmark_provider_reads={}", gateway.session_reads());

    assert_eq!(valid, 10_000);
    assert_eq!(gateway.session_reads(), 1);
    // Lightweight guardrail; strict latency budgets are environment-specific.
    assert!(elapsed_ms < 5_000, "cached checks should stay bounded");
}

#[test]
fn benchmark_profile_decode_smoke_prints_latency() {
    let user = r#"{"user_id":"u-1","auth_user_id":"a-1","tenants":{"tenant_id":"t-1","name":"Bench"}}"#;
    let mut links = Vec::new();
    for index in 0..50 {
        links.push(format!(
            r#"{{"permission":{{"permission_id":"p-{index}","code":"perm.{}"}}}}"#,
            index % 25
        ));
    }
    let roles = format!(
        r#"[{{"role":{{"role_id":"r-1","name":"manager","role_permissions":[{}]}}}}]"#,
        links.join(",")
    );

    let start = Instant::now();
    let mut permission_total = 0usize;
    for _ in 0..1_000 {
        let profile = UserProfile::from_json(user, &roles).expect("profile should decode");
        permission_total += profile.permissions.len();
    }

    let elapsed_ms = start.elapsed().as_millis();
    println!("benchmark_profile_decode_elapsed_ms={elapsed_ms}");

    assert_eq!(permission_total, 25_000);
    assert!(elapsed_ms < 5_000, "profile decode smoke should stay bounded");
}
