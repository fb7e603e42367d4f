//! Integration tests for log redaction.

use posguard_app::redact_sensitive;

#[test]
fn log_redaction_tests_removes_bearer_credentials() {
    let raw = "authorization=Bearer abc123 rejected";
    let redacted = redact_sensitive(raw);

    assert_eq!(redacted, "authorization=<redacted> <redacted> rejected");
    assert!(!redacted.contains("abc123"));
}

#[test]
fn log_redaction_tests_redacts_inline_and_following_values() {
    assert_eq!(
        redact_sensitive("refresh_token=r-77 password: hunter2"),
        "refresh_token=<redacted> password: <redacted>"
    );
}

#[test]
fn log_redaction_tests_keeps_plain_messages() {
    let raw = "JWT expired after 3 tokens";
    assert_eq!(redact_sensitive(raw), raw);
}
