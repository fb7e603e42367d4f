#![warn(missing_docs)]
//! # posguard-identity
//!
//! ## Purpose
//! Defines the contract the session guard consumes from the external identity
//! provider, plus the credential and event types that cross it.
//!
//! ## Responsibilities
//! - Describe the three provider operations the guard depends on
//!   ([`IdentityGateway`]).
//! - Model credentials with epoch-second expiry and freshness helpers.
//! - Validate provider configuration (HTTPS endpoint, non-empty anon key).
//! - Classify request-layer errors that mean "the credential was rejected".
//! - Ship a deterministic in-memory provider ([`ScriptedIdentityGateway`]) for
//!   tests and the demo binary.
//!
//! ## Data flow
//! Provider pushes [`AuthEvent`]s through an [`AuthSubscription`] -> the
//! session guard reacts. The guard pulls [`Session`]s through
//! [`IdentityGateway::current_session`] and
//! [`IdentityGateway::refresh_session`].
//!
//! ## Ownership and lifetimes
//! Sessions are owned values handed out by the gateway. The guard keeps only
//! the expiry and user, never the token.
//!
//! ## Error model
//! Provider failures are reported as [`IdentityError`]; the session guard
//! resolves them locally and never lets them escape to its callers.
//!
//! ## Security and privacy notes
//! [`SecretToken`] redacts itself in `Debug` output. Logs may carry the
//! SHA-256 [`SecretToken::fingerprint`] instead of the value.
//!
//! ## Example
//! ```rust
//! use posguard_identity::{Credential, SecretToken};
//!
//! let credential = Credential::new(SecretToken::new("jwt"), 1_000);
//! assert_eq!(credential.seconds_remaining(900), 100);
//! assert!(credential.is_expired(1_000));
//! ```

mod scripted;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use posguard_core::AuthUser;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub use scripted::{RefreshBehavior, ScriptedIdentityGateway};

/// Data-platform error code returned when a JWT is rejected.
pub const JWT_REJECTED_CODE: &str = "PGRST301";

/// Opaque bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    /// Wraps a raw token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Exposes the raw value for request signing.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 hex chars of the token's SHA-256 digest.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(12);
        encoded
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretToken(<redacted:{}>)", self.fingerprint())
    }
}

/// Token plus absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer token used by downstream calls.
    pub access_token: SecretToken,
    /// Absolute expiry in Unix epoch seconds.
    pub expires_at: u64,
}

impl Credential {
    /// Creates a credential.
    pub fn new(access_token: SecretToken, expires_at: u64) -> Self {
        Self {
            access_token,
            expires_at,
        }
    }

    /// Signed seconds left before expiry at `now`; negative once expired.
    ///
    /// Saturates at the `i64` bounds.
    pub fn seconds_remaining(&self, now: u64) -> i64 {
        if self.expires_at >= now {
            i64::try_from(self.expires_at - now).unwrap_or(i64::MAX)
        } else {
            i64::try_from(now - self.expires_at).map_or(i64::MIN, |elapsed| -elapsed)
        }
    }

    /// Returns `true` when `expires_at <= now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Provider session: credential plus the user it was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Current credential.
    pub credential: Credential,
    /// Signed-in user.
    pub user: AuthUser,
}

impl Session {
    /// Creates a session.
    pub fn new(user: AuthUser, credential: Credential) -> Self {
        Self { credential, user }
    }

    /// Shorthand for `self.credential.expires_at`.
    pub fn expires_at(&self) -> u64 {
        self.credential.expires_at
    }
}

/// Kinds of push notifications delivered by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthEventKind {
    /// Session restored from local storage at startup.
    InitialSession,
    /// Interactive sign-in completed.
    SignedIn,
    /// Session ended.
    SignedOut,
    /// Access token was refreshed.
    TokenRefreshed,
}

impl AuthEventKind {
    /// Wire name used by the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialSession => "INITIAL_SESSION",
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
        }
    }
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    /// What happened.
    pub kind: AuthEventKind,
    /// Session after the event, if any.
    pub session: Option<Session>,
}

impl AuthEvent {
    /// Creates an event.
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

/// Ordered stream of provider events. Dropping it unsubscribes.
#[derive(Debug)]
pub struct AuthSubscription {
    receiver: mpsc::UnboundedReceiver<AuthEvent>,
}

impl AuthSubscription {
    /// Creates a subscription pair; the provider keeps the sender.
    pub fn channel() -> (mpsc::UnboundedSender<AuthEvent>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }

    /// Waits for the next event; `None` once the provider hung up.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        self.receiver.recv().await
    }
}

/// Contract the session guard consumes from the identity provider.
///
/// Events from [`IdentityGateway::subscribe`] arrive on one logical stream,
/// one at a time, in delivery order.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Reads the locally held session without network access.
    ///
    /// # Errors
    /// Returns [`IdentityError::Storage`] when local session storage cannot
    /// be read.
    async fn current_session(&self) -> Result<Option<Session>, IdentityError>;

    /// Exchanges the refresh token for a new session.
    ///
    /// # Errors
    /// Returns any [`IdentityError`] on rejection or transport failure.
    async fn refresh_session(&self) -> Result<Session, IdentityError>;

    /// Registers for push notifications.
    fn subscribe(&self) -> AuthSubscription;
}

/// Wall-clock source in epoch seconds.
pub trait Clock: Send + Sync {
    /// Current Unix time in seconds.
    fn now_epoch_secs(&self) -> u64;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Manually driven [`Clock`] for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Moves the clock forward by `seconds`.
    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Jumps to `now`.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Provider connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the identity/data platform.
    pub url: String,
    /// Public anonymous API key.
    pub anon_key: String,
}

impl ProviderConfig {
    /// Creates validated provider settings.
    ///
    /// # Errors
    /// Returns [`IdentityError::InvalidConfig`] for a non-HTTPS URL (plain
    /// HTTP is allowed only for `localhost`) or a blank anon key.
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self, IdentityError> {
        let config = Self {
            url: url.into(),
            anon_key: anon_key.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks settings, e.g. after deserialization.
    ///
    /// # Errors
    /// See [`ProviderConfig::new`].
    pub fn validate(&self) -> Result<(), IdentityError> {
        validate_provider_url(&self.url)?;
        if self.anon_key.trim().is_empty() {
            return Err(IdentityError::InvalidConfig(
                "provider anon key must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validates the provider base URL.
///
/// # Errors
/// Returns [`IdentityError::InvalidConfig`] for unparsable URLs, non-HTTPS
/// schemes on non-local hosts, or URLs without a host.
pub fn validate_provider_url(url: &str) -> Result<(), IdentityError> {
    let parsed = Url::parse(url)
        .map_err(|error| IdentityError::InvalidConfig(format!("invalid provider url: {error}")))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| IdentityError::InvalidConfig("provider url has no host".to_string()))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" if host == "localhost" || host == "127.0.0.1" => Ok(()),
        other => Err(IdentityError::InvalidConfig(format!(
            "provider url must use https, got {other}"
        ))),
    }
}

/// Returns `true` when a request-layer error means the credential was
/// rejected and the user must sign in again.
pub fn is_auth_failure(message: &str, code: Option<&str>) -> bool {
    if code == Some(JWT_REJECTED_CODE) {
        return true;
    }
    ["JWT", "expired", "invalid"]
        .iter()
        .any(|marker| message.contains(marker))
}

/// Errors reported by the identity provider boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// No session is held.
    #[error("no active session")]
    NoSession,
    /// Refresh token expired or was revoked.
    #[error("session expired: {0}")]
    Expired(String),
    /// Provider rejected the request.
    #[error("provider rejected request: {0}")]
    Rejected(String),
    /// Transport failure.
    #[error("network failure: {0}")]
    Network(String),
    /// Local session storage could not be read.
    #[error("session storage failure: {0}")]
    Storage(String),
    /// Provider settings are invalid.
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for credential freshness and provider settings.

    use super::*;

    #[test]
    fn validates_provider_url_policy() {
        validate_provider_url("https://project.example.test").expect("https should pass");
        validate_provider_url("http://localhost:54321").expect("local http should pass");
        assert!(validate_provider_url("http://project.example.test").is_err());
        assert!(validate_provider_url("not a url").is_err());
    }

    #[test]
    fn rejects_blank_anon_key() {
        assert!(ProviderConfig::new("https://project.example.test", "  ").is_err());
    }

    #[test]
    fn credential_remaining_goes_negative_after_expiry() {
        let credential = Credential::new(SecretToken::new("t"), 100);
        assert_eq!(credential.seconds_remaining(110), -10);
        assert!(credential.is_expired(100));
        assert!(!credential.is_expired(99));
    }

    #[test]
    fn credential_remaining_saturates_for_extreme_timestamps() {
        let far = Credential::new(SecretToken::new("t"), u64::MAX);
        assert_eq!(far.seconds_remaining(0), i64::MAX);
        assert!(!far.is_expired(u64::MAX - 1));

        let ancient = Credential::new(SecretToken::new("t"), 0);
        assert_eq!(ancient.seconds_remaining(u64::MAX), i64::MIN);
        assert_eq!(ancient.seconds_remaining(5), -5);
    }

    #[test]
    fn debug_output_redacts_token() {
        let token = SecretToken::new("super-secret-jwt");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("super-secret-jwt"));
        assert!(rendered.contains(&token.fingerprint()));
        assert_eq!(token.fingerprint().len(), 12);
    }

    #[test]
    fn classifies_auth_failures() {
        assert!(is_auth_failure("JWT expired", None));
        assert!(is_auth_failure("whatever", Some(JWT_REJECTED_CODE)));
        assert!(!is_auth_failure("duplicate key value", Some("23505")));
    }
}
