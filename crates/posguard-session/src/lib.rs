#![warn(missing_docs)]
//! # posguard-session
//!
//! ## Purpose
//! Keeps the point-of-sale client's belief about its authentication token
//! correct: cached validity checks, proactive refresh, visibility-driven
//! revalidation, and the auth state that the router and UI read.
//!
//! ## Responsibilities
//! - [`ValidationCache`]: TTL-bounded, single-flight answer to "is the
//!   credential usable right now?".
//! - [`SessionMonitor`]: periodic timer plus visibility listener that refresh
//!   tokens ahead of expiry.
//! - [`AuthStateMachine`]: derives [`AuthState`] from provider events, defers
//!   profile loading onto a [`TaskQueue`], clears dependent contexts on
//!   sign-out.
//! - [`RouteGuard`]: navigation decisions backed by the cache.
//! - [`SessionGuard`]: owns one of each and pumps provider events into them.
//!
//! ## Data flow
//! Provider events -> [`SessionGuard`] pump -> cache invalidation +
//! [`AuthStateMachine::handle_event`]. Request-layer callers ->
//! [`ValidationCache::check`]. [`SessionMonitor`] ticks ->
//! [`ValidationCache::revalidate`] -> provider refresh.
//!
//! ## Ownership and lifetimes
//! Every component is a cheap `Clone` handle over `Arc` state. The auth state
//! lives in one `watch` channel whose only sender is the state machine.
//! Mutex guards are never held across an `.await`.
//!
//! ## Error model
//! Validation failures resolve to `false` (or a [`ValidationOutcome`]) and the
//! sign-out path; they are logged, never returned as errors. Profile failures
//! leave the user authenticated without permissions.
//!
//! ## Security and privacy notes
//! Only token fingerprints are logged. [`AuthState`] keeps the expiry and user
//! but never the token.

mod cache;
mod guard;
mod machine;
mod monitor;
mod navigation;
mod single_flight;
mod tasks;

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use cache::{RefreshPolicy, ValidationCache, ValidationOutcome, ValidationVerdict};
pub use guard::{SessionGuard, SessionGuardBuilder};
pub use machine::{AuthState, AuthStateMachine, ProfileError, ProfileLoader, SessionSummary};
pub use monitor::{SessionMonitor, Visibility, VisibilitySignal};
pub use navigation::{HistoryNavigator, NavigationDecision, Navigator, RouteAccess, RouteGuard};
pub use single_flight::{FlightAborted, SingleFlight};
pub use tasks::{TaskQueue, TaskWorker};

/// Maximum age of a cached validity verdict.
pub const DEFAULT_VALIDATION_TTL_SECS: u64 = 30;
/// Period of the monitor's timer.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
/// Remaining lifetime below which the monitor refreshes ahead of expiry.
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;
/// Route of the login surface.
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";
/// Route guests are sent away from protected pages to.
pub const DEFAULT_HOME_ROUTE: &str = "/";

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignOutReason {
    /// Provider reported `SIGNED_OUT`.
    SignedOut,
    /// No credential was found where one was expected.
    NoSession,
    /// The credential expired and could not be refreshed.
    RefreshFailed,
    /// The data platform rejected the credential.
    AuthRejected,
    /// The user asked to sign out.
    UserRequested,
}

impl SignOutReason {
    /// Returns `true` when the session ended because its credential went bad
    /// rather than by choice.
    pub fn is_expiry(&self) -> bool {
        matches!(self, Self::RefreshFailed | Self::AuthRejected)
    }
}

impl fmt::Display for SignOutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SignedOut => "signed_out",
            Self::NoSession => "no_session",
            Self::RefreshFailed => "refresh_failed",
            Self::AuthRejected => "auth_rejected",
            Self::UserRequested => "user_requested",
        })
    }
}

/// Receiver of the shared sign-out path.
pub trait SignOutSink: Send + Sync {
    /// Tears down the session for `reason`.
    fn sign_out(&self, reason: SignOutReason);
}

/// Tunables for the session guard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum age of a cached verdict, in seconds.
    pub validation_ttl_secs: u64,
    /// Monitor timer period, in seconds.
    pub check_interval_secs: u64,
    /// Pre-emptive refresh margin, in seconds.
    pub refresh_margin_secs: u64,
    /// Login surface route.
    pub login_route: String,
    /// Default authenticated route.
    pub home_route: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            validation_ttl_secs: DEFAULT_VALIDATION_TTL_SECS,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            home_route: DEFAULT_HOME_ROUTE.to_string(),
        }
    }
}

impl SessionConfig {
    /// Validates invariants serde cannot express.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidConfig`] for a zero TTL or interval, or
    /// routes that are not absolute paths.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.validation_ttl_secs == 0 {
            return Err(SessionError::InvalidConfig(
                "validation ttl must be greater than zero".to_string(),
            ));
        }
        if self.check_interval_secs == 0 {
            return Err(SessionError::InvalidConfig(
                "check interval must be greater than zero".to_string(),
            ));
        }
        for route in [&self.login_route, &self.home_route] {
            if !route.starts_with('/') {
                return Err(SessionError::InvalidConfig(format!(
                    "route must be an absolute path: {route}"
                )));
            }
        }
        Ok(())
    }

    /// TTL as a [`Duration`].
    pub fn validation_ttl(&self) -> Duration {
        Duration::from_secs(self.validation_ttl_secs)
    }

    /// Timer period as a [`Duration`].
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Refresh margin as a [`Duration`].
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }
}

/// Errors surfaced while assembling the guard.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Configuration violated an invariant.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for session configuration.

    use super::*;

    #[test]
    fn default_config_matches_documented_constants() {
        let config = SessionConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.validation_ttl(), Duration::from_secs(30));
        assert_eq!(config.check_interval(), Duration::from_secs(60));
        assert_eq!(config.refresh_margin(), Duration::from_secs(300));
    }

    #[test]
    fn rejects_zero_interval_and_relative_routes() {
        let mut config = SessionConfig {
            check_interval_secs: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());

        config.check_interval_secs = 60;
        config.login_route = "login".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn expiry_reasons_are_distinguished() {
        assert!(SignOutReason::RefreshFailed.is_expiry());
        assert!(!SignOutReason::SignedOut.is_expiry());
    }
}
