//! TTL-bounded, single-flight credential validity cache.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use posguard_identity::{Clock, IdentityGateway, Session};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::single_flight::SingleFlight;
use crate::{SignOutReason, SignOutSink};

/// When a validation run should refresh the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Only once `expires_at <= now`.
    OnExpiry,
    /// Also when fewer than this many seconds remain.
    Ahead(Duration),
}

/// Result of one validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Credential present and not due for refresh.
    Valid,
    /// Credential was refreshed successfully.
    Refreshed,
    /// Pre-emptive refresh failed; the current token is still unexpired.
    RefreshDeferred,
    /// No credential held.
    NoSession,
    /// Credential expired and refresh failed.
    RefreshFailed,
    /// Validity could not be determined: lookup failure, aborted run, or a
    /// failed run that an invalidation superseded.
    Unverified,
}

impl ValidationOutcome {
    /// Returns `true` when the credential may be used.
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid | Self::Refreshed | Self::RefreshDeferred)
    }

    fn sign_out_reason(self) -> Option<SignOutReason> {
        match self {
            Self::NoSession => Some(SignOutReason::NoSession),
            Self::RefreshFailed => Some(SignOutReason::RefreshFailed),
            Self::Valid | Self::Refreshed | Self::RefreshDeferred | Self::Unverified => None,
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Valid => "valid",
            Self::Refreshed => "refreshed",
            Self::RefreshDeferred => "refresh_deferred",
            Self::NoSession => "no_session",
            Self::RefreshFailed => "refresh_failed",
            Self::Unverified => "unverified",
        })
    }
}

/// Cached answer of the last completed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationVerdict {
    /// Whether the credential was usable.
    pub valid: bool,
    /// When the verdict was recorded.
    pub checked_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    verdict: Option<ValidationVerdict>,
    generation: u64,
    last_checked_at: Option<Instant>,
}

struct CacheInner {
    gateway: Arc<dyn IdentityGateway>,
    clock: Arc<dyn Clock>,
    sign_out: Arc<dyn SignOutSink>,
    ttl: Duration,
    state: Mutex<CacheState>,
    flight: SingleFlight<ValidationOutcome>,
}

/// Answers "is the credential usable right now?" without hammering the
/// provider.
///
/// Both [`ValidationCache::check`] and [`ValidationCache::revalidate`] run
/// through one [`SingleFlight`] cell, so there is never more than one
/// validation in flight regardless of which path triggered it.
#[derive(Clone)]
pub struct ValidationCache {
    inner: Arc<CacheInner>,
}

impl ValidationCache {
    /// Creates an empty cache.
    pub fn new(
        gateway: Arc<dyn IdentityGateway>,
        clock: Arc<dyn Clock>,
        sign_out: Arc<dyn SignOutSink>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                gateway,
                clock,
                sign_out,
                ttl,
                state: Mutex::new(CacheState::default()),
                flight: SingleFlight::new(),
            }),
        }
    }

    /// Returns whether the credential is usable.
    ///
    /// A verdict younger than the TTL is answered without touching the
    /// provider. Otherwise the caller joins, or starts, the single validation
    /// run. Never fails: anything that prevents confirming validity yields
    /// `false`.
    pub async fn check(&self) -> bool {
        if let Some(verdict) = self.verdict() {
            return verdict.valid;
        }
        self.revalidate(RefreshPolicy::OnExpiry).await.is_valid()
    }

    /// Bypasses the cached verdict and validates through the single-flight
    /// cell.
    ///
    /// A caller that joins a run already in flight observes that run's
    /// outcome, whatever policy started it.
    pub async fn revalidate(&self, policy: RefreshPolicy) -> ValidationOutcome {
        let generation = self.inner.state.lock().generation;
        let inner = Arc::clone(&self.inner);

        match self
            .inner
            .flight
            .run(generation, move || async move {
                inner.validate(generation, policy).await
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(aborted) => {
                error!(error = %aborted, "session validation aborted");
                ValidationOutcome::Unverified
            }
        }
    }

    /// Drops the cached verdict. No provider call is made.
    ///
    /// A run that started before this call will not record its verdict or
    /// sign out, and later callers will not join it.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock();
        state.verdict = None;
        state.generation += 1;
        debug!(generation = state.generation, "session validation cache invalidated");
    }

    /// Returns the cached verdict if it is younger than the TTL.
    pub fn verdict(&self) -> Option<ValidationVerdict> {
        let state = self.inner.state.lock();
        state
            .verdict
            .filter(|verdict| verdict.checked_at.elapsed() < self.inner.ttl)
    }

    /// Number of invalidations so far.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Returns `true` while a validation run is in flight.
    pub fn is_validating(&self) -> bool {
        self.inner.flight.is_in_flight()
    }

    /// Total validation runs started.
    pub fn validations_started(&self) -> u64 {
        self.inner.flight.launches()
    }
}

impl CacheInner {
    async fn validate(&self, generation: u64, policy: RefreshPolicy) -> ValidationOutcome {
        let outcome = match self.gateway.current_session().await {
            Err(error) => {
                error!(error = %error, "session lookup failed");
                return ValidationOutcome::Unverified;
            }
            Ok(None) => {
                warn!("session check found no session");
                ValidationOutcome::NoSession
            }
            Ok(Some(session)) => self.assess(&session, policy).await,
        };

        let current = self.record(generation, outcome.is_valid());
        match outcome.sign_out_reason() {
            Some(reason) if current => self.sign_out.sign_out(reason),
            Some(_) => {
                debug!(outcome = %outcome, "superseded validation failed, session left alone");
                return ValidationOutcome::Unverified;
            }
            None => {}
        }
        outcome
    }

    async fn assess(&self, session: &Session, policy: RefreshPolicy) -> ValidationOutcome {
        let remaining = session
            .credential
            .seconds_remaining(self.clock.now_epoch_secs());

        if remaining <= 0 {
            info!(
                user_id = %session.user.id,
                expired_for_secs = -remaining,
                "token expired, refreshing"
            );
            return match self.gateway.refresh_session().await {
                Ok(refreshed) => {
                    info!(
                        token = %refreshed.credential.access_token.fingerprint(),
                        expires_at = refreshed.expires_at(),
                        "session refreshed after expiry"
                    );
                    ValidationOutcome::Refreshed
                }
                Err(error) => {
                    warn!(error = %error, "session refresh failed");
                    ValidationOutcome::RefreshFailed
                }
            };
        }

        if let RefreshPolicy::Ahead(margin) = policy
            && remaining < margin.as_secs() as i64
        {
            info!(remaining_secs = remaining, "token close to expiry, refreshing ahead");
            return match self.gateway.refresh_session().await {
                Ok(refreshed) => {
                    info!(
                        token = %refreshed.credential.access_token.fingerprint(),
                        expires_at = refreshed.expires_at(),
                        "session refreshed ahead of expiry"
                    );
                    ValidationOutcome::Refreshed
                }
                Err(error) => {
                    warn!(
                        error = %error,
                        remaining_secs = remaining,
                        "pre-emptive refresh failed, keeping current token"
                    );
                    ValidationOutcome::RefreshDeferred
                }
            };
        }

        ValidationOutcome::Valid
    }

    /// Stores the verdict; returns `false` when the run was superseded by an
    /// invalidation and nothing was stored.
    fn record(&self, generation: u64, valid: bool) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(
                run_generation = generation,
                current_generation = state.generation,
                "discarding verdict from superseded validation"
            );
            return false;
        }

        // Invariant: checked_at never moves backwards within one cache.
        let now = Instant::now();
        let checked_at = state.last_checked_at.map_or(now, |last| last.max(now));
        state.last_checked_at = Some(checked_at);
        state.verdict = Some(ValidationVerdict { valid, checked_at });
        true
    }
}
