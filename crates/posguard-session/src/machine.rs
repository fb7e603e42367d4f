//! Auth state machine driven by identity provider events.
//!
//! States:
//! `Anonymous` -> `Authorizing` (session present, profile load queued)
//! -> `Authenticated` (profile resolved, or load failed) -> `Anonymous` /
//! `Expired` on sign-out or unrecoverable refresh failure.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use posguard_core::{AuthUser, Authorization, CoreError, DependentContext, UserProfile};
use posguard_identity::{AuthEvent, AuthEventKind, Session};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::navigation::Navigator;
use crate::tasks::TaskQueue;
use crate::{SignOutReason, SignOutSink};

/// Session facts kept in the auth state. Never includes the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Signed-in user.
    pub user: AuthUser,
    /// Credential expiry in epoch seconds.
    pub expires_at: u64,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            user: session.user.clone(),
            expires_at: session.expires_at(),
        }
    }
}

/// Process-wide authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No session.
    Anonymous,
    /// Session present, profile load queued or running.
    Authorizing {
        /// Current session facts.
        session: SessionSummary,
    },
    /// Session present and profile resolution finished.
    Authenticated {
        /// Current session facts.
        session: SessionSummary,
        /// Result of profile resolution.
        authorization: Authorization,
    },
    /// Session ended because its credential could not be kept valid.
    Expired,
}

impl AuthState {
    /// Signed-in user, if any.
    pub fn user(&self) -> Option<&AuthUser> {
        match self {
            Self::Authorizing { session } | Self::Authenticated { session, .. } => {
                Some(&session.user)
            }
            Self::Anonymous | Self::Expired => None,
        }
    }

    /// Resolved authorization; `None` until the profile load finishes.
    pub fn authorization(&self) -> Option<&Authorization> {
        match self {
            Self::Authenticated { authorization, .. } => Some(authorization),
            Self::Anonymous | Self::Authorizing { .. } | Self::Expired => None,
        }
    }

    /// Loaded profile, if the user is a tenant member.
    pub fn profile(&self) -> Option<&UserProfile> {
        self.authorization().and_then(Authorization::profile)
    }

    /// Returns `true` while a session is held.
    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }

    /// Returns `true` when no session is held.
    pub fn is_signed_out(&self) -> bool {
        matches!(self, Self::Anonymous | Self::Expired)
    }
}

/// Loads a user's authorization profile from the data platform.
#[async_trait]
pub trait ProfileLoader: Send + Sync {
    /// Returns the profile, or `None` when the identity has no profile row.
    ///
    /// # Errors
    /// Returns [`ProfileError`] when the platform query fails.
    async fn load_profile(&self, user: &AuthUser) -> Result<Option<UserProfile>, ProfileError>;
}

/// Profile load failures. Never fatal to authentication.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Platform query failed.
    #[error("profile query failed: {0}")]
    Query(String),
    /// Platform rows could not be decoded.
    #[error("profile decode failed: {0}")]
    Decode(#[from] CoreError),
    /// The deferred task queue is closed.
    #[error("profile load could not be scheduled")]
    Unscheduled,
}

struct MachineInner {
    state: watch::Sender<AuthState>,
    /// Bumped on every sign-out; a profile load tagged with an older epoch is
    /// discarded.
    epoch: Mutex<u64>,
    loader: Arc<dyn ProfileLoader>,
    tasks: TaskQueue,
    contexts: Vec<Arc<dyn DependentContext>>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
}

/// Sole writer of [`AuthState`].
#[derive(Clone)]
pub struct AuthStateMachine {
    inner: Arc<MachineInner>,
}

impl AuthStateMachine {
    /// Creates a machine in [`AuthState::Anonymous`].
    pub fn new(
        loader: Arc<dyn ProfileLoader>,
        tasks: TaskQueue,
        contexts: Vec<Arc<dyn DependentContext>>,
        navigator: Arc<dyn Navigator>,
        login_route: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Anonymous);
        Self {
            inner: Arc::new(MachineInner {
                state,
                epoch: Mutex::new(0),
                loader,
                tasks,
                contexts,
                navigator,
                login_route: login_route.into(),
            }),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    /// Read-only view that observes every transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Applies one provider event.
    ///
    /// Runs synchronously and never awaits provider calls: profile loading is
    /// queued on the [`TaskQueue`] and starts only after this returns.
    pub fn handle_event(&self, event: AuthEvent) {
        debug!(
            event = %event.kind,
            has_session = event.session.is_some(),
            "auth state changed"
        );

        match (event.kind, event.session) {
            (AuthEventKind::SignedOut, _) => self.end_session(SignOutReason::SignedOut, true),
            (AuthEventKind::InitialSession, None) => {
                debug!("no session to restore");
            }
            (kind, None) => {
                warn!(event = %kind, "event arrived without a session");
                self.end_session(SignOutReason::NoSession, true);
            }
            (kind, Some(session)) => self.apply_session(kind, &session),
        }
    }

    /// Shared sign-out path for cache, monitor, and request-layer failures.
    ///
    /// Repeated calls while already signed out are ignored.
    pub fn force_sign_out(&self, reason: SignOutReason) {
        self.end_session(reason, reason == SignOutReason::UserRequested);
    }

    fn apply_session(&self, kind: AuthEventKind, session: &Session) {
        let summary = SessionSummary::from(session);
        let user = summary.user.clone();

        let scheduled_epoch = {
            let epoch = self.inner.epoch.lock();
            let current = self.inner.state.borrow().clone();
            let (next, needs_profile) = match current {
                AuthState::Authenticated { session, authorization }
                    if session.user.id == user.id && authorization.is_resolved() =>
                {
                    (
                        AuthState::Authenticated {
                            session: summary,
                            authorization,
                        },
                        false,
                    )
                }
                AuthState::Authorizing { session } if session.user.id == user.id => {
                    (AuthState::Authorizing { session: summary }, false)
                }
                _ => (AuthState::Authorizing { session: summary }, true),
            };
            self.inner.state.send_replace(next);
            needs_profile.then_some(*epoch)
        };

        if kind == AuthEventKind::TokenRefreshed {
            debug!(user_id = %user.id, "token refreshed");
        }

        if let Some(epoch) = scheduled_epoch {
            self.schedule_profile_load(user, epoch);
        }
    }

    fn schedule_profile_load(&self, user: AuthUser, epoch: u64) {
        let machine = self.clone();
        let queued_user = user.clone();
        let queued = self.inner.tasks.enqueue("load_profile", async move {
            debug!(user_id = %queued_user.id, "loading user profile");
            let result = machine.inner.loader.load_profile(&queued_user).await;
            machine.apply_profile(&queued_user, epoch, result);
        });

        if !queued {
            self.apply_profile(&user, epoch, Err(ProfileError::Unscheduled));
        }
    }

    fn apply_profile(
        &self,
        user: &AuthUser,
        epoch: u64,
        result: Result<Option<UserProfile>, ProfileError>,
    ) {
        let authorization = match result {
            Ok(Some(profile)) => {
                info!(
                    user_id = %user.id,
                    roles = profile.roles.len(),
                    permissions = profile.permissions.len(),
                    "user profile loaded"
                );
                Authorization::member(profile)
            }
            Ok(None) => {
                info!(user_id = %user.id, "no profile row, treating user as platform admin");
                Authorization::PlatformAdmin
            }
            Err(error) => {
                warn!(
                    user_id = %user.id,
                    error = %error,
                    "profile load failed, continuing without permissions"
                );
                Authorization::Unresolved
            }
        };

        let current_epoch = self.inner.epoch.lock();
        if *current_epoch != epoch {
            debug!(user_id = %user.id, "discarding profile from an ended session");
            return;
        }

        let applied = self.inner.state.send_if_modified(|state| match state {
            AuthState::Authorizing { session } if session.user.id == user.id => {
                let session = session.clone();
                *state = AuthState::Authenticated {
                    session,
                    authorization,
                };
                true
            }
            _ => false,
        });
        if !applied {
            debug!(user_id = %user.id, "discarding profile for a different session");
        }
    }

    fn end_session(&self, reason: SignOutReason, always: bool) {
        let target = if reason.is_expiry() {
            AuthState::Expired
        } else {
            AuthState::Anonymous
        };

        {
            let mut epoch = self.inner.epoch.lock();
            if !always && self.inner.state.borrow().is_signed_out() {
                debug!(reason = %reason, "already signed out");
                return;
            }
            *epoch += 1;
            self.inner.state.send_replace(target);
        }

        warn!(reason = %reason, "session ended");
        for context in &self.inner.contexts {
            context.clear();
            debug!(context = context.name(), "dependent context cleared");
        }

        if self.inner.navigator.current_route() != self.inner.login_route {
            self.inner.navigator.redirect(&self.inner.login_route);
        }
    }
}

impl SignOutSink for AuthStateMachine {
    fn sign_out(&self, reason: SignOutReason) {
        self.force_sign_out(reason);
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for state accessors.

    use super::*;

    #[test]
    fn signed_out_states_have_no_user() {
        assert!(AuthState::Anonymous.user().is_none());
        assert!(AuthState::Expired.is_signed_out());
        let authorizing = AuthState::Authorizing {
            session: SessionSummary {
                user: AuthUser::new("u-1"),
                expires_at: 10,
            },
        };
        assert!(authorizing.is_authenticated());
        assert!(authorizing.authorization().is_none());
    }
}
