//! Deterministic in-memory identity provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use posguard_core::AuthUser;
use tokio::sync::mpsc;

use crate::{
    AuthEvent, AuthEventKind, AuthSubscription, Clock, Credential, IdentityError,
    IdentityGateway, SecretToken, Session,
};

/// How [`ScriptedIdentityGateway::refresh_session`] responds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshBehavior {
    /// Issue a new token valid for `lifetime_secs` from the clock's now.
    Succeed {
        /// Lifetime of each refreshed token.
        lifetime_secs: u64,
    },
    /// Fail every refresh with this error.
    Fail(IdentityError),
}

#[derive(Debug)]
struct ScriptState {
    session: Option<Session>,
    refresh: RefreshBehavior,
    refresh_delay: Duration,
    lookup_error: Option<IdentityError>,
    subscribers: Vec<mpsc::UnboundedSender<AuthEvent>>,
    issued: u64,
}

/// In-memory [`IdentityGateway`] that records calls and can be scripted to
/// fail, for tests and the demo binary.
pub struct ScriptedIdentityGateway {
    clock: Arc<dyn Clock>,
    state: Mutex<ScriptState>,
    refresh_calls: AtomicUsize,
    session_reads: AtomicUsize,
}

impl ScriptedIdentityGateway {
    /// Creates a provider with no session whose refreshes issue one-hour
    /// tokens.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(ScriptState {
                session: None,
                refresh: RefreshBehavior::Succeed {
                    lifetime_secs: 3_600,
                },
                refresh_delay: Duration::ZERO,
                lookup_error: None,
                subscribers: Vec::new(),
                issued: 0,
            }),
            refresh_calls: AtomicUsize::new(0),
            session_reads: AtomicUsize::new(0),
        }
    }

    /// Builds a session for `user_id` expiring at `expires_at`.
    pub fn session_for(&self, user_id: &str, expires_at: u64) -> Session {
        let mut state = self.state.lock();
        state.issued += 1;
        Session::new(
            AuthUser::new(user_id),
            Credential::new(SecretToken::new(format!("token-{}", state.issued)), expires_at),
        )
    }

    /// Replaces the held session without emitting an event.
    pub fn set_session(&self, session: Option<Session>) {
        self.state.lock().session = session;
    }

    /// Stores `session` and emits `SIGNED_IN`.
    pub fn sign_in(&self, session: Session) {
        self.set_session(Some(session.clone()));
        self.emit(AuthEvent::new(AuthEventKind::SignedIn, Some(session)));
    }

    /// Drops the session and emits `SIGNED_OUT`.
    pub fn sign_out(&self) {
        self.set_session(None);
        self.emit(AuthEvent::new(AuthEventKind::SignedOut, None));
    }

    /// Delivers `event` to every live subscriber, pruning closed ones.
    pub fn emit(&self, event: AuthEvent) {
        self.state
            .lock()
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Changes refresh responses.
    pub fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        self.state.lock().refresh = behavior;
    }

    /// Delays every refresh by `delay` (tokio time) to widen race windows.
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state.lock().refresh_delay = delay;
    }

    /// Makes `current_session` fail with `error` until reset with `None`.
    pub fn fail_lookups(&self, error: Option<IdentityError>) {
        self.state.lock().lookup_error = error;
    }

    /// Number of `refresh_session` calls observed.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Number of `current_session` calls observed.
    pub fn session_reads(&self) -> usize {
        self.session_reads.load(Ordering::SeqCst)
    }

    /// Number of subscribers still listening.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|subscriber| !subscriber.is_closed());
        state.subscribers.len()
    }
}

#[async_trait]
impl IdentityGateway for ScriptedIdentityGateway {
    async fn current_session(&self) -> Result<Option<Session>, IdentityError> {
        self.session_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if let Some(error) = &state.lookup_error {
            return Err(error.clone());
        }
        Ok(state.session.clone())
    }

    async fn refresh_session(&self) -> Result<Session, IdentityError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.lock().refresh_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let refreshed = {
            let mut state = self.state.lock();
            let lifetime_secs = match &state.refresh {
                RefreshBehavior::Succeed { lifetime_secs } => *lifetime_secs,
                RefreshBehavior::Fail(error) => return Err(error.clone()),
            };
            let user = state
                .session
                .as_ref()
                .map(|session| session.user.clone())
                .ok_or(IdentityError::NoSession)?;
            state.issued += 1;
            let session = Session::new(
                user,
                Credential::new(
                    SecretToken::new(format!("token-{}", state.issued)),
                    self.clock.now_epoch_secs() + lifetime_secs,
                ),
            );
            state.session = Some(session.clone());
            session
        };

        self.emit(AuthEvent::new(
            AuthEventKind::TokenRefreshed,
            Some(refreshed.clone()),
        ));
        Ok(refreshed)
    }

    fn subscribe(&self) -> AuthSubscription {
        let (sender, subscription) = AuthSubscription::channel();
        self.state.lock().subscribers.push(sender);
        subscription
    }
}
