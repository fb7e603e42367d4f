//! Wires the cache, monitor, and state machine to one identity provider.

use std::sync::Arc;

use parking_lot::Mutex;
use posguard_core::DependentContext;
use posguard_identity::{
    AuthEvent, AuthEventKind, Clock, IdentityGateway, SystemClock, is_auth_failure,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::ValidationCache;
use crate::machine::{AuthState, AuthStateMachine, ProfileLoader};
use crate::monitor::{SessionMonitor, VisibilitySignal};
use crate::navigation::{Navigator, RouteGuard};
use crate::tasks::{TaskQueue, TaskWorker};
use crate::{SessionConfig, SessionError, SignOutReason, SignOutSink};

/// Builder for [`SessionGuard`].
pub struct SessionGuardBuilder {
    gateway: Arc<dyn IdentityGateway>,
    loader: Arc<dyn ProfileLoader>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    visibility: VisibilitySignal,
    contexts: Vec<Arc<dyn DependentContext>>,
    config: SessionConfig,
}

impl SessionGuardBuilder {
    /// Overrides the wall clock (defaults to [`SystemClock`]).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses an existing visibility signal.
    pub fn visibility(mut self, visibility: VisibilitySignal) -> Self {
        self.visibility = visibility;
        self
    }

    /// Registers a context cleared on sign-out.
    pub fn context(mut self, context: Arc<dyn DependentContext>) -> Self {
        self.contexts.push(context);
        self
    }

    /// Overrides tunables.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Assembles the guard. Nothing runs until [`SessionGuard::start`].
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidConfig`] when the config is invalid.
    pub fn build(self) -> Result<SessionGuard, SessionError> {
        self.config.validate()?;

        let (tasks, worker) = TaskQueue::channel();
        let machine = AuthStateMachine::new(
            self.loader,
            tasks,
            self.contexts,
            self.navigator,
            self.config.login_route.clone(),
        );
        let sign_out: Arc<dyn SignOutSink> = Arc::new(machine.clone());
        let cache = ValidationCache::new(
            Arc::clone(&self.gateway),
            self.clock,
            sign_out,
            self.config.validation_ttl(),
        );
        let monitor = SessionMonitor::new(
            cache.clone(),
            self.visibility.clone(),
            self.config.check_interval(),
            self.config.refresh_margin(),
        );
        let routes = RouteGuard::new(
            cache.clone(),
            self.config.login_route.clone(),
            self.config.home_route.clone(),
        );

        Ok(SessionGuard {
            gateway: self.gateway,
            dispatcher: EventDispatcher {
                cache,
                machine,
                monitor,
            },
            routes,
            visibility: self.visibility,
            worker: Mutex::new(Some(worker)),
            running: Mutex::new(None),
        })
    }
}

#[derive(Clone)]
struct EventDispatcher {
    cache: ValidationCache,
    machine: AuthStateMachine,
    monitor: SessionMonitor,
}

impl EventDispatcher {
    fn dispatch(&self, event: AuthEvent) {
        let kind = event.kind;
        let has_session = event.session.is_some();

        self.cache.invalidate();
        self.machine.handle_event(event);

        match kind {
            AuthEventKind::SignedOut => {
                self.monitor.stop();
            }
            AuthEventKind::InitialSession if !has_session => {}
            _ if !has_session => {
                self.monitor.stop();
            }
            _ => {
                self.monitor.start();
            }
        }
    }
}

struct Running {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// One session guard per signed-in client.
///
/// Owns exactly one [`ValidationCache`], [`SessionMonitor`], and
/// [`AuthStateMachine`]. Consumers receive clones of those handles or a
/// read-only state receiver; none can assign the auth state.
pub struct SessionGuard {
    gateway: Arc<dyn IdentityGateway>,
    dispatcher: EventDispatcher,
    routes: RouteGuard,
    visibility: VisibilitySignal,
    worker: Mutex<Option<TaskWorker>>,
    running: Mutex<Option<Running>>,
}

impl SessionGuard {
    /// Starts building a guard over `gateway`.
    pub fn builder(
        gateway: Arc<dyn IdentityGateway>,
        loader: Arc<dyn ProfileLoader>,
        navigator: Arc<dyn Navigator>,
    ) -> SessionGuardBuilder {
        SessionGuardBuilder {
            gateway,
            loader,
            navigator,
            clock: Arc::new(SystemClock),
            visibility: VisibilitySignal::new(),
            contexts: Vec::new(),
            config: SessionConfig::default(),
        }
    }

    /// Subscribes to provider events and starts the deferred task worker.
    ///
    /// Returns `false` when already started or after [`SessionGuard::shutdown`].
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }
        let Some(worker) = self.worker.lock().take() else {
            warn!("session guard cannot be restarted after shutdown");
            return false;
        };

        let cancel = CancellationToken::new();
        let mut subscription = self.gateway.subscribe();
        let dispatcher = self.dispatcher.clone();
        let mut states = dispatcher.machine.subscribe();
        let token = cancel.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    // Sign-outs forced by the cache or the request layer
                    // bypass the event stream.
                    Ok(()) = states.changed() => {
                        let signed_out = states.borrow_and_update().is_signed_out();
                        if signed_out {
                            dispatcher.monitor.stop();
                        }
                    }
                    event = subscription.next() => match event {
                        Some(event) => dispatcher.dispatch(event),
                        None => {
                            warn!("identity provider closed its event stream");
                            break;
                        }
                    },
                }
            }
            debug!("auth event pump exiting");
        });

        *running = Some(Running {
            cancel,
            pump,
            worker: tokio::spawn(worker.run()),
        });
        info!("session guard started");
        true
    }

    /// Restores the stored session at startup as an `INITIAL_SESSION` event.
    pub async fn restore(&self) {
        match self.gateway.current_session().await {
            Ok(session) => {
                self.dispatcher
                    .dispatch(AuthEvent::new(AuthEventKind::InitialSession, session));
            }
            Err(error) => {
                error!(error = %error, "could not restore session");
            }
        }
    }

    /// Ends the session at the user's request, after the provider sign-out
    /// call succeeded.
    pub fn sign_out(&self) {
        self.dispatcher.monitor.stop();
        self.dispatcher.cache.invalidate();
        self.dispatcher
            .machine
            .force_sign_out(SignOutReason::UserRequested);
    }

    /// Feeds a request-layer error through the auth-failure classifier.
    ///
    /// Returns `true` when the error meant the credential was rejected and the
    /// sign-out path ran.
    pub fn report_request_error(&self, message: &str, code: Option<&str>) -> bool {
        if !is_auth_failure(message, code) {
            return false;
        }
        warn!(code = code.unwrap_or("-"), "request rejected credential");
        self.dispatcher.cache.invalidate();
        self.dispatcher
            .machine
            .force_sign_out(SignOutReason::AuthRejected);
        true
    }

    /// Stops the monitor and the event pump. The task worker drains queued
    /// work and exits.
    pub fn shutdown(&self) {
        self.dispatcher.monitor.stop();
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
            drop(running.pump);
            drop(running.worker);
            info!("session guard stopped");
        }
    }

    /// Returns `true` between [`SessionGuard::start`] and
    /// [`SessionGuard::shutdown`].
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Shortcut for [`ValidationCache::check`].
    pub async fn check(&self) -> bool {
        self.dispatcher.cache.check().await
    }

    /// Current auth state snapshot.
    pub fn state(&self) -> AuthState {
        self.dispatcher.machine.state()
    }

    /// Read-only auth state receiver.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<AuthState> {
        self.dispatcher.machine.subscribe()
    }

    /// The validation cache.
    pub fn cache(&self) -> &ValidationCache {
        &self.dispatcher.cache
    }

    /// The background monitor.
    pub fn monitor(&self) -> &SessionMonitor {
        &self.dispatcher.monitor
    }

    /// The auth state machine.
    pub fn machine(&self) -> &AuthStateMachine {
        &self.dispatcher.machine
    }

    /// The route guard.
    pub fn routes(&self) -> &RouteGuard {
        &self.routes
    }

    /// The visibility signal the monitor listens to.
    pub fn visibility(&self) -> &VisibilitySignal {
        &self.visibility
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}
