//! Shared fixtures for session integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use posguard_core::{AuthUser, DependentContext, Permission, Role, UserProfile};
use posguard_identity::{ManualClock, ScriptedIdentityGateway};
use posguard_session::{ProfileError, ProfileLoader, SignOutReason, SignOutSink, ValidationCache};

/// Wall-clock start used by every fixture, in epoch seconds.
#[allow(dead_code)]
pub const T0: u64 = 1_700_000_000;

/// Sign-out sink that only records reasons.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingSink {
    reasons: Mutex<Vec<SignOutReason>>,
}

#[allow(dead_code)]
impl RecordingSink {
    /// Every reason received, oldest first.
    pub fn reasons(&self) -> Vec<SignOutReason> {
        self.reasons.lock().clone()
    }

    /// Number of sign-outs received.
    pub fn count(&self) -> usize {
        self.reasons.lock().len()
    }
}

impl SignOutSink for RecordingSink {
    fn sign_out(&self, reason: SignOutReason) {
        self.reasons.lock().push(reason);
    }
}

/// Dependent context that counts clears.
#[allow(dead_code)]
pub struct RecordingContext {
    name: &'static str,
    clears: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingContext {
    /// Creates a context named `name`.
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            clears: AtomicUsize::new(0),
        })
    }

    /// Number of clears observed.
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl DependentContext for RecordingContext {
    fn name(&self) -> &str {
        self.name
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted profile-loader response.
#[allow(dead_code)]
#[derive(Clone)]
pub enum StubProfile {
    /// Return this profile.
    Found(UserProfile),
    /// No profile row.
    Missing,
    /// Query fails with this message.
    Fails(String),
}

/// Profile loader with a scripted response and optional delay.
#[allow(dead_code)]
pub struct StubLoader {
    response: Mutex<StubProfile>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl StubLoader {
    /// Creates a loader answering `response`.
    pub fn new(response: StubProfile) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(response),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    /// Changes the scripted response.
    pub fn respond(&self, response: StubProfile) {
        *self.response.lock() = response;
    }

    /// Delays every load by `delay` (tokio time).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of loads started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileLoader for StubLoader {
    async fn load_profile(&self, user: &AuthUser) -> Result<Option<UserProfile>, ProfileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let response = self.response.lock().clone();
        match response {
            StubProfile::Found(mut profile) => {
                profile.auth_user_id = user.id.clone();
                Ok(Some(profile))
            }
            StubProfile::Missing => Ok(None),
            StubProfile::Fails(message) => Err(ProfileError::Query(message)),
        }
    }
}

/// Builds a profile holding `codes` through a single `cashier` role.
#[allow(dead_code)]
pub fn fixture_profile(codes: &[&str]) -> UserProfile {
    UserProfile {
        user_id: "app-user-1".to_string(),
        auth_user_id: String::new(),
        email: Some("cashier@example.test".to_string()),
        full_name: Some("Front Register".to_string()),
        is_active: true,
        tenant: None,
        roles: vec![Role {
            role_id: "role-1".to_string(),
            name: "cashier".to_string(),
        }],
        permissions: codes
            .iter()
            .enumerate()
            .map(|(index, code)| Permission {
                permission_id: format!("perm-{index}"),
                code: (*code).to_string(),
                description: None,
            })
            .collect(),
    }
}

/// Cache wired to a scripted provider and a recording sink.
#[allow(dead_code)]
pub struct CacheHarness {
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<ScriptedIdentityGateway>,
    pub sink: Arc<RecordingSink>,
    pub cache: ValidationCache,
}

/// Builds a cache with `ttl` and the clock at [`T0`].
#[allow(dead_code)]
pub fn cache_harness(ttl: Duration) -> CacheHarness {
    let clock = Arc::new(ManualClock::new(T0));
    let gateway = Arc::new(ScriptedIdentityGateway::new(clock.clone()));
    let sink = Arc::new(RecordingSink::default());
    let cache = ValidationCache::new(gateway.clone(), clock.clone(), sink.clone(), ttl);
    CacheHarness {
        clock,
        gateway,
        sink,
        cache,
    }
}

/// Lets spawned tasks and queued work run to quiescence under paused time.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
