#![warn(missing_docs)]
//! # posguard-app
//!
//! ## Purpose
//! Assembles the session guard, tenant context, and cash context for the
//! point-of-sale client.
//!
//! ## Responsibilities
//! - Load provider and session settings from `POSGUARD_*` environment
//!   variables.
//! - Initialise structured logging once per process.
//! - Register dependent contexts with the session guard.
//! - Route request-layer errors into the guard with redacted logging.
//!
//! ## Data flow
//! Env -> [`GuardConfig`] -> [`assemble`] -> [`PosRuntime`] (guard + contexts).
//! Request failures -> [`PosRuntime::report_request_error`] -> guard sign-out
//! path.
//!
//! ## Ownership and lifetimes
//! [`PosRuntime`] owns the guard; contexts are shared `Arc`s so the UI layer
//! can read them while the state machine clears them.
//!
//! ## Error model
//! Subsystem failures are wrapped in [`AppError`] and returned from startup
//! functions only; nothing after startup returns an error.
//!
//! ## Security and privacy notes
//! - Provider URLs must be HTTPS outside localhost.
//! - Error messages pass through [`redact_sensitive`] before logging.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use posguard_core::{AuthUser, DependentContext, UserProfile};
use posguard_identity::{IdentityError, IdentityGateway, ProviderConfig};
use posguard_session::{
    Navigator, ProfileError, ProfileLoader, SessionConfig, SessionError, SessionGuard,
};
use posguard_tenant::{
    CashSessionContext, KeyValueStore, StoreError, TenantContext, TenantSelection,
};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("POSGUARD_VERSION");

/// Provider base URL variable.
pub const ENV_PROVIDER_URL: &str = "POSGUARD_PROVIDER_URL";
/// Provider anon key variable.
pub const ENV_PROVIDER_ANON_KEY: &str = "POSGUARD_PROVIDER_ANON_KEY";
/// Validation TTL override, seconds.
pub const ENV_VALIDATION_TTL_SECS: &str = "POSGUARD_VALIDATION_TTL_SECS";
/// Monitor interval override, seconds.
pub const ENV_CHECK_INTERVAL_SECS: &str = "POSGUARD_CHECK_INTERVAL_SECS";
/// Refresh margin override, seconds.
pub const ENV_REFRESH_MARGIN_SECS: &str = "POSGUARD_REFRESH_MARGIN_SECS";
/// Login route override.
pub const ENV_LOGIN_ROUTE: &str = "POSGUARD_LOGIN_ROUTE";
/// Home route override.
pub const ENV_HOME_ROUTE: &str = "POSGUARD_HOME_ROUTE";

const REDACTED: &str = "<redacted>";
const SENSITIVE_KEYS: [&str; 6] = [
    "password",
    "token",
    "authorization",
    "bearer",
    "apikey",
    "anon_key",
];

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Identity/data platform connection.
    pub provider: ProviderConfig,
    /// Session guard tunables.
    pub session: SessionConfig,
}

impl GuardConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    /// See [`GuardConfig::from_lookup`].
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`.
    ///
    /// Provider variables are required; session variables fall back to
    /// defaults when unset.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for missing or malformed variables,
    /// [`AppError::Provider`] for invalid provider settings, and
    /// [`AppError::Session`] when the session settings violate an invariant.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| AppError::Config(format!("{key} must be set")))
        };
        let seconds = |key: &str, default: u64| -> Result<u64, AppError> {
            match lookup(key) {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    AppError::Config(format!("{key} must be a whole number of seconds"))
                }),
                None => Ok(default),
            }
        };

        let provider =
            ProviderConfig::new(required(ENV_PROVIDER_URL)?, required(ENV_PROVIDER_ANON_KEY)?)?;

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            validation_ttl_secs: seconds(ENV_VALIDATION_TTL_SECS, defaults.validation_ttl_secs)?,
            check_interval_secs: seconds(ENV_CHECK_INTERVAL_SECS, defaults.check_interval_secs)?,
            refresh_margin_secs: seconds(ENV_REFRESH_MARGIN_SECS, defaults.refresh_margin_secs)?,
            login_route: lookup(ENV_LOGIN_ROUTE).unwrap_or(defaults.login_route),
            home_route: lookup(ENV_HOME_ROUTE).unwrap_or(defaults.home_route),
        };
        session.validate()?;

        Ok(Self { provider, session })
    }
}

/// Installs the global `tracing` subscriber.
///
/// Honours `RUST_LOG`, defaulting to `info`. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Redacts secret values in log-safe output.
///
/// Any word carrying a sensitive key (`token=...`, `password: ...`,
/// `Bearer ...`) has its value replaced; a key with no inline value redacts
/// the following word.
pub fn redact_sensitive(input: &str) -> String {
    let mut words = Vec::new();
    let mut redact_next = false;

    for word in input.split(' ') {
        if redact_next && !word.is_empty() {
            words.push(REDACTED.to_string());
            redact_next = false;
            continue;
        }

        let lower = word.to_ascii_lowercase();
        let hit = SENSITIVE_KEYS
            .iter()
            .filter_map(|key| lower.find(key).map(|start| start + key.len()))
            .min();
        let Some(key_end) = hit else {
            words.push(word.to_string());
            continue;
        };

        let rest = &word[key_end..];
        let value = rest.trim_start_matches(['=', ':', '"', '\'']);
        if !rest.is_empty() && rest.len() == value.len() {
            // Key is only a prefix of a longer word, e.g. "tokens".
            words.push(word.to_string());
            continue;
        }

        let kept = &word[..word.len() - value.len()];
        if value.is_empty() {
            words.push(kept.to_string());
            redact_next = true;
        } else {
            words.push(format!("{kept}{REDACTED}"));
            redact_next = value.eq_ignore_ascii_case("bearer");
        }
    }

    words.join(" ")
}

/// Profile loader backed by pre-fetched platform rows, keyed by auth user id.
#[derive(Debug, Default)]
pub struct RecordedProfileLoader {
    rows: HashMap<String, (String, String)>,
}

impl RecordedProfileLoader {
    /// Creates an empty loader; every user resolves to no profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the `users` row and `user_roles` rows for `auth_user_id`.
    pub fn with_rows(
        mut self,
        auth_user_id: impl Into<String>,
        user_json: impl Into<String>,
        roles_json: impl Into<String>,
    ) -> Self {
        self.rows
            .insert(auth_user_id.into(), (user_json.into(), roles_json.into()));
        self
    }
}

#[async_trait]
impl ProfileLoader for RecordedProfileLoader {
    async fn load_profile(&self, user: &AuthUser) -> Result<Option<UserProfile>, ProfileError> {
        match self.rows.get(&user.id) {
            Some((user_json, roles_json)) => Ok(Some(UserProfile::from_json(user_json, roles_json)?)),
            None => Ok(None),
        }
    }
}

/// Guard plus the contexts it clears on sign-out.
pub struct PosRuntime {
    /// Session guard.
    pub guard: SessionGuard,
    /// Selected tenant.
    pub tenant: Arc<TenantContext>,
    /// Cashier POS context.
    pub cash: Arc<CashSessionContext>,
}

impl PosRuntime {
    /// Feeds a request-layer failure into the guard, logging a redacted copy.
    ///
    /// Returns `true` when the session was torn down.
    pub fn report_request_error(&self, message: &str, code: Option<&str>) -> bool {
        let signed_out = self.guard.report_request_error(message, code);
        if signed_out {
            warn!(error = %redact_sensitive(message), "request failed with rejected credential");
        }
        signed_out
    }

    /// Selects and persists the signed-in user's own tenant.
    ///
    /// Returns `None` when no profile with a tenant is loaded.
    ///
    /// # Errors
    /// Returns [`AppError::Store`] when the selection cannot be persisted.
    pub fn select_profile_tenant(&self) -> Result<Option<TenantSelection>, AppError> {
        let state = self.guard.state();
        let Some(tenant) = state.profile().and_then(|profile| profile.tenant.as_ref()) else {
            return Ok(None);
        };
        let selection = TenantSelection {
            tenant_id: tenant.tenant_id.clone(),
            tenant_name: tenant.name.clone(),
            currency_code: tenant.currency_code.clone(),
        };
        self.tenant.save(selection.clone())?;
        Ok(Some(selection))
    }
}

/// Builds the runtime: tenant and cash contexts registered with a guard over
/// `gateway`.
///
/// The guard is not started.
///
/// # Errors
/// Returns [`AppError::Session`] when the session settings are invalid.
pub fn assemble(
    config: &GuardConfig,
    gateway: Arc<dyn IdentityGateway>,
    loader: Arc<dyn ProfileLoader>,
    navigator: Arc<dyn Navigator>,
    store: Arc<dyn KeyValueStore>,
) -> Result<PosRuntime, AppError> {
    let tenant = Arc::new(TenantContext::new(store));
    let cash = Arc::new(CashSessionContext::new());

    let guard = SessionGuard::builder(gateway, loader, navigator)
        .config(config.session.clone())
        .context(Arc::clone(&tenant) as Arc<dyn DependentContext>)
        .context(Arc::clone(&cash) as Arc<dyn DependentContext>)
        .build()?;

    Ok(PosRuntime {
        guard,
        tenant,
        cash,
    })
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed environment variable.
    #[error("config error: {0}")]
    Config(String),
    /// Provider settings rejected.
    #[error("provider error: {0}")]
    Provider(#[from] IdentityError),
    /// Session guard could not be assembled.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    /// Persistent store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
