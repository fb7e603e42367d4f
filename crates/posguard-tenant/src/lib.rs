#![warn(missing_docs)]
//! # posguard-tenant
//!
//! ## Purpose
//! Holds per-session state that must not outlive the signed-in user: the
//! selected tenant and the cashier's point-of-sale context.
//!
//! ## Responsibilities
//! - Persist the tenant selection through a [`KeyValueStore`].
//! - Track the open cash session and assigned registers.
//! - Implement [`DependentContext`] so the auth state machine clears both on
//!   sign-out.
//!
//! ## Data flow
//! Tenant picker -> [`TenantContext::save`] -> store key `current_tenant`.
//! POS home query -> [`CashSessionContext::set_pos_context`].
//! Sign-out -> [`DependentContext::clear`].
//!
//! ## Error model
//! Store failures surface as [`StoreError`] from `save`; a corrupt stored
//! selection is logged and treated as absent.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use posguard_core::DependentContext;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Store key under which the tenant selection is persisted.
pub const TENANT_STORAGE_KEY: &str = "current_tenant";

/// Persistent string store (browser local storage on the client).
pub trait KeyValueStore: Send + Sync {
    /// Reads `key`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backend is unavailable.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value` under `key`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backend rejects the write.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deletes `key`; deleting a missing key is not an error.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backend is unavailable.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unavailable or full.
    #[error("store backend failed: {0}")]
    Backend(String),
    /// Value could not be encoded.
    #[error("store codec failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// In-process [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Tenant chosen by a platform admin, or resolved from the user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSelection {
    /// Tenant identifier.
    pub tenant_id: String,
    /// Display name.
    pub tenant_name: String,
    /// Currency used by the tenant's registers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
}

/// Current tenant selection backed by a [`KeyValueStore`].
pub struct TenantContext {
    store: Arc<dyn KeyValueStore>,
    current: RwLock<Option<TenantSelection>>,
}

impl TenantContext {
    /// Creates a context and loads any stored selection.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let context = Self {
            store,
            current: RwLock::new(None),
        };
        context.load();
        context
    }

    /// Reloads the selection from the store.
    ///
    /// A missing or corrupt entry leaves the context empty.
    pub fn load(&self) -> Option<TenantSelection> {
        let loaded = match self.store.get(TENANT_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<TenantSelection>(&raw) {
                Ok(selection) => Some(selection),
                Err(error) => {
                    warn!(error = %error, "ignoring corrupt stored tenant selection");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(error = %error, "could not read stored tenant selection");
                None
            }
        };
        *self.current.write() = loaded.clone();
        loaded
    }

    /// Stores `selection` and makes it current.
    ///
    /// # Errors
    /// Returns [`StoreError`] when persisting fails; the in-memory selection
    /// is still updated.
    pub fn save(&self, selection: TenantSelection) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&selection)?;
        debug!(tenant_id = %selection.tenant_id, "tenant selected");
        *self.current.write() = Some(selection);
        self.store.set(TENANT_STORAGE_KEY, &encoded)
    }

    /// Current selection.
    pub fn current(&self) -> Option<TenantSelection> {
        self.current.read().clone()
    }

    /// Current tenant id.
    pub fn tenant_id(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .map(|selection| selection.tenant_id.clone())
    }

    /// Current tenant display name.
    pub fn tenant_name(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .map(|selection| selection.tenant_name.clone())
    }
}

impl DependentContext for TenantContext {
    fn name(&self) -> &str {
        "tenant"
    }

    fn clear(&self) {
        *self.current.write() = None;
        if let Err(error) = self.store.remove(TENANT_STORAGE_KEY) {
            warn!(error = %error, "could not remove stored tenant selection");
        }
    }
}

/// POS home summary returned by the platform for the signed-in cashier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosContext {
    /// Cash session currently open for this user, if any.
    #[serde(default)]
    pub open_cash_session_id: Option<String>,
    /// Registers assigned to the user.
    #[serde(default)]
    pub assigned_registers_count: u32,
    /// The only assigned register, when exactly one is assigned.
    #[serde(default)]
    pub single_cash_register_id: Option<String>,
}

/// Open cash drawer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashSession {
    /// Session id.
    pub cash_session_id: String,
    /// Register the session is open on.
    pub cash_register_id: String,
}

/// Register assigned to a cashier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashRegister {
    /// Register id.
    pub cash_register_id: String,
    /// Display name.
    pub name: String,
}

#[derive(Debug, Default)]
struct CashState {
    pos_context: Option<PosContext>,
    current_session: Option<CashSession>,
    assigned_registers: Vec<CashRegister>,
}

/// Cashier's point-of-sale context for the current session.
#[derive(Debug, Default)]
pub struct CashSessionContext {
    state: RwLock<CashState>,
}

impl CashSessionContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the POS home summary.
    pub fn set_pos_context(&self, context: PosContext) {
        let mut state = self.state.write();
        if context.open_cash_session_id.is_none() {
            state.current_session = None;
        }
        state.pos_context = Some(context);
    }

    /// Records the open cash session.
    pub fn set_current_session(&self, session: Option<CashSession>) {
        self.state.write().current_session = session;
    }

    /// Records the registers assigned to the user.
    pub fn set_assigned_registers(&self, registers: Vec<CashRegister>) {
        self.state.write().assigned_registers = registers;
    }

    /// POS home summary, if loaded.
    pub fn pos_context(&self) -> Option<PosContext> {
        self.state.read().pos_context.clone()
    }

    /// Open cash session, if loaded.
    pub fn current_session(&self) -> Option<CashSession> {
        self.state.read().current_session.clone()
    }

    /// Assigned registers.
    pub fn assigned_registers(&self) -> Vec<CashRegister> {
        self.state.read().assigned_registers.clone()
    }

    /// Returns `true` when the platform reports an open cash session.
    pub fn has_open_session(&self) -> bool {
        self.state
            .read()
            .pos_context
            .as_ref()
            .is_some_and(|context| context.open_cash_session_id.is_some())
    }

    /// Number of assigned registers (0 before the context loads).
    pub fn assigned_count(&self) -> u32 {
        self.state
            .read()
            .pos_context
            .as_ref()
            .map_or(0, |context| context.assigned_registers_count)
    }

    /// The only assigned register id, when exactly one is assigned.
    pub fn single_register_id(&self) -> Option<String> {
        self.state
            .read()
            .pos_context
            .as_ref()
            .and_then(|context| context.single_cash_register_id.clone())
    }
}

impl DependentContext for CashSessionContext {
    fn name(&self) -> &str {
        "cash_session"
    }

    fn clear(&self) {
        *self.state.write() = CashState::default();
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for tenant persistence and cash context.

    use super::*;

    fn selection() -> TenantSelection {
        TenantSelection {
            tenant_id: "t-1".to_string(),
            tenant_name: "Main Street".to_string(),
            currency_code: None,
        }
    }

    #[test]
    fn tenant_selection_survives_reload() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let context = TenantContext::new(Arc::clone(&store));
        context.save(selection()).expect("memory store accepts writes");

        let reloaded = TenantContext::new(store);
        assert_eq!(reloaded.tenant_id().as_deref(), Some("t-1"));
        assert_eq!(reloaded.tenant_name().as_deref(), Some("Main Street"));
    }

    #[test]
    fn corrupt_stored_selection_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(TENANT_STORAGE_KEY, "{not json")
            .expect("memory store accepts writes");

        let context = TenantContext::new(store);
        assert!(context.current().is_none());
    }

    #[test]
    fn pos_context_without_open_session_drops_current_session() {
        let context = CashSessionContext::new();
        context.set_current_session(Some(CashSession {
            cash_session_id: "cs-1".to_string(),
            cash_register_id: "r-1".to_string(),
        }));
        context.set_pos_context(PosContext::default());

        assert!(context.current_session().is_none());
        assert!(!context.has_open_session());
        assert_eq!(context.assigned_count(), 0);
    }
}
