//! Integration tests for runtime assembly and context clearing.

use std::sync::Arc;

use posguard_app::{AppError, GuardConfig, PosRuntime, RecordedProfileLoader, assemble};
use posguard_identity::{ManualClock, ProviderConfig, ScriptedIdentityGateway};
use posguard_session::{AuthState, HistoryNavigator, Navigator, SessionConfig};
use posguard_tenant::{
    KeyValueStore, MemoryStore, PosContext, StoreError, TENANT_STORAGE_KEY, TenantSelection,
};

const NOW: u64 = 1_700_000_000;

const USER_ROW: &str = r#"{
    "user_id": "u-1",
    "auth_user_id": "cashier-1",
    "tenants": { "tenant_id": "t-1", "name": "Harbor" }
}"#;

const ROLE_ROWS: &str = r#"[
    { "role": { "role_id": "r-1", "name": "cashier", "role_permissions": [
        { "permission": { "permission_id": "p-1", "code": "sales.create" } }
    ] } }
]"#;

struct ReadOnlyStore;

impl KeyValueStore for ReadOnlyStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("quota exceeded".to_string()))
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

fn runtime() -> (Arc<ScriptedIdentityGateway>, Arc<HistoryNavigator>, PosRuntime) {
    runtime_with_store(Arc::new(MemoryStore::new()))
}

fn runtime_with_store(
    store: Arc<dyn KeyValueStore>,
) -> (Arc<ScriptedIdentityGateway>, Arc<HistoryNavigator>, PosRuntime) {
    let config = GuardConfig {
        provider: ProviderConfig::new("https://pos.example.test", "anon-public")
            .expect("provider fixture is valid"),
        session: SessionConfig::default(),
    };
    let gateway = Arc::new(ScriptedIdentityGateway::new(Arc::new(ManualClock::new(NOW))));
    let navigator = Arc::new(HistoryNavigator::new("/pos"));
    let loader = RecordedProfileLoader::new().with_rows("cashier-1", USER_ROW, ROLE_ROWS);
    let runtime = assemble(
        &config,
        gateway.clone(),
        Arc::new(loader),
        navigator.clone(),
        store,
    )
    .expect("runtime should assemble");
    (gateway, navigator, runtime)
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn runtime_assembly_tests_loads_profile_from_recorded_rows() {
    let (gateway, _navigator, runtime) = runtime();
    runtime.guard.start();

    gateway.sign_in(gateway.session_for("cashier-1", NOW + 3_600));
    settle().await;

    let state = runtime.guard.state();
    let profile = state.profile().expect("recorded rows should resolve");
    assert!(profile.has_permission("sales.create"));
    assert_eq!(
        profile.tenant.as_ref().map(|tenant| tenant.name.as_str()),
        Some("Harbor")
    );
}

#[tokio::test(start_paused = true)]
async fn runtime_assembly_tests_rejected_request_clears_contexts() {
    let (gateway, navigator, runtime) = runtime();
    runtime.guard.start();
    gateway.sign_in(gateway.session_for("cashier-1", NOW + 3_600));
    settle().await;

    runtime
        .tenant
        .save(TenantSelection {
            tenant_id: "t-1".to_string(),
            tenant_name: "Harbor".to_string(),
            currency_code: None,
        })
        .expect("memory store accepts writes");
    runtime.cash.set_pos_context(PosContext {
        open_cash_session_id: Some("cs-1".to_string()),
        assigned_registers_count: 1,
        single_cash_register_id: Some("r-1".to_string()),
    });

    assert!(runtime.report_request_error("JWT expired", Some("PGRST301")));

    assert_eq!(runtime.guard.state(), AuthState::Expired);
    assert!(runtime.tenant.tenant_id().is_none());
    assert!(!runtime.cash.has_open_session());
    assert_eq!(navigator.current_route(), "/login");
}

#[tokio::test(start_paused = true)]
async fn runtime_assembly_tests_unknown_user_is_platform_admin() {
    let (gateway, _navigator, runtime) = runtime();
    runtime.guard.start();
    gateway.sign_in(gateway.session_for("ops-admin", NOW + 3_600));
    settle().await;

    let state = runtime.guard.state();
    assert!(
        state
            .authorization()
            .is_some_and(|authorization| authorization.is_platform_admin())
    );
}

#[tokio::test(start_paused = true)]
async fn runtime_assembly_tests_selects_and_persists_profile_tenant() {
    let store = Arc::new(MemoryStore::new());
    let (gateway, _navigator, runtime) = runtime_with_store(store.clone());
    runtime.guard.start();

    assert_eq!(
        runtime
            .select_profile_tenant()
            .expect("nothing to persist while signed out"),
        None
    );

    gateway.sign_in(gateway.session_for("cashier-1", NOW + 3_600));
    settle().await;

    let selection = runtime
        .select_profile_tenant()
        .expect("memory store accepts writes")
        .expect("profile carries a tenant");
    assert_eq!(selection.tenant_id, "t-1");
    assert_eq!(runtime.tenant.tenant_name().as_deref(), Some("Harbor"));
    let stored = store
        .get(TENANT_STORAGE_KEY)
        .expect("memory store reads")
        .expect("selection should be stored");
    assert!(stored.contains("\"t-1\""));
}

#[tokio::test(start_paused = true)]
async fn runtime_assembly_tests_tenant_persist_failure_is_store_error() {
    let (gateway, _navigator, runtime) = runtime_with_store(Arc::new(ReadOnlyStore));
    runtime.guard.start();
    gateway.sign_in(gateway.session_for("cashier-1", NOW + 3_600));
    settle().await;

    let result = runtime.select_profile_tenant();

    assert!(matches!(result, Err(AppError::Store(StoreError::Backend(_)))));
}
