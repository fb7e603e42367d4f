#![warn(missing_docs)]
//! # posguard-app binary
//!
//! Headless walkthrough of the session guard against an in-memory provider.

use std::sync::Arc;
use std::time::Duration;

use posguard_app::{GuardConfig, RecordedProfileLoader, app_version, assemble, init_tracing};
use posguard_identity::{Clock, ScriptedIdentityGateway, SystemClock};
use posguard_session::{HistoryNavigator, RouteAccess};
use posguard_tenant::MemoryStore;
use tracing::{error, info};

const DEMO_USER_ROW: &str = r#"{
    "user_id": "u-demo",
    "auth_user_id": "demo-cashier",
    "tenant_id": "t-demo",
    "full_name": "Demo Cashier",
    "tenants": { "tenant_id": "t-demo", "name": "Demo Store", "currency_code": "USD" }
}"#;

const DEMO_ROLE_ROWS: &str = r#"[
    { "role": { "role_id": "r-cashier", "name": "cashier", "role_permissions": [
        { "permission": { "permission_id": "p-1", "code": "sales.create" } },
        { "permission": { "permission_id": "p-2", "code": "cash.open" } }
    ] } }
]"#;

/// CLI entry point.
#[tokio::main]
async fn main() {
    init_tracing();
    info!(version = app_version(), "posguard starting");

    let config = match GuardConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(error = %error, "startup configuration rejected");
            std::process::exit(1);
        }
    };
    info!(provider = %config.provider.url, "provider configured");

    let gateway = Arc::new(ScriptedIdentityGateway::new(Arc::new(SystemClock)));
    let loader = Arc::new(RecordedProfileLoader::new().with_rows(
        "demo-cashier",
        DEMO_USER_ROW,
        DEMO_ROLE_ROWS,
    ));
    let navigator = Arc::new(HistoryNavigator::new("/login"));

    let runtime = match assemble(
        &config,
        gateway.clone(),
        loader,
        navigator.clone(),
        Arc::new(MemoryStore::new()),
    ) {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(error = %error, "could not assemble session guard");
            std::process::exit(1);
        }
    };

    runtime.guard.start();
    runtime.guard.restore().await;

    let now = SystemClock.now_epoch_secs();
    gateway.sign_in(gateway.session_for("demo-cashier", now + 3_600));
    tokio::time::sleep(Duration::from_millis(50)).await;

    if let Err(error) = runtime.select_profile_tenant() {
        error!(error = %error, "could not persist tenant selection");
    }

    let decision = runtime.guard.routes().authorize(RouteAccess::RequiresAuth).await;
    info!(
        ?decision,
        tenant = runtime.tenant.tenant_name().as_deref().unwrap_or("-"),
        "signed in"
    );

    runtime.report_request_error("JWT expired: token=demo", Some("PGRST301"));
    info!(
        state = ?runtime.guard.state(),
        route = %navigator.history().join(" -> "),
        "session ended"
    );

    runtime.guard.shutdown();
}
