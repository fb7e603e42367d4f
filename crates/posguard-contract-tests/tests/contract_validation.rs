//! Validates contract fixtures against frozen JSON schemas and checks the
//! decoders agree with them.

use jsonschema::JSONSchema;
use posguard_core::{RoleAssignmentRecord, UserProfile, UserRecord};
use posguard_tenant::TenantSelection;
use serde_json::Value;

const CONTRACTS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../contracts");

fn load_json(name: &str) -> Value {
    let raw = std::fs::read_to_string(format!("{CONTRACTS}/{name}"))
        .expect("json file should be readable");
    serde_json::from_str(&raw).expect("json file should be valid")
}

fn compile_validator(name: &str) -> JSONSchema {
    let schema = load_json(name);
    JSONSchema::compile(&schema).expect("schema should compile")
}

fn profile_from_fixture(fixture: &Value) -> UserProfile {
    let user: UserRecord =
        serde_json::from_value(fixture["user"].clone()).expect("user row should decode");
    let roles: Vec<RoleAssignmentRecord> =
        serde_json::from_value(fixture["roles"].clone()).expect("role rows should decode");
    UserProfile::from_records(user, roles).expect("profile should build")
}

#[test]
fn profile_rows_fixture_matches_schema() {
    let validator = compile_validator("profile-rows.schema.json");
    let fixture = load_json("fixtures/profile-rows.valid.json");
    assert!(
        validator.is_valid(&fixture),
        "profile rows fixture should validate against schema"
    );

    let profile = profile_from_fixture(&fixture);
    assert_eq!(profile.roles.len(), 2);
    assert_eq!(
        profile.permission_codes().collect::<Vec<_>>(),
        vec!["reports.view", "sales.create"]
    );
}

#[test]
fn profile_rows_with_blank_user_id_fail_schema_and_decoder() {
    let validator = compile_validator("profile-rows.schema.json");
    let fixture = load_json("fixtures/profile-rows.invalid.json");
    assert!(!validator.is_valid(&fixture));

    let user: UserRecord =
        serde_json::from_value(fixture["user"].clone()).expect("row shape still decodes");
    assert!(UserProfile::from_records(user, Vec::new()).is_err());
}

#[test]
fn tenant_selection_fixture_matches_schema() {
    let validator = compile_validator("tenant-selection.schema.json");
    let fixture = load_json("fixtures/tenant-selection.valid.json");
    assert!(validator.is_valid(&fixture));

    let selection: TenantSelection =
        serde_json::from_value(fixture).expect("selection should decode");
    let encoded = serde_json::to_value(&selection).expect("selection should encode");
    assert!(validator.is_valid(&encoded));
}
