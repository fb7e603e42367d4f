#![warn(missing_docs)]
//! # posguard-core
//!
//! ## Purpose
//! Defines the pure domain model shared across the `posguard` workspace.
//!
//! ## Responsibilities
//! - Represent the authenticated user and their authorization profile.
//! - Assemble a [`UserProfile`] from the rows returned by the data platform,
//!   flattening role permissions into a deduplicated code set.
//! - Model the explicit outcome of profile resolution ([`Authorization`]).
//! - Define the narrow [`DependentContext`] contract that collaborators
//!   implement so the session guard can clear them on sign-out.
//!
//! ## Data flow
//! The data platform returns a [`UserRecord`] plus [`RoleAssignmentRecord`]
//! rows -> [`UserProfile::from_records`] flattens them -> the session state
//! machine stores the result as [`Authorization::Member`].
//!
//! ## Ownership and lifetimes
//! Profiles own all their strings so they can be shared behind `Arc` between
//! the state machine and its read-only consumers.
//!
//! ## Error model
//! Malformed rows and JSON decoding failures return [`CoreError`].
//!
//! ## Security and privacy notes
//! No credential material is held in this crate.
//!
//! ## Example
//! ```rust
//! use posguard_core::{Authorization, UserProfile, UserRecord};
//!
//! let user = UserRecord {
//!     user_id: "u-1".to_string(),
//!     auth_user_id: "auth-1".to_string(),
//!     tenant_id: Some("t-1".to_string()),
//!     email: Some("cashier@example.test".to_string()),
//!     full_name: None,
//!     is_active: true,
//!     tenants: None,
//! };
//! let profile = UserProfile::from_records(user, Vec::new()).unwrap();
//! let authorization = Authorization::member(profile);
//! assert!(!authorization.has_permission("sales.create"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of the signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Provider-issued user id.
    pub id: String,
    /// Login email, when the provider exposes one.
    pub email: Option<String>,
}

impl AuthUser {
    /// Creates a user with no email.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }
}

/// Tenant the user's profile belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRef {
    /// Tenant identifier.
    pub tenant_id: String,
    /// Display name.
    pub name: String,
    /// ISO currency code used by the tenant's registers.
    #[serde(default)]
    pub currency_code: Option<String>,
}

/// One permission granted through a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Row identifier.
    pub permission_id: String,
    /// Stable permission code checked by the UI (e.g. `sales.create`).
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Role summary kept on the profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Row identifier.
    pub role_id: String,
    /// Role name (e.g. `cashier`).
    pub name: String,
}

/// Row from the platform's `users` table joined with its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Application user id.
    pub user_id: String,
    /// Identity-provider user id this row is linked to.
    pub auth_user_id: String,
    /// Owning tenant id.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub full_name: Option<String>,
    /// Whether the account is enabled.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Joined tenant row.
    #[serde(default)]
    pub tenants: Option<TenantRef>,
}

fn default_active() -> bool {
    true
}

/// Row from the platform's `user_roles` table with nested role permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignmentRecord {
    /// Assigned role; `None` when the join produced no row.
    #[serde(default)]
    pub role: Option<RoleRecord>,
}

/// Role row with its permission links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Role id.
    pub role_id: String,
    /// Role name.
    pub name: String,
    /// Permission links for this role.
    #[serde(default)]
    pub role_permissions: Vec<RolePermissionRecord>,
}

/// Link row between a role and a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionRecord {
    /// Linked permission; `None` when the join produced no row.
    #[serde(default)]
    pub permission: Option<Permission>,
}

/// Authorization profile derived after sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Application user id.
    pub user_id: String,
    /// Identity-provider user id.
    pub auth_user_id: String,
    /// Contact email.
    pub email: Option<String>,
    /// Display name.
    pub full_name: Option<String>,
    /// Whether the account is enabled.
    pub is_active: bool,
    /// Resolved tenant.
    pub tenant: Option<TenantRef>,
    /// Roles assigned to the user.
    pub roles: Vec<Role>,
    /// Permissions across all roles, unique by code.
    pub permissions: Vec<Permission>,
}

impl UserProfile {
    /// Builds a profile from platform rows.
    ///
    /// Assignments without a role and links without a permission are skipped.
    /// Permissions are deduplicated by `code`; a later duplicate replaces the
    /// earlier entry but keeps its position.
    ///
    /// # Errors
    /// Returns [`CoreError::MissingField`] when the user row has a blank
    /// `user_id` or `auth_user_id`.
    pub fn from_records(
        user: UserRecord,
        assignments: Vec<RoleAssignmentRecord>,
    ) -> Result<Self, CoreError> {
        if user.user_id.trim().is_empty() {
            return Err(CoreError::MissingField("user_id"));
        }
        if user.auth_user_id.trim().is_empty() {
            return Err(CoreError::MissingField("auth_user_id"));
        }

        let mut roles = Vec::new();
        let mut permissions: Vec<Permission> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for role in assignments.into_iter().filter_map(|assignment| assignment.role) {
            for permission in role
                .role_permissions
                .into_iter()
                .filter_map(|link| link.permission)
            {
                match positions.get(&permission.code) {
                    Some(&index) => permissions[index] = permission,
                    None => {
                        positions.insert(permission.code.clone(), permissions.len());
                        permissions.push(permission);
                    }
                }
            }
            roles.push(Role {
                role_id: role.role_id,
                name: role.name,
            });
        }

        Ok(Self {
            user_id: user.user_id,
            auth_user_id: user.auth_user_id,
            email: user.email,
            full_name: user.full_name,
            is_active: user.is_active,
            tenant: user.tenants,
            roles,
            permissions,
        })
    }

    /// Decodes the platform's JSON rows and builds a profile.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] on malformed JSON and
    /// [`CoreError::MissingField`] on blank identifiers.
    pub fn from_json(user_json: &str, roles_json: &str) -> Result<Self, CoreError> {
        let user: UserRecord = serde_json::from_str(user_json)?;
        let assignments: Vec<RoleAssignmentRecord> = serde_json::from_str(roles_json)?;
        Self::from_records(user, assignments)
    }

    /// Iterates permission codes in first-seen order.
    pub fn permission_codes(&self) -> impl Iterator<Item = &str> {
        self.permissions.iter().map(|permission| permission.code.as_str())
    }

    /// Returns `true` when the profile grants `code`.
    pub fn has_permission(&self, code: &str) -> bool {
        self.permission_codes().any(|candidate| candidate == code)
    }

    /// Returns `true` when at least one of `codes` is granted.
    /// An empty list grants nothing.
    pub fn has_any_permission(&self, codes: &[&str]) -> bool {
        !codes.is_empty() && codes.iter().any(|code| self.has_permission(code))
    }

    /// Returns `true` when every code in `codes` is granted.
    /// An empty list grants nothing.
    pub fn has_all_permissions(&self, codes: &[&str]) -> bool {
        !codes.is_empty() && codes.iter().all(|code| self.has_permission(code))
    }

    /// Returns `true` when the user holds a role named `name`.
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.name == name)
    }
}

/// Outcome of resolving the signed-in user's authorization profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Profile could not be loaded yet; retried on the next qualifying event.
    Unresolved,
    /// Tenant user with a profile row.
    Member(Arc<UserProfile>),
    /// Authenticated identity without a profile row: platform operator who
    /// manages tenants rather than working inside one.
    PlatformAdmin,
}

impl Authorization {
    /// Wraps a freshly loaded profile.
    pub fn member(profile: UserProfile) -> Self {
        Self::Member(Arc::new(profile))
    }

    /// Returns the profile when the user is a tenant member.
    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            Self::Member(profile) => Some(profile),
            Self::Unresolved | Self::PlatformAdmin => None,
        }
    }

    /// Returns `true` once a load has produced a definitive answer.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// Returns `true` for platform operators.
    pub fn is_platform_admin(&self) -> bool {
        matches!(self, Self::PlatformAdmin)
    }

    /// See [`UserProfile::has_permission`]; `false` without a profile.
    pub fn has_permission(&self, code: &str) -> bool {
        self.profile()
            .is_some_and(|profile| profile.has_permission(code))
    }

    /// See [`UserProfile::has_any_permission`]; `false` without a profile.
    pub fn has_any_permission(&self, codes: &[&str]) -> bool {
        self.profile()
            .is_some_and(|profile| profile.has_any_permission(codes))
    }

    /// See [`UserProfile::has_all_permissions`]; `false` without a profile.
    pub fn has_all_permissions(&self, codes: &[&str]) -> bool {
        self.profile()
            .is_some_and(|profile| profile.has_all_permissions(codes))
    }

    /// See [`UserProfile::has_role`]; `false` without a profile.
    pub fn has_role(&self, name: &str) -> bool {
        self.profile().is_some_and(|profile| profile.has_role(name))
    }
}

/// Collaborator state that must be reset when the session ends.
///
/// Implementations must be idempotent and must not panic: the guard calls
/// `clear` on every forced sign-out, possibly more than once.
pub trait DependentContext: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Resets the context to its signed-out state.
    fn clear(&self);
}

/// Error type for domain validation and codec failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Required identifier is blank.
    #[error("required field is empty: {0}")]
    MissingField(&'static str),
    /// JSON encoding/decoding error.
    #[error("profile codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}
