//! Role and permission types for access control.
//!
//! Permissions are granted to roles and roles to users. A token carries
//! the union of the permissions of all the user's roles as a map from key
//! to the set of granted values.

use crate::error::RoleDefinitionError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thor_core::RoleId;

/// A named group of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    id: RoleId,
    name: String,
}

impl Role {
    /// Creates a role with a freshly generated ID.
    #[must_use]
    pub fn new(name: String) -> Self {
        Self {
            id: RoleId::new(),
            name,
        }
    }

    /// Reconstitutes a role from storage.
    #[must_use]
    pub fn with_id(id: RoleId, name: String) -> Self {
        Self { id, name }
    }

    #[must_use]
    pub fn id(&self) -> RoleId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A single `(key, value)` grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub key: String,
    pub value: String,
}

impl Permission {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A validated role together with its permissions, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDefinition {
    role: Role,
    permissions: Vec<Permission>,
}

impl RoleDefinition {
    /// Validates a new role.
    ///
    /// The name must be non-empty, there must be at least one permission,
    /// and every permission needs a non-empty key and value.
    pub fn new(name: String, permissions: Vec<Permission>) -> Result<Self, RoleDefinitionError> {
        if name.trim().is_empty() {
            return Err(RoleDefinitionError::EmptyName);
        }
        if permissions.is_empty() {
            return Err(RoleDefinitionError::NoPermissions);
        }
        for (index, permission) in permissions.iter().enumerate() {
            if permission.key.is_empty() {
                return Err(RoleDefinitionError::EmptyKey { index });
            }
            if permission.value.is_empty() {
                return Err(RoleDefinitionError::EmptyValue { index });
            }
        }

        let mut permissions = permissions;
        permissions.sort();
        permissions.dedup();

        Ok(Self {
            role: Role::new(name),
            permissions,
        })
    }

    #[must_use]
    pub fn role(&self) -> &Role {
        &self.role
    }

    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }
}

/// De-duplicated set of permissions.
///
/// Conflicting values for the same key are all kept; there is no
/// precedence between roles. Serializes as `{"key": ["value", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, BTreeSet<String>>", into = "BTreeMap<String, BTreeSet<String>>")]
pub struct PermissionSet {
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl PermissionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a permission. Returns false if it was already present.
    pub fn insert(&mut self, permission: Permission) -> bool {
        self.grants
            .entry(permission.key)
            .or_default()
            .insert(permission.value)
    }

    #[must_use]
    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.grants
            .get(key)
            .is_some_and(|values| values.contains(value))
    }

    /// Returns every value granted for `key`.
    pub fn values(&self, key: &str) -> impl Iterator<Item = &str> {
        self.grants
            .get(key)
            .into_iter()
            .flat_map(|values| values.iter().map(String::as_str))
    }

    /// Iterates over all `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.grants.iter().flat_map(|(key, values)| {
            values
                .iter()
                .map(move |value| (key.as_str(), value.as_str()))
        })
    }

    /// Number of distinct `(key, value)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<Permission> for PermissionSet {
    fn extend<I: IntoIterator<Item = Permission>>(&mut self, iter: I) {
        for permission in iter {
            self.insert(permission);
        }
    }
}

impl From<BTreeMap<String, BTreeSet<String>>> for PermissionSet {
    fn from(mut grants: BTreeMap<String, BTreeSet<String>>) -> Self {
        grants.retain(|_, values| !values.is_empty());
        Self { grants }
    }
}

impl From<PermissionSet> for BTreeMap<String, BTreeSet<String>> {
    fn from(set: PermissionSet) -> Self {
        set.grants
    }
}
