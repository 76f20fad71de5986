//! The storage port.
//!
//! Everything the access layer persists goes through [`Store`]. Lookups
//! return `Ok(None)` for missing entities; writes report collisions as
//! [`StoreError::AlreadyExists`] and missing referents as
//! [`StoreError::NotFound`], so callers can tell them apart from backend
//! failures.

use crate::error::StoreError;
use crate::role::{Permission, Role, RoleDefinition};
use crate::user::{User, UserProvider};
use async_trait::async_trait;
use rootcause::Report;
use std::collections::BTreeSet;
use thor_core::{RoleId, UserId};

/// How to address a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Id(UserId),
    /// Matches the first user created with this email.
    Email(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Persists a new user together with its first provider.
    ///
    /// Both records are written or neither is.
    async fn create_user(&self, user: &User, provider: &UserProvider)
    -> Result<(), Report<StoreError>>;

    async fn get_user(&self, lookup: &UserLookup) -> Result<Option<User>, Report<StoreError>>;

    async fn get_user_by_provider(
        &self,
        provider: &UserProvider,
    ) -> Result<Option<User>, Report<StoreError>>;

    /// Attaches another provider to an existing user.
    async fn add_provider(
        &self,
        user_id: UserId,
        provider: &UserProvider,
    ) -> Result<(), Report<StoreError>>;

    async fn providers_of_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<UserProvider>, Report<StoreError>>;

    async fn create_role(&self, definition: &RoleDefinition) -> Result<(), Report<StoreError>>;

    async fn get_role(&self, role_id: RoleId) -> Result<Option<Role>, Report<StoreError>>;

    /// Assigns a role. Assigning it twice is `AlreadyExists`.
    async fn assign_role(&self, user_id: UserId, role_id: RoleId)
    -> Result<(), Report<StoreError>>;

    /// Removes an assignment. Removing one that does not exist is `NotFound`.
    async fn remove_role(&self, user_id: UserId, role_id: RoleId)
    -> Result<(), Report<StoreError>>;

    async fn roles_of_user(&self, user_id: UserId) -> Result<Vec<Role>, Report<StoreError>>;

    async fn permissions_of_role(
        &self,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, Report<StoreError>>;

    /// Returns the distinct permissions granted by all roles of the user.
    async fn permissions_of_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Permission>, Report<StoreError>> {
        let mut permissions = BTreeSet::new();
        for role in self.roles_of_user(user_id).await? {
            permissions.extend(self.permissions_of_role(role.id()).await?);
        }
        Ok(permissions.into_iter().collect())
    }
}
