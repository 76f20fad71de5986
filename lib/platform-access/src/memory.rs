//! In-memory [`Store`] used by tests and local development.

use crate::error::StoreError;
use crate::role::{Permission, Role, RoleDefinition};
use crate::store::{Store, UserLookup};
use crate::user::{User, UserProvider};
use async_trait::async_trait;
use rootcause::Report;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thor_core::{RoleId, UserId};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    /// In creation order, so email lookups return the oldest match.
    users: Vec<User>,
    providers: HashMap<UserProvider, UserId>,
    roles: Vec<(Role, Vec<Permission>)>,
    assignments: Vec<(UserId, RoleId)>,
}

impl Inner {
    fn user(&self, user_id: UserId) -> Option<&User> {
        self.users.iter().find(|user| user.id() == user_id)
    }

    fn role(&self, role_id: RoleId) -> Option<&(Role, Vec<Permission>)> {
        self.roles.iter().find(|(role, _)| role.id() == role_id)
    }
}

/// A [`Store`] that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    writes: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users stored.
    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    /// Number of successful writes since construction.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

fn user_not_found(user_id: UserId) -> Report<StoreError> {
    StoreError::NotFound {
        entity: "user",
        key: user_id.to_string(),
    }
    .into()
}

fn role_not_found(role_id: RoleId) -> Report<StoreError> {
    StoreError::NotFound {
        entity: "role",
        key: role_id.to_string(),
    }
    .into()
}

fn provider_taken(provider: &UserProvider) -> Report<StoreError> {
    StoreError::AlreadyExists {
        entity: "provider",
        key: provider.to_string(),
    }
    .into()
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(
        &self,
        user: &User,
        provider: &UserProvider,
    ) -> Result<(), Report<StoreError>> {
        let mut inner = self.inner.write().await;
        if inner.user(user.id()).is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "user",
                key: user.id().to_string(),
            }
            .into());
        }
        if inner.providers.contains_key(provider) {
            return Err(provider_taken(provider));
        }

        inner.users.push(user.clone());
        inner.providers.insert(provider.clone(), user.id());
        self.record_write();
        Ok(())
    }

    async fn get_user(&self, lookup: &UserLookup) -> Result<Option<User>, Report<StoreError>> {
        let inner = self.inner.read().await;
        let user = match lookup {
            UserLookup::Id(user_id) => inner.user(*user_id),
            UserLookup::Email(email) => inner
                .users
                .iter()
                .find(|user| user.email() == Some(email.as_str())),
        };
        Ok(user.cloned())
    }

    async fn get_user_by_provider(
        &self,
        provider: &UserProvider,
    ) -> Result<Option<User>, Report<StoreError>> {
        let inner = self.inner.read().await;
        Ok(inner
            .providers
            .get(provider)
            .and_then(|user_id| inner.user(*user_id))
            .cloned())
    }

    async fn add_provider(
        &self,
        user_id: UserId,
        provider: &UserProvider,
    ) -> Result<(), Report<StoreError>> {
        let mut inner = self.inner.write().await;
        if inner.user(user_id).is_none() {
            return Err(user_not_found(user_id));
        }
        if inner.providers.contains_key(provider) {
            return Err(provider_taken(provider));
        }

        inner.providers.insert(provider.clone(), user_id);
        self.record_write();
        Ok(())
    }

    async fn providers_of_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<UserProvider>, Report<StoreError>> {
        let inner = self.inner.read().await;
        let mut providers: Vec<UserProvider> = inner
            .providers
            .iter()
            .filter(|(_, owner)| **owner == user_id)
            .map(|(provider, _)| provider.clone())
            .collect();
        providers.sort_by(|a, b| {
            (a.provider_type(), a.external_id()).cmp(&(b.provider_type(), b.external_id()))
        });
        Ok(providers)
    }

    async fn create_role(&self, definition: &RoleDefinition) -> Result<(), Report<StoreError>> {
        let mut inner = self.inner.write().await;
        let role = definition.role();
        if inner.role(role.id()).is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "role",
                key: role.id().to_string(),
            }
            .into());
        }

        inner
            .roles
            .push((role.clone(), definition.permissions().to_vec()));
        self.record_write();
        Ok(())
    }

    async fn get_role(&self, role_id: RoleId) -> Result<Option<Role>, Report<StoreError>> {
        let inner = self.inner.read().await;
        Ok(inner.role(role_id).map(|(role, _)| role.clone()))
    }

    async fn assign_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), Report<StoreError>> {
        let mut inner = self.inner.write().await;
        if inner.user(user_id).is_none() {
            return Err(user_not_found(user_id));
        }
        if inner.role(role_id).is_none() {
            return Err(role_not_found(role_id));
        }
        if inner.assignments.contains(&(user_id, role_id)) {
            return Err(StoreError::AlreadyExists {
                entity: "role assignment",
                key: format!("{user_id}/{role_id}"),
            }
            .into());
        }

        inner.assignments.push((user_id, role_id));
        self.record_write();
        Ok(())
    }

    async fn remove_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), Report<StoreError>> {
        let mut inner = self.inner.write().await;
        let before = inner.assignments.len();
        inner
            .assignments
            .retain(|assignment| *assignment != (user_id, role_id));
        if inner.assignments.len() == before {
            return Err(StoreError::NotFound {
                entity: "role assignment",
                key: format!("{user_id}/{role_id}"),
            }
            .into());
        }

        self.record_write();
        Ok(())
    }

    async fn roles_of_user(&self, user_id: UserId) -> Result<Vec<Role>, Report<StoreError>> {
        let inner = self.inner.read().await;
        Ok(inner
            .assignments
            .iter()
            .filter(|(owner, _)| *owner == user_id)
            .filter_map(|(_, role_id)| inner.role(*role_id))
            .map(|(role, _)| role.clone())
            .collect())
    }

    async fn permissions_of_role(
        &self,
        role_id: RoleId,
    ) -> Result<Vec<Permission>, Report<StoreError>> {
        let inner = self.inner.read().await;
        inner
            .role(role_id)
            .map(|(_, permissions)| permissions.clone())
            .ok_or_else(|| role_not_found(role_id))
    }
}
