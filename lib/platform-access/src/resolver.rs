//! Maps external identities onto internal users.
//!
//! Resolution order:
//! 1. an existing link for `(provider_type, external_id)` wins outright;
//! 2. otherwise a user with the same email gets the new provider linked;
//! 3. otherwise a new user is created together with the provider link.
//!
//! When a write collides with a concurrent resolution of the same identity
//! the winner is read back through the provider link.
//!
//! Resolution is only invoked from the callback leg of the login flow,
//! after the provider has vouched for the identity.

use crate::error::ResolveError;
use crate::store::{Store, UserLookup};
use crate::user::{ExternalIdentity, User, UserProvider};
use rootcause::Report;
use rootcause::prelude::ResultExt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Which path of the resolution produced the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPath {
    /// The provider was already linked; nothing was written.
    Existing,
    /// The provider was linked to a user found by email.
    Linked,
    /// A new user was created.
    Created,
    /// A write collided and the concurrent winner was returned.
    Recovered,
}

/// The user an external identity resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub user: User,
    pub path: ResolutionPath,
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn Store>,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Returns the single user `identity` corresponds to, linking or
    /// creating records as needed.
    #[instrument(
        skip(self, identity),
        fields(provider = %identity.provider_type, external_id = %identity.external_id)
    )]
    pub async fn resolve(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<Resolution, Report<ResolveError>> {
        validate(identity)?;
        let provider = identity.provider();

        if let Some(user) = self.by_provider(&provider).await? {
            return Ok(Resolution {
                user,
                path: ResolutionPath::Existing,
            });
        }

        if let Some(email) = &identity.email {
            let linked = self
                .store
                .get_user(&UserLookup::Email(email.clone()))
                .await
                .context(ResolveError::LookupFailed)?;

            if let Some(user) = linked {
                return match self.store.add_provider(user.id(), &provider).await {
                    Ok(()) => {
                        info!(user_id = %user.id(), "linked provider to existing user");
                        Ok(Resolution {
                            user,
                            path: ResolutionPath::Linked,
                        })
                    }
                    Err(report) if report.current_context().is_already_exists() => {
                        self.recover(&provider).await
                    }
                    Err(report) => Err(report.context(ResolveError::PersistFailed)),
                };
            }
        }

        let user = User::new(identity.name.clone(), identity.email.clone());
        match self.store.create_user(&user, &provider).await {
            Ok(()) => {
                info!(user_id = %user.id(), "created user");
                Ok(Resolution {
                    user,
                    path: ResolutionPath::Created,
                })
            }
            Err(report) if report.current_context().is_already_exists() => {
                self.recover(&provider).await
            }
            Err(report) => Err(report.context(ResolveError::PersistFailed)),
        }
    }

    async fn by_provider(
        &self,
        provider: &UserProvider,
    ) -> Result<Option<User>, Report<ResolveError>> {
        self.store
            .get_user_by_provider(provider)
            .await
            .context(ResolveError::LookupFailed)
    }

    /// Reads back the user that won a colliding write.
    async fn recover(&self, provider: &UserProvider) -> Result<Resolution, Report<ResolveError>> {
        warn!("write collided with a concurrent resolution, retrying lookup");
        match self.by_provider(provider).await? {
            Some(user) => Ok(Resolution {
                user,
                path: ResolutionPath::Recovered,
            }),
            None => Err(ResolveError::Conflict {
                provider: provider.to_string(),
            }
            .into()),
        }
    }
}

fn validate(identity: &ExternalIdentity) -> Result<(), ResolveError> {
    if identity.external_id.trim().is_empty() {
        return Err(ResolveError::InvalidIdentity {
            reason: "empty external id".to_string(),
        });
    }
    let has_email = identity
        .email
        .as_deref()
        .is_some_and(|email| !email.trim().is_empty());
    if identity.provider_type.requires_email() && !has_email {
        return Err(ResolveError::InvalidIdentity {
            reason: format!("{} identities need a verified email", identity.provider_type),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::MemoryStore;
    use crate::role::{Permission, Role, RoleDefinition};
    use crate::user::ProviderType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use thor_core::{RoleId, UserId};

    fn identity(provider_type: ProviderType, external_id: &str, email: Option<&str>) -> ExternalIdentity {
        ExternalIdentity {
            provider_type,
            external_id: external_id.to_string(),
            email: email.map(str::to_string),
            name: "Alice".to_string(),
        }
    }

    fn resolver(store: &Arc<MemoryStore>) -> IdentityResolver {
        IdentityResolver::new(store.clone())
    }

    #[tokio::test]
    async fn same_identity_resolves_to_same_user() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(&store);
        let github = identity(ProviderType::Github, "1", Some("a@x.com"));

        let first = resolver.resolve(&github).await.expect("first resolution");
        let second = resolver.resolve(&github).await.expect("second resolution");

        assert_eq!(first.path, ResolutionPath::Created);
        assert_eq!(second.path, ResolutionPath::Existing);
        assert_eq!(first.user.id(), second.user.id());
    }

    #[tokio::test]
    async fn providers_with_same_email_share_a_user() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(&store);
        let github = identity(ProviderType::Github, "gh-1", Some("a@x.com"));
        let google = identity(ProviderType::Google, "g-1", Some("a@x.com"));

        let created = resolver.resolve(&github).await.expect("github");
        let linked = resolver.resolve(&google).await.expect("google");
        assert_eq!(created.path, ResolutionPath::Created);
        assert_eq!(linked.path, ResolutionPath::Linked);
        assert_eq!(linked.user.id(), created.user.id());

        let writes = store.write_count();
        let again = resolver.resolve(&github).await.expect("github again");
        assert_eq!(again.path, ResolutionPath::Existing);
        assert_eq!(again.user.id(), created.user.id());
        assert_eq!(store.write_count(), writes, "fast path must not write");

        let providers = store
            .providers_of_user(created.user.id())
            .await
            .expect("providers");
        assert_eq!(providers.len(), 2);
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn parallel_resolutions_create_one_user() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(&store);
        let github = identity(ProviderType::Github, "1", Some("a@x.com"));

        let (first, second) = tokio::join!(resolver.resolve(&github), resolver.resolve(&github));
        let first = first.expect("first resolution");
        let second = second.expect("second resolution");

        assert_eq!(first.user.id(), second.user.id());
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn empty_external_id_is_rejected_before_storage() {
        let store = Arc::new(MemoryStore::new());
        let err = resolver(&store)
            .resolve(&identity(ProviderType::Oidc, " ", Some("a@x.com")))
            .await
            .expect_err("empty external id");

        assert!(matches!(
            err.current_context(),
            ResolveError::InvalidIdentity { .. }
        ));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn email_required_for_verifying_providers() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(&store);

        let err = resolver
            .resolve(&identity(ProviderType::Google, "g-1", None))
            .await
            .expect_err("google without email");
        assert!(matches!(
            err.current_context(),
            ResolveError::InvalidIdentity { .. }
        ));

        let resolved = resolver
            .resolve(&identity(ProviderType::Oidc, "sub-1", None))
            .await
            .expect("oidc without email");
        assert_eq!(resolved.user.email(), None);
        assert_eq!(store.user_count().await, 1);
    }

    /// Delegates to a `MemoryStore` but hides the first provider lookup, the
    /// way a concurrent writer landing between lookup and create would.
    struct RacingStore {
        inner: MemoryStore,
        hidden: AtomicBool,
    }

    #[async_trait]
    impl Store for RacingStore {
        async fn create_user(
            &self,
            user: &User,
            provider: &UserProvider,
        ) -> Result<(), Report<StoreError>> {
            self.inner.create_user(user, provider).await
        }

        async fn get_user(&self, lookup: &UserLookup) -> Result<Option<User>, Report<StoreError>> {
            self.inner.get_user(lookup).await
        }

        async fn get_user_by_provider(
            &self,
            provider: &UserProvider,
        ) -> Result<Option<User>, Report<StoreError>> {
            if !self.hidden.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_user_by_provider(provider).await
        }

        async fn add_provider(
            &self,
            user_id: UserId,
            provider: &UserProvider,
        ) -> Result<(), Report<StoreError>> {
            self.inner.add_provider(user_id, provider).await
        }

        async fn providers_of_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<UserProvider>, Report<StoreError>> {
            self.inner.providers_of_user(user_id).await
        }

        async fn create_role(&self, definition: &RoleDefinition) -> Result<(), Report<StoreError>> {
            self.inner.create_role(definition).await
        }

        async fn get_role(&self, role_id: RoleId) -> Result<Option<Role>, Report<StoreError>> {
            self.inner.get_role(role_id).await
        }

        async fn assign_role(
            &self,
            user_id: UserId,
            role_id: RoleId,
        ) -> Result<(), Report<StoreError>> {
            self.inner.assign_role(user_id, role_id).await
        }

        async fn remove_role(
            &self,
            user_id: UserId,
            role_id: RoleId,
        ) -> Result<(), Report<StoreError>> {
            self.inner.remove_role(user_id, role_id).await
        }

        async fn roles_of_user(&self, user_id: UserId) -> Result<Vec<Role>, Report<StoreError>> {
            self.inner.roles_of_user(user_id).await
        }

        async fn permissions_of_role(
            &self,
            role_id: RoleId,
        ) -> Result<Vec<Permission>, Report<StoreError>> {
            self.inner.permissions_of_role(role_id).await
        }
    }

    #[tokio::test]
    async fn collision_on_create_returns_the_winner() {
        let inner = MemoryStore::new();
        let winner = User::new("Winner".to_string(), None);
        inner
            .create_user(
                &winner,
                &UserProvider::new(ProviderType::Oidc, "sub-1".to_string()),
            )
            .await
            .expect("seed winner");
        let store = Arc::new(RacingStore {
            inner,
            hidden: AtomicBool::new(false),
        });

        let resolved = IdentityResolver::new(store.clone())
            .resolve(&identity(ProviderType::Oidc, "sub-1", None))
            .await
            .expect("recovered");

        assert_eq!(resolved.path, ResolutionPath::Recovered);
        assert_eq!(resolved.user.id(), winner.id());
        assert_eq!(store.inner.user_count().await, 1);
    }

    #[tokio::test]
    async fn collision_on_link_returns_the_winner() {
        let inner = MemoryStore::new();
        let owner = User::new("Owner".to_string(), Some("a@x.com".to_string()));
        inner
            .create_user(
                &owner,
                &UserProvider::new(ProviderType::Github, "gh-1".to_string()),
            )
            .await
            .expect("seed owner");
        inner
            .add_provider(
                owner.id(),
                &UserProvider::new(ProviderType::Google, "g-1".to_string()),
            )
            .await
            .expect("seed link");
        let store = Arc::new(RacingStore {
            inner,
            hidden: AtomicBool::new(false),
        });

        let resolved = IdentityResolver::new(store)
            .resolve(&identity(ProviderType::Google, "g-1", Some("a@x.com")))
            .await
            .expect("recovered");

        assert_eq!(resolved.path, ResolutionPath::Recovered);
        assert_eq!(resolved.user.id(), owner.id());
    }
}
