//! Identity brokering for thor.
//!
//! This crate provides:
//! - Users, external provider links, roles and permissions
//! - The storage port (`Store`) and an in-memory implementation
//! - The permission aggregator that turns roles into token claims
//! - The token authority that signs and verifies tokens
//! - The identity resolver that maps external identities onto users
//! - The login flow that ties providers, resolver and tokens together
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use thor_platform_access::{
//!     ExternalIdentity, IdentityResolver, MemoryStore, PermissionAggregator, ProviderType,
//!     SigningKeys, TokenAuthority,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let resolver = IdentityResolver::new(store.clone());
//! let aggregator = PermissionAggregator::new(store);
//! let tokens = TokenAuthority::new(
//!     "thor",
//!     SigningKeys::Symmetric { secret: vec![7; 32] },
//!     Duration::from_secs(3600),
//! )
//! .unwrap();
//!
//! let resolution = resolver
//!     .resolve(&ExternalIdentity {
//!         provider_type: ProviderType::Github,
//!         external_id: "583231".to_string(),
//!         email: Some("octocat@github.com".to_string()),
//!         name: "The Octocat".to_string(),
//!     })
//!     .await
//!     .unwrap();
//!
//! let permissions = aggregator.permissions_of(resolution.user.id()).await.unwrap();
//! let token = tokens
//!     .sign(resolution.user.id(), &permissions, tokens.validity())
//!     .unwrap();
//! assert_eq!(tokens.verify(&token).unwrap().sub, resolution.user.id());
//! # });
//! ```

pub mod error;
pub mod login;
pub mod memory;
pub mod permissions;
pub mod provider;
pub mod redirect;
pub mod resolver;
pub mod role;
pub mod session;
pub mod store;
pub mod token;
pub mod user;

// Re-export main types at crate root
pub use error::{
    AccessError, LoginError, ProviderError, ResolveError, RoleDefinitionError, StoreError,
    TokenError,
};
pub use login::{CallbackParams, LoginFlow, LoginSettings, LoginStart, LoginSuccess};
pub use memory::MemoryStore;
pub use permissions::PermissionAggregator;
pub use provider::{IdentityProvider, ProviderConfig, ProviderKey, ProviderRegistry};
pub use redirect::ReturnPolicy;
pub use resolver::{IdentityResolver, Resolution, ResolutionPath};
pub use role::{Permission, PermissionSet, Role, RoleDefinition};
pub use session::PendingLogin;
pub use store::{Store, UserLookup};
pub use token::{Claims, SigningKeys, TokenAuthority, TokenVerifier};
pub use user::{ExternalIdentity, ProviderType, User, UserProvider};
