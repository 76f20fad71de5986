//! External identity providers.
//!
//! A provider adapter knows how to send a browser to its authorization
//! page and how to turn the returned code into an [`ExternalIdentity`].
//! Adapters are registered under a `(type, name)` key, which is also the
//! shape of the login and callback routes.

use crate::error::ProviderError;
use crate::user::{ExternalIdentity, ProviderType};
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Name distinguishing several providers of the same type.
    fn name(&self) -> &str;

    /// Builds the authorization URL the browser is redirected to.
    fn login_url(&self, state: &str, redirect_url: &str) -> Result<String, Report<ProviderError>>;

    /// Exchanges an authorization code for the identity it vouches for.
    ///
    /// `state` is the value the login leg embedded in the authorization URL;
    /// OpenID Connect adapters use it as the ID token nonce.
    async fn exchange(
        &self,
        code: &str,
        state: &str,
        redirect_url: &str,
    ) -> Result<ExternalIdentity, Report<ProviderError>>;
}

/// Identifies a registered provider, e.g. `github/main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub provider_type: ProviderType,
    pub name: String,
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_type, self.name)
    }
}

/// The set of configured provider adapters.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider. A provider with the same type and name is replaced.
    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.retain(|existing| {
            existing.provider_type() != provider.provider_type() || existing.name() != provider.name()
        });
        self.providers.push(provider);
    }

    /// Looks a provider up by the raw path segments of a route.
    #[must_use]
    pub fn find(&self, provider_type: &str, name: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.provider_type().as_str() == provider_type && provider.name() == name)
            .cloned()
    }

    /// Keys of all registered providers, in registration order.
    pub fn keys(&self) -> impl Iterator<Item = ProviderKey> + '_ {
        self.providers.iter().map(|provider| ProviderKey {
            provider_type: provider.provider_type(),
            name: provider.name().to_string(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Configuration of one provider adapter.
///
/// Fields with defaults can be omitted when loading from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which adapter to build.
    #[serde(rename = "type")]
    provider_type: ProviderType,
    /// Route name of the provider, e.g. "main".
    name: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// Issuer URL used for discovery. Required for `oidc`, ignored otherwise.
    #[serde(default)]
    issuer_url: Option<String>,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Defaults depend on the provider type.
    #[serde(default)]
    scopes: Option<String>,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(
        provider_type: ProviderType,
        name: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            provider_type,
            name,
            client_id,
            client_secret,
            issuer_url: None,
            scopes: None,
        }
    }

    /// Sets the discovery issuer URL.
    #[must_use]
    pub fn with_issuer_url(mut self, issuer_url: String) -> Self {
        self.issuer_url = Some(issuer_url);
        self
    }

    /// Overrides the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = Some(scopes.join(","));
        self
    }

    #[must_use]
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn key(&self) -> ProviderKey {
        ProviderKey {
            provider_type: self.provider_type,
            name: self.name.clone(),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    #[must_use]
    pub fn issuer_url(&self) -> Option<&str> {
        self.issuer_url.as_deref()
    }

    /// Returns the scopes to request, parsed from the comma-separated string
    /// or the defaults for the provider type.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        match &self.scopes {
            Some(scopes) => scopes
                .split(',')
                .map(str::trim)
                .filter(|scope| !scope.is_empty())
                .collect(),
            None => match self.provider_type {
                ProviderType::Github => vec!["read:user", "user:email"],
                ProviderType::Google | ProviderType::Oidc => vec!["openid", "email", "profile"],
            },
        }
    }
}
