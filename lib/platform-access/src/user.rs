//! User domain type and related structures.
//!
//! A `User` is the internal account. External accounts at identity
//! providers are attached to it as `UserProvider` records; an
//! `ExternalIdentity` is what a provider reports after a code exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thor_core::UserId;

/// An internal user account.
///
/// Users are plain records. Once created they are never modified by this
/// crate; providers and roles are attached through the storage port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Internal user ID.
    id: UserId,
    /// Display name as reported by the first provider.
    name: String,
    /// Email address, used as a secondary linking key.
    email: Option<String>,
    /// When the user record was created.
    created_at: DateTime<Utc>,
}

impl User {
    /// Creates a new user with a freshly generated ID.
    #[must_use]
    pub fn new(name: String, email: Option<String>) -> Self {
        Self {
            id: UserId::new(),
            name,
            email,
            created_at: Utc::now(),
        }
    }

    /// Creates a user with all fields specified.
    ///
    /// Use this when reconstituting a user from storage.
    #[must_use]
    pub fn with_all_fields(
        id: UserId,
        name: String,
        email: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            email,
            created_at,
        }
    }

    /// Returns the user's internal ID.
    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    /// Returns the user's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the user's email address, if known.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns when the user was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// The kind of external identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Github,
    Google,
    /// Any other OpenID Connect issuer.
    Oidc,
}

impl ProviderType {
    /// Returns the identifier used in URLs and storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Google => "google",
            Self::Oidc => "oidc",
        }
    }

    /// Returns true if identities from this provider must carry a verified
    /// email before they can be resolved.
    ///
    /// Email is the linking key between providers, so it is only trusted
    /// from providers that verify it.
    #[must_use]
    pub fn requires_email(&self) -> bool {
        matches!(self, Self::Github | Self::Google)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown provider type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProviderType(pub String);

impl fmt::Display for UnknownProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider type: {}", self.0)
    }
}

impl std::error::Error for UnknownProviderType {}

impl FromStr for ProviderType {
    type Err = UnknownProviderType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::Github),
            "google" => Ok(Self::Google),
            "oidc" => Ok(Self::Oidc),
            other => Err(UnknownProviderType(other.to_string())),
        }
    }
}

/// An external account attached to a user.
///
/// A given `(provider_type, external_id)` pair belongs to at most one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserProvider {
    provider_type: ProviderType,
    external_id: String,
}

impl UserProvider {
    #[must_use]
    pub fn new(provider_type: ProviderType, external_id: String) -> Self {
        Self {
            provider_type,
            external_id,
        }
    }

    #[must_use]
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    #[must_use]
    pub fn external_id(&self) -> &str {
        &self.external_id
    }
}

impl fmt::Display for UserProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_type, self.external_id)
    }
}

/// An identity reported by a provider after a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider_type: ProviderType,
    pub external_id: String,
    pub email: Option<String>,
    pub name: String,
}

impl ExternalIdentity {
    /// Returns the provider record this identity would be stored as.
    #[must_use]
    pub fn provider(&self) -> UserProvider {
        UserProvider::new(self.provider_type, self.external_id.clone())
    }

    /// Qualifies the external id with the provider registration that
    /// vouched for it.
    ///
    /// An OIDC subject is only unique within its issuer, and any number of
    /// generic OIDC providers may be registered, so their subjects are
    /// stored as `name|subject`. GitHub and Google ids are global. An empty
    /// subject stays empty so the resolver still rejects it.
    #[must_use]
    pub fn scoped_to(mut self, provider_name: &str) -> Self {
        if self.provider_type == ProviderType::Oidc && !self.external_id.is_empty() {
            self.external_id = format!("{provider_name}|{}", self.external_id);
        }
        self
    }
}
