//! Error types for the platform-access crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: outcomes of the storage port
//! - `AccessError`: permission aggregation failures
//! - `TokenError`: signing and verification failures
//! - `ResolveError`: identity resolution failures
//! - `ProviderError`: external identity provider failures
//! - `RoleDefinitionError`: rejected role definitions
//! - `LoginError`: terminal failures of the login flow
//!
//! Errors that can reach the HTTP edge implement [`Classify`].

use std::fmt;
use thor_core::{Classify, ErrorClass, UserId};

/// Outcomes of the storage port that callers need to distinguish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed entity does not exist.
    NotFound { entity: &'static str, key: String },
    /// A unique constraint rejected the write.
    AlreadyExists { entity: &'static str, key: String },
    /// The backend failed (connection, query, decoding).
    Backend { reason: String },
}

impl StoreError {
    /// Returns true if this is a unique-constraint collision.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true if the addressed entity was missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::AlreadyExists { entity, key } => write!(f, "{entity} already exists: {key}"),
            Self::Backend { reason } => write!(f, "storage backend failure: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::AlreadyExists { .. } => ErrorClass::Conflict,
            Self::Backend { .. } => ErrorClass::Internal,
        }
    }
}

/// Errors from permission aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Roles or permissions could not be read.
    LookupFailed { user_id: UserId },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LookupFailed { user_id } => {
                write!(f, "failed to look up permissions of {user_id}")
            }
        }
    }
}

impl std::error::Error for AccessError {}

/// Errors from signing or verifying tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is not a well-formed signed token or lacks a required claim.
    Malformed { reason: String },
    /// The signature does not match the configured key.
    SignatureInvalid,
    /// The token's expiry has passed.
    Expired,
    /// The token declares an algorithm other than the configured one.
    UnsupportedAlgorithm { algorithm: String },
    /// The token was issued by someone else.
    IssuerMismatch,
    /// Signing failed.
    Signing { reason: String },
    /// The key material is unusable.
    Key { reason: String },
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed token: {reason}"),
            Self::SignatureInvalid => write!(f, "token signature is invalid"),
            Self::Expired => write!(f, "token has expired"),
            Self::UnsupportedAlgorithm { algorithm } => {
                write!(f, "unsupported token algorithm: {algorithm}")
            }
            Self::IssuerMismatch => write!(f, "token issuer mismatch"),
            Self::Signing { reason } => write!(f, "failed to sign token: {reason}"),
            Self::Key { reason } => write!(f, "invalid key material: {reason}"),
        }
    }
}

impl std::error::Error for TokenError {}

impl Classify for TokenError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Signing { .. } | Self::Key { .. } => ErrorClass::Internal,
            _ => ErrorClass::Unauthorized,
        }
    }
}

/// Errors from identity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The external identity was rejected before touching storage.
    InvalidIdentity { reason: String },
    /// Reading from storage failed.
    LookupFailed,
    /// Writing to storage failed.
    PersistFailed,
    /// A write collided but the winning record could not be read back.
    Conflict { provider: String },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIdentity { reason } => write!(f, "invalid external identity: {reason}"),
            Self::LookupFailed => write!(f, "failed to look up user"),
            Self::PersistFailed => write!(f, "failed to persist user"),
            Self::Conflict { provider } => {
                write!(f, "identity {provider} collided but no owner was found")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Errors raised by provider adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The adapter is misconfigured (bad URLs, missing endpoints).
    Configuration { provider: String, reason: String },
    /// The code exchange was rejected or failed in transit.
    Exchange { provider: String, reason: String },
    /// Fetching or verifying the identity failed.
    Identity { provider: String, reason: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { provider, reason } => {
                write!(f, "provider '{provider}' is misconfigured: {reason}")
            }
            Self::Exchange { provider, reason } => {
                write!(f, "provider '{provider}' code exchange failed: {reason}")
            }
            Self::Identity { provider, reason } => {
                write!(f, "provider '{provider}' identity lookup failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

/// Reasons a role definition is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleDefinitionError {
    EmptyName,
    NoPermissions,
    EmptyKey { index: usize },
    EmptyValue { index: usize },
}

impl fmt::Display for RoleDefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "role name is empty"),
            Self::NoPermissions => write!(f, "role has no permissions"),
            Self::EmptyKey { index } => write!(f, "permission {index} has an empty key"),
            Self::EmptyValue { index } => write!(f, "permission {index} has an empty value"),
        }
    }
}

impl std::error::Error for RoleDefinitionError {}

impl Classify for RoleDefinitionError {
    fn class(&self) -> ErrorClass {
        ErrorClass::BadRequest
    }
}

/// Terminal failures of the login and callback legs.
///
/// The `Display` output of client-visible variants is what the caller sees,
/// so it never includes stored state or provider responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// No provider is registered under this type and name.
    UnknownProvider { provider: String },
    /// The requested return URL is not acceptable.
    InvalidReturnUrl { reason: String },
    /// A required callback parameter is absent.
    MissingParameter { name: &'static str },
    /// The callback state does not match the pending login.
    StateMismatch,
    /// The provider adapter failed.
    Upstream { provider: String },
    /// Identity resolution failed.
    Resolution,
    /// Permissions of the resolved user could not be computed.
    Permissions { user_id: UserId },
    /// The token could not be minted.
    TokenIssue { user_id: UserId },
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider { provider } => write!(f, "unknown provider: {provider}"),
            Self::InvalidReturnUrl { reason } => write!(f, "invalid return url: {reason}"),
            Self::MissingParameter { name } => write!(f, "missing parameter: {name}"),
            Self::StateMismatch => write!(f, "state mismatch"),
            Self::Upstream { provider } => write!(f, "provider '{provider}' failed"),
            Self::Resolution => write!(f, "failed to resolve user"),
            Self::Permissions { user_id } => {
                write!(f, "failed to compute permissions of {user_id}")
            }
            Self::TokenIssue { user_id } => write!(f, "failed to issue token for {user_id}"),
        }
    }
}

impl std::error::Error for LoginError {}

impl Classify for LoginError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownProvider { .. }
            | Self::InvalidReturnUrl { .. }
            | Self::MissingParameter { .. }
            | Self::StateMismatch => ErrorClass::BadRequest,
            Self::Upstream { .. } => ErrorClass::Upstream,
            Self::Resolution | Self::Permissions { .. } | Self::TokenIssue { .. } => {
                ErrorClass::Internal
            }
        }
    }
}
