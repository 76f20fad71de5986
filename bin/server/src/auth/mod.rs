//! Authentication module for the thor server.
//!
//! This module provides:
//! - The login, callback and logout routes of the browser redirect flow
//! - GitHub and OpenID Connect provider adapters
//! - The extractor that verifies the auth cookie on API routes
//!
//! # Cookies
//!
//! Two cookies are involved. The session cookie is encrypted with the
//! configured cookie secret and only carries the pending login between the
//! two legs of the flow. The auth cookie carries the signed token; it is
//! readable by any service that trusts the token authority's key.

pub mod github;
pub mod middleware;
pub mod oidc;
pub mod routes;

pub use github::GithubProvider;
pub use middleware::RequireClaims;
pub use oidc::OidcProvider;
pub use routes::{callback, login, logout};

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use rootcause::Report;
use std::sync::Arc;
use std::time::Duration;
use thor_platform_access::{
    LoginFlow, ProviderConfig, ProviderError, ProviderRegistry, ProviderType, Store,
    TokenAuthority,
};

/// Names and flags of the cookies the server sets.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Cookie carrying the signed token.
    pub token_cookie: String,
    /// Encrypted cookie carrying the pending login.
    pub session_cookie: String,
    /// Whether cookies are marked `Secure`.
    pub secure: bool,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<LoginFlow>,
    pub tokens: Arc<TokenAuthority>,
    pub store: Arc<dyn Store>,
    pub cookies: CookieSettings,
    cookie_key: Key,
}

impl AppState {
    /// Creates a new application state.
    #[must_use]
    pub fn new(
        flow: LoginFlow,
        tokens: Arc<TokenAuthority>,
        store: Arc<dyn Store>,
        cookies: CookieSettings,
        cookie_key: Key,
    ) -> Self {
        Self {
            flow: Arc::new(flow),
            tokens,
            store,
            cookies,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Builds the HTTP client shared by all provider adapters.
///
/// Redirects are not followed so a provider cannot bounce requests
/// elsewhere.
///
/// # Errors
///
/// Returns an error if the client cannot be built.
pub fn provider_http_client(timeout: Duration) -> Result<reqwest::Client, Report<ProviderError>> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| {
            ProviderError::Configuration {
                provider: "*".to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            }
            .into()
        })
}

/// Builds an adapter for every configured provider.
///
/// OpenID Connect providers are discovered here, so this performs network
/// calls.
///
/// # Errors
///
/// Returns an error for the first provider that cannot be set up.
pub async fn build_providers(
    configs: &[ProviderConfig],
    http: &reqwest::Client,
) -> Result<ProviderRegistry, Report<ProviderError>> {
    let mut registry = ProviderRegistry::new();
    for config in configs {
        match config.provider_type() {
            ProviderType::Github => {
                registry.register(Arc::new(GithubProvider::new(config, http.clone())?));
            }
            ProviderType::Google | ProviderType::Oidc => {
                registry.register(Arc::new(OidcProvider::discover(config, http.clone()).await?));
            }
        }
        tracing::info!(provider = %config.key(), "registered identity provider");
    }
    Ok(registry)
}
