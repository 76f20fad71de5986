//! The login and callback legs of the browser redirect flow.
//!
//! A login attempt moves through these stages:
//!
//! - no pending login: the browser has not started a login;
//! - [`PendingLogin`] stored in the browser's session cookie: the browser
//!   has been sent to the provider and the callback is awaited;
//! - [`LoginSuccess`]: the provider vouched for an identity, it was
//!   resolved to a user and a token was minted;
//! - [`LoginError`]: the attempt failed and must be started over.
//!
//! The transport layer owns the cookies. It must drop the pending login on
//! every callback, whatever the outcome, and only set the auth cookie from
//! a [`LoginSuccess`].

use crate::error::LoginError;
use crate::permissions::PermissionAggregator;
use crate::provider::{IdentityProvider, ProviderKey, ProviderRegistry};
use crate::redirect::ReturnPolicy;
use crate::resolver::IdentityResolver;
use crate::session::PendingLogin;
use crate::store::Store;
use crate::token::TokenAuthority;
use crate::user::User;
use chrono::Utc;
use rootcause::Report;
use rootcause::prelude::ResultExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Where to send the browser to start a login.
#[derive(Debug, Clone)]
pub struct LoginStart {
    pub authorization_url: String,
    /// Must be stored in the browser's session before redirecting.
    pub pending: PendingLogin,
}

/// Query parameters the provider sends back to the callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
}

/// A completed login.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub token: String,
    pub user: User,
    pub redirect_to: String,
    /// Lifetime of `token`, for the cookie's max-age.
    pub expires_in: Duration,
}

/// Settings of a [`LoginFlow`] that are not collaborators.
#[derive(Debug, Clone)]
pub struct LoginSettings {
    /// Public base URL of this service, used to build callback URLs.
    pub app_url: String,
    /// Landing page when the login did not ask for a return URL.
    pub default_return: String,
    pub returns: ReturnPolicy,
}

/// Orchestrates providers, the resolver, the aggregator and the token
/// authority into the two legs of a login.
#[derive(Clone)]
pub struct LoginFlow {
    providers: ProviderRegistry,
    settings: LoginSettings,
    resolver: IdentityResolver,
    permissions: PermissionAggregator,
    tokens: Arc<TokenAuthority>,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        providers: ProviderRegistry,
        settings: LoginSettings,
        store: Arc<dyn Store>,
        tokens: Arc<TokenAuthority>,
    ) -> Self {
        Self {
            providers,
            settings,
            resolver: IdentityResolver::new(store.clone()),
            permissions: PermissionAggregator::new(store),
            tokens,
        }
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    #[must_use]
    pub fn default_return(&self) -> &str {
        &self.settings.default_return
    }

    /// Cookies are marked `Secure` unless the service is explicitly served
    /// over plain http.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        !self.settings.app_url.starts_with("http://")
    }

    /// The callback URL registered with a provider.
    #[must_use]
    pub fn callback_url(&self, provider: &ProviderKey) -> String {
        format!(
            "{}/oauth/callback/{}/{}",
            self.settings.app_url.trim_end_matches('/'),
            provider.provider_type,
            provider.name
        )
    }

    /// Starts a login against the provider at `provider_type/provider_name`.
    ///
    /// Any previous pending login is superseded by the returned one.
    #[instrument(skip(self, return_to))]
    pub fn begin(
        &self,
        provider_type: &str,
        provider_name: &str,
        return_to: Option<&str>,
    ) -> Result<LoginStart, Report<LoginError>> {
        let (provider, key) = self.provider(provider_type, provider_name)?;

        let return_to = match return_to.filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(self.settings.returns.check(raw)?),
            None => None,
        };

        let pending = PendingLogin::new(&key, return_to);
        let authorization_url = provider
            .login_url(pending.state(), &self.callback_url(&key))
            .context(LoginError::Upstream {
                provider: key.to_string(),
            })?;

        Ok(LoginStart {
            authorization_url,
            pending,
        })
    }

    /// Completes a login from the provider's callback.
    ///
    /// `pending` is the login stored by [`LoginFlow::begin`], if the browser
    /// still has one. It is consumed whatever the outcome.
    #[instrument(skip(self, params, pending))]
    pub async fn complete(
        &self,
        provider_type: &str,
        provider_name: &str,
        params: CallbackParams,
        pending: Option<PendingLogin>,
    ) -> Result<LoginSuccess, Report<LoginError>> {
        let (provider, key) = self.provider(provider_type, provider_name)?;

        let state = params
            .state
            .filter(|state| !state.is_empty())
            .ok_or(LoginError::MissingParameter { name: "state" })?;
        let code = params
            .code
            .filter(|code| !code.is_empty())
            .ok_or(LoginError::MissingParameter { name: "code" })?;

        let Some(pending) = pending else {
            warn!("callback without a pending login");
            return Err(LoginError::StateMismatch.into());
        };
        if !pending.matches(&key, &state) || pending.is_expired_at(Utc::now()) {
            warn!("callback state does not match the pending login");
            return Err(LoginError::StateMismatch.into());
        }

        let identity = provider
            .exchange(&code, &state, &self.callback_url(&key))
            .await
            .context(LoginError::Upstream {
                provider: key.to_string(),
            })?
            .scoped_to(&key.name);

        let resolution = self
            .resolver
            .resolve(&identity)
            .await
            .context(LoginError::Resolution)?;
        let user = resolution.user;

        let permissions = self
            .permissions
            .permissions_of(user.id())
            .await
            .context(LoginError::Permissions { user_id: user.id() })?;

        let expires_in = self.tokens.validity();
        let token = self
            .tokens
            .sign(user.id(), &permissions, expires_in)
            .context(LoginError::TokenIssue { user_id: user.id() })?;

        info!(user_id = %user.id(), path = ?resolution.path, "login completed");
        Ok(LoginSuccess {
            token,
            redirect_to: pending
                .return_to()
                .unwrap_or(self.settings.default_return.as_str())
                .to_string(),
            user,
            expires_in,
        })
    }

    fn provider(
        &self,
        provider_type: &str,
        provider_name: &str,
    ) -> Result<(Arc<dyn IdentityProvider>, ProviderKey), LoginError> {
        let provider = self
            .providers
            .find(provider_type, provider_name)
            .ok_or_else(|| LoginError::UnknownProvider {
                provider: format!("{provider_type}/{provider_name}"),
            })?;
        let key = ProviderKey {
            provider_type: provider.provider_type(),
            name: provider.name().to_string(),
        };
        Ok((provider, key))
    }
}
