//! GitHub provider adapter.
//!
//! GitHub speaks plain OAuth2, not OpenID Connect: the code is exchanged
//! for an access token, which is then used against the REST API to fetch
//! the account and its primary verified email.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use reqwest::header::{ACCEPT, USER_AGENT};
use rootcause::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thor_platform_access::{
    ExternalIdentity, IdentityProvider, ProviderConfig, ProviderError, ProviderType,
};
use tracing::{debug, instrument};

const AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const API_URL: &str = "https://api.github.com";

/// Adapter for one GitHub OAuth app.
pub struct GithubProvider {
    name: String,
    client_id: ClientId,
    client_secret: ClientSecret,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    api_url: String,
    scopes: Vec<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

impl GithubProvider {
    /// Creates an adapter against github.com.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URLs are invalid.
    pub fn new(
        config: &ProviderConfig,
        http: reqwest::Client,
    ) -> Result<Self, Report<ProviderError>> {
        Self::with_endpoints(config, http, AUTH_URL, TOKEN_URL, API_URL)
    }

    /// Creates an adapter against a GitHub Enterprise installation or any
    /// other host exposing the same endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URLs are invalid.
    pub fn with_endpoints(
        config: &ProviderConfig,
        http: reqwest::Client,
        auth_url: &str,
        token_url: &str,
        api_url: &str,
    ) -> Result<Self, Report<ProviderError>> {
        let misconfigured = |reason: String| ProviderError::Configuration {
            provider: config.key().to_string(),
            reason,
        };

        let auth_url = AuthUrl::new(auth_url.to_string())
            .map_err(|e| misconfigured(format!("invalid authorization URL: {e}")))?;
        let token_url = TokenUrl::new(token_url.to_string())
            .map_err(|e| misconfigured(format!("invalid token URL: {e}")))?;

        Ok(Self {
            name: config.name().to_string(),
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().to_string()),
            auth_url,
            token_url,
            api_url: api_url.trim_end_matches('/').to_string(),
            scopes: config.scopes().into_iter().map(str::to_string).collect(),
            http,
        })
    }

    fn provider(&self) -> String {
        format!("github/{}", self.name)
    }

    async fn api_get<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<T, ProviderError> {
        let identity_error = |e: reqwest::Error| ProviderError::Identity {
            provider: self.provider(),
            reason: format!("GET {path}: {e}"),
        };

        self.http
            .get(format!("{}{path}", self.api_url))
            .bearer_auth(access_token)
            .header(USER_AGENT, "thor")
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(identity_error)?
            .error_for_status()
            .map_err(identity_error)?
            .json()
            .await
            .map_err(identity_error)
    }
}

/// Picks the address GitHub considers the account's primary one, if it is
/// verified.
fn primary_verified_email(emails: Vec<GithubEmail>) -> Option<String> {
    emails
        .into_iter()
        .find(|email| email.primary && email.verified)
        .map(|email| email.email)
}

#[async_trait]
impl IdentityProvider for GithubProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Github
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn login_url(&self, state: &str, redirect_url: &str) -> Result<String, Report<ProviderError>> {
        let redirect_url =
            RedirectUrl::new(redirect_url.to_string()).map_err(|e| ProviderError::Configuration {
                provider: self.provider(),
                reason: format!("invalid redirect URL: {e}"),
            })?;

        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_auth_uri(self.auth_url.clone())
            .set_redirect_uri(redirect_url);

        let state = state.to_string();
        let mut request = client.authorize_url(move || CsrfToken::new(state));
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, _) = request.url();
        Ok(url.to_string())
    }

    #[instrument(skip_all, fields(provider = %self.provider()))]
    async fn exchange(
        &self,
        code: &str,
        _state: &str,
        redirect_url: &str,
    ) -> Result<ExternalIdentity, Report<ProviderError>> {
        let exchange_error = |reason: String| ProviderError::Exchange {
            provider: self.provider(),
            reason,
        };

        let redirect_url = RedirectUrl::new(redirect_url.to_string())
            .map_err(|e| exchange_error(format!("invalid redirect URL: {e}")))?;

        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_auth_uri(self.auth_url.clone())
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(redirect_url);

        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| exchange_error(e.to_string()))?;
        let access_token = token.access_token().secret();

        let user: GithubUser = self.api_get("/user", access_token).await?;
        let emails: Vec<GithubEmail> = self.api_get("/user/emails", access_token).await?;
        let email = primary_verified_email(emails).ok_or_else(|| ProviderError::Identity {
            provider: self.provider(),
            reason: "account has no verified primary email".to_string(),
        })?;

        debug!(github_id = user.id, "fetched GitHub account");
        Ok(ExternalIdentity {
            provider_type: ProviderType::Github,
            external_id: user.id.to_string(),
            email: Some(email),
            name: user.name.filter(|name| !name.is_empty()).unwrap_or(user.login),
        })
    }
}
