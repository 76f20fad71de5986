//! OpenID Connect provider adapter using the openidconnect crate.
//!
//! Serves both Google (fixed issuer) and generic OIDC providers (configured
//! issuer). The login state doubles as the ID token nonce.

use async_trait::async_trait;
use openidconnect::core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, RedirectUrl, Scope,
    TokenResponse,
};
use rootcause::Report;
use thor_platform_access::{
    ExternalIdentity, IdentityProvider, ProviderConfig, ProviderError, ProviderType,
};
use tracing::{debug, instrument};

const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// Adapter for one OpenID Connect client registration.
pub struct OidcProvider {
    provider_type: ProviderType,
    name: String,
    provider_metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
    scopes: Vec<String>,
    http: reqwest::Client,
}

/// Issuer to discover for `config`.
fn issuer_of(config: &ProviderConfig) -> Result<String, ProviderError> {
    let misconfigured = |reason: &str| ProviderError::Configuration {
        provider: config.key().to_string(),
        reason: reason.to_string(),
    };

    match config.provider_type() {
        ProviderType::Google => Ok(config.issuer_url().unwrap_or(GOOGLE_ISSUER).to_string()),
        ProviderType::Oidc => config
            .issuer_url()
            .map(str::to_string)
            .ok_or_else(|| misconfigured("issuer_url is required")),
        ProviderType::Github => Err(misconfigured("not an OpenID Connect provider")),
    }
}

impl OidcProvider {
    /// Creates an adapter by discovering the provider metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unusable or discovery fails.
    #[instrument(skip_all, fields(provider = %config.key()))]
    pub async fn discover(
        config: &ProviderConfig,
        http: reqwest::Client,
    ) -> Result<Self, Report<ProviderError>> {
        let provider = config.key().to_string();
        let issuer = issuer_of(config)?;

        let issuer_url = IssuerUrl::new(issuer).map_err(|e| ProviderError::Configuration {
            provider: provider.clone(),
            reason: format!("invalid issuer URL: {e}"),
        })?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http)
            .await
            .map_err(|e| ProviderError::Configuration {
                provider: provider.clone(),
                reason: format!("failed to discover provider: {e}"),
            })?;
        debug!("discovered provider metadata");

        Ok(Self {
            provider_type: config.provider_type(),
            name: config.name().to_string(),
            provider_metadata,
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().to_string()),
            scopes: config.scopes().into_iter().map(str::to_string).collect(),
            http,
        })
    }

    fn provider(&self) -> String {
        format!("{}/{}", self.provider_type, self.name)
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
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

        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(redirect_url);

        let csrf = state.to_string();
        let nonce = state.to_string();
        let mut request = client.authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            move || CsrfToken::new(csrf),
            move || Nonce::new(nonce),
        );
        for scope in self.scopes.iter().filter(|scope| *scope != "openid") {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, _, _) = request.url();
        Ok(url.to_string())
    }

    #[instrument(skip_all, fields(provider = %self.provider()))]
    async fn exchange(
        &self,
        code: &str,
        state: &str,
        redirect_url: &str,
    ) -> Result<ExternalIdentity, Report<ProviderError>> {
        let exchange_error = |reason: String| ProviderError::Exchange {
            provider: self.provider(),
            reason,
        };
        let identity_error = |reason: String| ProviderError::Identity {
            provider: self.provider(),
            reason,
        };

        let redirect_url = RedirectUrl::new(redirect_url.to_string())
            .map_err(|e| exchange_error(format!("invalid redirect URL: {e}")))?;

        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(redirect_url);

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| exchange_error(format!("no token endpoint: {e}")))?
            .request_async(&self.http)
            .await
            .map_err(|e| exchange_error(e.to_string()))?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| identity_error("no ID token in response".to_string()))?;

        let nonce = Nonce::new(state.to_string());
        let claims = id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| identity_error(format!("ID token verification failed: {e}")))?;

        let verified = claims.email_verified().unwrap_or(false);
        if self.provider_type == ProviderType::Google && !verified {
            return Err(identity_error("email is not verified".to_string()).into());
        }

        let subject = claims.subject().to_string();
        // Unverified addresses must not be used to link accounts.
        let email = claims
            .email()
            .filter(|_| verified)
            .map(|email| email.as_str().to_string());
        let name = claims
            .name()
            .and_then(|name| name.get(None))
            .map(|name| name.as_str().to_string())
            .or_else(|| {
                claims
                    .preferred_username()
                    .map(|username| username.as_str().to_string())
            })
            .or_else(|| email.clone())
            .unwrap_or_else(|| subject.clone());

        debug!("verified ID token");
        Ok(ExternalIdentity {
            provider_type: self.provider_type,
            external_id: subject,
            email,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider_type: ProviderType) -> ProviderConfig {
        ProviderConfig::new(
            provider_type,
            "main".to_string(),
            "id".to_string(),
            "secret".to_string(),
        )
    }

    #[test]
    fn google_defaults_to_its_issuer() {
        assert_eq!(
            issuer_of(&config(ProviderType::Google)),
            Ok(GOOGLE_ISSUER.to_string())
        );
    }

    #[test]
    fn generic_oidc_uses_configured_issuer() {
        let config =
            config(ProviderType::Oidc).with_issuer_url("https://sso.corp.test".to_string());
        assert_eq!(issuer_of(&config), Ok("https://sso.corp.test".to_string()));
    }

    #[tokio::test]
    async fn generic_oidc_requires_issuer() {
        let result = OidcProvider::discover(&config(ProviderType::Oidc), reqwest::Client::new()).await;
        let error = result.err().expect("rejected before discovery");
        assert!(matches!(
            error.current_context(),
            ProviderError::Configuration { .. }
        ));
    }

    #[tokio::test]
    async fn github_is_not_an_oidc_provider() {
        let result =
            OidcProvider::discover(&config(ProviderType::Github), reqwest::Client::new()).await;
        assert!(result.is_err());
    }
}
