//! Assembly of the application state and router.

use axum::Router;
use axum::routing::get;
use rootcause::Report;
use rootcause::prelude::ResultExt;
use std::sync::Arc;
use std::time::Duration;
use thor_platform_access::{LoginFlow, LoginSettings, ReturnPolicy, Store, TokenAuthority};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::auth::{self, AppState, CookieSettings};
use crate::config::ServerConfig;
use crate::error::StartupError;

/// Builds the application state from configuration.
///
/// Provider discovery happens here, so this performs network calls.
///
/// # Errors
///
/// Returns an error if keys, cookie secret or any provider is unusable.
pub async fn build_state(
    config: &ServerConfig,
    store: Arc<dyn Store>,
) -> Result<AppState, Report<StartupError>> {
    let keys = config.token.signing_keys()?;
    let tokens = TokenAuthority::new(config.issuer(), keys, config.token.validity()).context(
        StartupError::Keys {
            reason: "signing keys rejected".to_string(),
        },
    )?;
    let tokens = Arc::new(tokens);
    tracing::info!(algorithm = ?tokens.algorithm(), issuer = tokens.issuer(), "token authority ready");

    let http = auth::provider_http_client(config.request_timeout()).context(StartupError::Config {
        reason: "provider HTTP client".to_string(),
    })?;
    let providers = auth::build_providers(&config.oauth.providers, &http)
        .await
        .context(StartupError::Provider {
            provider: "configured providers".to_string(),
        })?;
    if providers.is_empty() {
        tracing::warn!("no identity providers configured");
    }

    let settings = LoginSettings {
        app_url: config.app_url.clone(),
        default_return: config.oauth.default_return.clone(),
        returns: ReturnPolicy::new(&config.oauth.allowed_returns),
    };
    let flow = LoginFlow::new(providers, settings, store.clone(), tokens.clone());

    let cookies = CookieSettings {
        token_cookie: config.oauth.cookie_name.clone(),
        session_cookie: config.oauth.session_cookie_name.clone(),
        secure: flow.secure_cookies(),
    };
    let cookie_key = config.oauth.cookie_key()?;

    Ok(AppState::new(flow, tokens, store, cookies, cookie_key))
}

/// Builds the router with all routes registered.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route(
            "/oauth/login/{provider_type}/{provider_name}",
            get(auth::login),
        )
        .route(
            "/oauth/callback/{provider_type}/{provider_name}",
            get(auth::callback),
        )
        .route("/oauth/logout", get(auth::logout))
        .route("/public-key", get(api::public_key))
        .route("/public-keys", get(api::public_keys))
        .route("/api/whoami", get(api::whoami))
        .route("/api/claims", get(api::claims))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
