//! Authentication routes for login, callback, and logout.

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, PrivateCookieJar, SameSite};
use serde::Deserialize;
use thor_platform_access::session::PENDING_LOGIN_TTL_SECS;
use thor_platform_access::{CallbackParams, PendingLogin};
use time::Duration as TimeDuration;
use tracing::warn;

use super::AppState;
use crate::error::ApiError;

/// Query parameters for the login route.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Where to send the browser after a successful login.
    #[serde(rename = "return")]
    return_to: Option<String>,
}

/// Query parameters for the provider callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    state: Option<String>,
    code: Option<String>,
}

/// A `302 Found` to `location`.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Starts a login by redirecting to the identity provider.
pub async fn login(
    State(state): State<AppState>,
    Path((provider_type, provider_name)): Path<(String, String)>,
    Query(query): Query<LoginQuery>,
    jar: PrivateCookieJar,
) -> Response {
    let start = match state
        .flow
        .begin(&provider_type, &provider_name, query.return_to.as_deref())
    {
        Ok(start) => start,
        Err(report) => {
            let jar = jar.remove(Cookie::build((state.cookies.session_cookie.clone(), "")).path("/"));
            return (jar, ApiError::from(report)).into_response();
        }
    };

    let pending = match serde_json::to_string(&start.pending) {
        Ok(pending) => pending,
        Err(e) => return ApiError::internal(e).into_response(),
    };

    // Replaces any pending login from an earlier attempt.
    let cookie = Cookie::build((state.cookies.session_cookie.clone(), pending))
        .path("/")
        .http_only(true)
        .secure(state.cookies.secure)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::seconds(PENDING_LOGIN_TTL_SECS));

    (jar.add(cookie), found(&start.authorization_url)).into_response()
}

/// Handles the callback after the user authenticates with the identity provider.
///
/// The pending login is dropped whatever the outcome; the auth cookie is
/// only set on success.
pub async fn callback(
    State(state): State<AppState>,
    Path((provider_type, provider_name)): Path<(String, String)>,
    Query(query): Query<CallbackQuery>,
    jar: PrivateCookieJar,
    cookies: CookieJar,
) -> Response {
    let pending = jar
        .get(&state.cookies.session_cookie)
        .and_then(|cookie| match serde_json::from_str::<PendingLogin>(cookie.value()) {
            Ok(pending) => Some(pending),
            Err(e) => {
                warn!(error = %e, "discarding unreadable pending login");
                None
            }
        });
    let jar = jar.remove(Cookie::build((state.cookies.session_cookie.clone(), "")).path("/"));

    let params = CallbackParams {
        state: query.state,
        code: query.code,
    };

    match state
        .flow
        .complete(&provider_type, &provider_name, params, pending)
        .await
    {
        Ok(success) => {
            let max_age = i64::try_from(success.expires_in.as_secs()).unwrap_or(i64::MAX);
            let token_cookie = Cookie::build((state.cookies.token_cookie.clone(), success.token))
                .path("/")
                .http_only(true)
                .secure(state.cookies.secure)
                .same_site(SameSite::Lax)
                .max_age(TimeDuration::seconds(max_age));

            (jar, cookies.add(token_cookie), found(&success.redirect_to)).into_response()
        }
        Err(report) => (jar, ApiError::from(report)).into_response(),
    }
}

/// Drops the auth cookie and returns to the landing page.
pub async fn logout(State(state): State<AppState>, cookies: CookieJar) -> Response {
    let cookies = cookies.remove(Cookie::build((state.cookies.token_cookie.clone(), "")).path("/"));
    (cookies, found(state.flow.default_return())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::router;
    use crate::auth::CookieSettings;
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{HeaderMap, Request};
    use axum_extra::extract::cookie::Key;
    use rootcause::Report;
    use std::sync::Arc;
    use std::time::Duration;
    use thor_platform_access::{
        ExternalIdentity, IdentityProvider, LoginFlow, LoginSettings, MemoryStore, Permission,
        ProviderError, ProviderRegistry, ProviderType, ReturnPolicy, RoleDefinition,
        SigningKeys, Store, TokenAuthority, UserLookup, UserProvider,
    };
    use tower::ServiceExt;

    struct Scripted;

    #[async_trait]
    impl IdentityProvider for Scripted {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Github
        }

        fn name(&self) -> &str {
            "main"
        }

        fn login_url(&self, state: &str, redirect_url: &str) -> Result<String, Report<ProviderError>> {
            Ok(format!(
                "https://idp.test/authorize?state={state}&redirect_uri={redirect_url}"
            ))
        }

        async fn exchange(
            &self,
            code: &str,
            _: &str,
            _: &str,
        ) -> Result<ExternalIdentity, Report<ProviderError>> {
            if code == "ok" {
                Ok(ExternalIdentity {
                    provider_type: ProviderType::Github,
                    external_id: "583231".to_string(),
                    email: Some("octocat@github.test".to_string()),
                    name: "The Octocat".to_string(),
                })
            } else {
                Err(ProviderError::Exchange {
                    provider: "github/main".to_string(),
                    reason: "bad code".to_string(),
                }
                .into())
            }
        }
    }

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
        tokens: Arc<TokenAuthority>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let tokens = Arc::new(
            TokenAuthority::new(
                "https://auth.test",
                SigningKeys::Symmetric {
                    secret: b"an-hs256-secret-of-32-bytes-long".to_vec(),
                },
                Duration::from_secs(3600),
            )
            .expect("authority"),
        );

        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(Scripted));
        let settings = LoginSettings {
            app_url: "https://auth.test".to_string(),
            default_return: "/welcome.html".to_string(),
            returns: ReturnPolicy::new(["https://good.test"]),
        };
        let flow = LoginFlow::new(providers, settings, store.clone(), tokens.clone());
        let cookies = CookieSettings {
            token_cookie: "thor_token".to_string(),
            session_cookie: "thor_session".to_string(),
            secure: flow.secure_cookies(),
        };

        let state = AppState::new(flow, tokens.clone(), store.clone(), cookies, Key::generate());
        Harness {
            app: router(state, Duration::from_secs(5)),
            store,
            tokens,
        }
    }

    async fn get(app: &Router, uri: &str, cookie: Option<&str>) -> Response {
        let mut request = Request::get(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        app.clone()
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    fn set_cookies(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    fn cookie_pair<'a>(set_cookies: &'a [String], name: &str) -> Option<&'a str> {
        set_cookies
            .iter()
            .find(|cookie| cookie.starts_with(&format!("{name}=")))
            .and_then(|cookie| cookie.split(';').next())
    }

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .expect("location header")
            .to_string()
    }

    fn query_param(url: &str, key: &str) -> String {
        reqwest::Url::parse(url)
            .expect("absolute url")
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .expect("query parameter")
    }

    /// Runs the login leg and returns the session cookie and state.
    async fn start_login(app: &Router, uri: &str) -> (String, String) {
        let response = get(app, uri, None).await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let state = query_param(&location(&response), "state");
        let set = set_cookies(response.headers());
        let session = cookie_pair(&set, "thor_session")
            .expect("session cookie")
            .to_string();
        (session, state)
    }

    #[tokio::test]
    async fn full_login_sets_token_cookie_and_redirects() {
        let harness = harness();
        let (session, state) = start_login(
            &harness.app,
            "/oauth/login/github/main?return=https://good.test/home",
        )
        .await;

        let response = get(
            &harness.app,
            &format!("/oauth/callback/github/main?state={state}&code=ok"),
            Some(&session),
        )
        .await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "https://good.test/home");

        let set = set_cookies(response.headers());
        let token_cookie = set
            .iter()
            .find(|cookie| cookie.starts_with("thor_token="))
            .expect("token cookie");
        assert!(token_cookie.contains("HttpOnly"));
        assert!(token_cookie.contains("SameSite=Lax"));
        assert!(token_cookie.contains("Secure"));
        assert!(token_cookie.contains("Path=/"));

        let token = cookie_pair(&set, "thor_token")
            .and_then(|pair| pair.strip_prefix("thor_token="))
            .expect("token value");
        let claims = harness.tokens.verify(token).expect("token verifies");
        let user = harness
            .store
            .get_user(&UserLookup::Id(claims.sub))
            .await
            .expect("lookup")
            .expect("user created");
        assert_eq!(user.name(), "The Octocat");
        assert!(claims.permissions.is_empty());
    }

    #[tokio::test]
    async fn login_without_return_lands_on_default_page() {
        let harness = harness();
        let (session, state) = start_login(&harness.app, "/oauth/login/github/main").await;

        let response = get(
            &harness.app,
            &format!("/oauth/callback/github/main?state={state}&code=ok"),
            Some(&session),
        )
        .await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/welcome.html");
    }

    #[tokio::test]
    async fn state_mismatch_is_rejected_without_a_token() {
        let harness = harness();
        let (session, _) = start_login(&harness.app, "/oauth/login/github/main").await;

        let response = get(
            &harness.app,
            "/oauth/callback/github/main?state=forged&code=ok",
            Some(&session),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let set = set_cookies(response.headers());
        assert!(cookie_pair(&set, "thor_token").is_none());
        assert_eq!(harness.store.user_count().await, 0);
    }

    #[tokio::test]
    async fn callback_without_session_is_rejected() {
        let harness = harness();
        let response = get(
            &harness.app,
            "/oauth/callback/github/main?state=abc&code=ok",
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(cookie_pair(&set_cookies(response.headers()), "thor_token").is_none());
    }

    #[tokio::test]
    async fn missing_code_is_a_bad_request() {
        let harness = harness();
        let (session, state) = start_login(&harness.app, "/oauth/login/github/main").await;

        let response = get(
            &harness.app,
            &format!("/oauth/callback/github/main?state={state}"),
            Some(&session),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_cookie_is_consumed_by_the_callback() {
        let harness = harness();
        let (session, state) = start_login(&harness.app, "/oauth/login/github/main").await;

        let response = get(
            &harness.app,
            &format!("/oauth/callback/github/main?state={state}&code=ok"),
            Some(&session),
        )
        .await;

        let set = set_cookies(response.headers());
        let removal = set
            .iter()
            .find(|cookie| cookie.starts_with("thor_session="))
            .expect("session removal");
        assert!(removal.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn provider_failure_is_a_bad_gateway() {
        let harness = harness();
        let (session, state) = start_login(&harness.app, "/oauth/login/github/main").await;

        let response = get(
            &harness.app,
            &format!("/oauth/callback/github/main?state={state}&code=rejected"),
            Some(&session),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(cookie_pair(&set_cookies(response.headers()), "thor_token").is_none());
    }

    #[tokio::test]
    async fn foreign_return_url_is_rejected() {
        let harness = harness();
        let response = get(
            &harness.app,
            "/oauth/login/github/main?return=http://evil.test",
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[tokio::test]
    async fn unknown_provider_is_a_bad_request() {
        let harness = harness();
        let response = get(&harness.app, "/oauth/login/gitlab/main", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn permissions_of_roles_end_up_in_the_token() {
        let harness = harness();
        let (session, state) = start_login(&harness.app, "/oauth/login/github/main").await;

        // First login creates the user; grant a role and log in again.
        get(
            &harness.app,
            &format!("/oauth/callback/github/main?state={state}&code=ok"),
            Some(&session),
        )
        .await;
        let user = harness
            .store
            .get_user_by_provider(&UserProvider::new(ProviderType::Github, "583231".to_string()))
            .await
            .expect("lookup")
            .expect("user");
        let gold = RoleDefinition::new("gold".to_string(), vec![Permission::new("tier", "gold")])
            .expect("valid role");
        harness.store.create_role(&gold).await.expect("create role");
        harness
            .store
            .assign_role(user.id(), gold.role().id())
            .await
            .expect("assign");

        let (session, state) = start_login(&harness.app, "/oauth/login/github/main").await;
        let response = get(
            &harness.app,
            &format!("/oauth/callback/github/main?state={state}&code=ok"),
            Some(&session),
        )
        .await;

        let set = set_cookies(response.headers());
        let token = cookie_pair(&set, "thor_token")
            .and_then(|pair| pair.strip_prefix("thor_token="))
            .expect("token value");
        let claims = harness.tokens.verify(token).expect("token verifies");
        assert_eq!(claims.sub, user.id());
        assert!(claims.permissions.contains("tier", "gold"));
        assert_eq!(harness.store.user_count().await, 1);
    }

    #[tokio::test]
    async fn logout_clears_token_cookie() {
        let harness = harness();
        let response = get(&harness.app, "/oauth/logout", Some("thor_token=abc")).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/welcome.html");
        let set = set_cookies(response.headers());
        let removal = set
            .iter()
            .find(|cookie| cookie.starts_with("thor_token="))
            .expect("token removal");
        assert!(removal.contains("Max-Age=0"));
    }
}
