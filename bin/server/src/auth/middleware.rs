//! Token verification for API routes.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use thor_platform_access::Claims;

use super::AppState;
use crate::error::ApiError;

/// Extractor for requiring a valid token in the auth cookie.
///
/// Rejects with 401 when the cookie is missing or its token does not
/// verify.
#[derive(Debug)]
pub struct RequireClaims(pub Claims);

impl<S> FromRequestParts<S> for RequireClaims
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        let cookie = jar
            .get(&app_state.cookies.token_cookie)
            .ok_or_else(|| ApiError::unauthorized("not authenticated"))?;

        let claims = app_state.tokens.verify(cookie.value())?;
        Ok(RequireClaims(claims))
    }
}
