use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;
use crate::token::{Identity, TOKEN_COOKIE};

/// Authenticated caller, read from the session cookie.
///
/// Handlers that take an `Identity` reject anonymous requests with
/// `MissingToken` and bad tokens with `InvalidToken` before any other work.
impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get(TOKEN_COOKIE).map(|c| c.value());

        let identity = state.tokens.verify(token);
        if let Err(e) = &identity {
            debug!("Unauthenticated {} {}: {}", parts.method, parts.uri.path(), e);
        }
        identity
    }
}
