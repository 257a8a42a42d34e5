use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::{
    CookieJar, WithRejection,
    cookie::{Cookie, SameSite},
};
use serde_json::json;
use tracing::{info, warn};

use notinhas_types::api::{LoginRequest, ProfileResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;
use crate::token::{Identity, TOKEN_COOKIE};
use crate::{AppState, blocking, credentials};

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let user = blocking(&state, move |s| {
        credentials::register(&s.db, &req.username, &req.password)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            username: user.username,
        }),
    ))
}

/// Verifies credentials and hands the session token back as an HttpOnly cookie.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.clone();
    let user = blocking(&state, move |s| {
        credentials::verify(&s.db, &req.username, &req.password)
    })
    .await
    .inspect_err(|e| {
        if matches!(e, ApiError::InvalidCredentials) {
            warn!("Failed login for username {}", username);
        }
    })?;

    let token = state.tokens.issue(&user)?;
    let cookie = Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.cookie_secure);

    info!("User {} logged in", user.username);
    Ok((
        jar.add(cookie),
        Json(ProfileResponse {
            user_id: user.id,
            username: user.username,
        }),
    ))
}

/// Tokens are stateless, so logging out only drops the cookie.
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        jar.remove(Cookie::build(TOKEN_COOKIE).path("/")),
        Json(json!({ "logged_out": true })),
    )
}

pub async fn profile(identity: Identity) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        user_id: identity.user_id,
        username: identity.username,
    })
}
