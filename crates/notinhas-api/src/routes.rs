use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::services::ServeDir;

use crate::uploads::PUBLIC_PREFIX;
use crate::{AppState, auth, comments, posts};

/// Headroom for the text fields that travel with a cover image.
const FORM_OVERHEAD: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let uploads = ServeDir::new(state.uploads.dir());
    let body_limit = state.uploads.max_bytes() + FORM_OVERHEAD;

    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/profile", get(auth::profile))
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route(
            "/posts/{post_id}",
            get(posts::get_post)
                .put(posts::update_post)
                .delete(posts::delete_post),
        )
        .route(
            "/posts/{post_id}/comments",
            get(comments::list_comments).post(comments::add_comment),
        )
        .route(
            "/posts/{post_id}/comments/{comment_id}",
            delete(comments::delete_comment),
        )
        .nest_service(&format!("/{}", PUBLIC_PREFIX), uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
