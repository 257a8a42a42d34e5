//! HTTP handlers and the authentication/authorization core of the blog.
//!
//! Every mutating handler follows the same order: authenticate the session
//! cookie, load the target, check ownership, then mutate. A missing resource
//! is always reported before a denied one.

pub mod auth;
pub mod comments;
pub mod credentials;
pub mod error;
pub mod extract;
pub mod policy;
pub mod posts;
pub mod routes;
pub mod token;
pub mod uploads;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;
use uuid::Uuid;

use notinhas_db::Database;
use notinhas_types::api::AuthorRef;

use crate::error::{ApiError, Resource};
use crate::token::TokenIssuer;
use crate::uploads::UploadStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub tokens: TokenIssuer,
    pub uploads: UploadStore,
    /// Mark the session cookie `Secure` (HTTPS deployments).
    pub cookie_secure: bool,
}

/// Run blocking work (SQLite, Argon2) off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Storage(e.into())
        })?
}

/// Path ids that do not parse cannot name an existing resource.
pub(crate) fn parse_id(raw: &str, resource: Resource) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound(resource))
}

pub(crate) fn author_ref(id: Uuid, usernames: &HashMap<Uuid, String>) -> AuthorRef {
    AuthorRef {
        id,
        username: usernames
            .get(&id)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string()),
    }
}
