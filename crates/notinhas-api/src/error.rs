use std::fmt;

use axum::{
    Json,
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use notinhas_db::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Post,
    Comment,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Post => write!(f, "post"),
            Resource::Comment => write!(f, "comment"),
        }
    }
}

/// Every failure a request can end with. None of them are retried.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("username already taken")]
    DuplicateUsername,

    /// Deliberately the same for an unknown user and a wrong password.
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("missing session token")]
    MissingToken,

    #[error("invalid session token")]
    InvalidToken,

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::DuplicateUsername | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::MissingToken | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PostNotFound => Self::NotFound(Resource::Post),
            StoreError::CommentNotFound => Self::NotFound(Resource::Comment),
            StoreError::DuplicateUsername => Self::DuplicateUsername,
            // A validly signed token naming a user the store no longer has.
            StoreError::UnknownAuthor => Self::InvalidToken,
            other => Self::Storage(other.into()),
        }
    }
}

// Extractor rejections are client mistakes: they surface as validation
// errors with the usual JSON body instead of axum's plain-text 4xx.

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Storage(e) => {
                error!("Storage failure: {:#}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
