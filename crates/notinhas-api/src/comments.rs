use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::{info, warn};
use uuid::Uuid;

use notinhas_types::api::{AuthorRef, CommentResponse, CreateCommentRequest, DeletedResponse};
use notinhas_types::models::Comment;

use crate::error::{ApiError, Resource};
use crate::token::Identity;
use crate::{AppState, author_ref, blocking, parse_id, policy};

const MAX_COMMENT_LEN: usize = 5_000;

pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let post_id = parse_id(&post_id, Resource::Post)?;

    let (comments, usernames) = blocking(&state, move |s| {
        let comments = s.db.list_comments(post_id)?;
        let mut authors: Vec<Uuid> = comments.iter().map(|c| c.author_id).collect();
        authors.sort_unstable();
        authors.dedup();
        let usernames = s.db.usernames_for(&authors)?;
        Ok((comments, usernames))
    })
    .await?;

    let body: Vec<CommentResponse> = comments
        .iter()
        .map(|c| comment_response(post_id, c, &usernames))
        .collect();
    Ok(Json(body))
}

/// Any signed-in user may comment on any post.
pub async fn add_comment(
    State(state): State<AppState>,
    identity: Identity,
    Path(post_id): Path<String>,
    WithRejection(Json(req), _): WithRejection<Json<CreateCommentRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let post_id = parse_id(&post_id, Resource::Post)?;

    validate_content(&req.content)?;
    let content = req.content;

    let author_id = identity.user_id;
    let comment = blocking(&state, move |s| {
        Ok(s.db.add_comment(post_id, author_id, &content)?)
    })
    .await?;

    info!("Comment {} added to post {} by {}", comment.id, post_id, identity.username);
    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            id: comment.id,
            post_id,
            content: comment.content,
            author: AuthorRef {
                id: identity.user_id,
                username: identity.username,
            },
            created_at: comment.created_at,
        }),
    ))
}

/// Allowed for the comment's author and for the author of the post.
pub async fn delete_comment(
    State(state): State<AppState>,
    identity: Identity,
    Path((post_id, comment_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let post_id = parse_id(&post_id, Resource::Post)?;
    let post = blocking(&state, move |s| Ok(s.db.get_post(post_id)?)).await?;

    let comment_id = parse_id(&comment_id, Resource::Comment)?;
    let comment = post
        .comment(comment_id)
        .ok_or(ApiError::NotFound(Resource::Comment))?;

    if !policy::can_delete_comment(identity.user_id, comment, &post) {
        warn!(
            "User {} tried to delete comment {} on post {} without permission",
            identity.username, comment_id, post_id
        );
        return Err(ApiError::Forbidden);
    }

    blocking(&state, move |s| Ok(s.db.delete_comment(post_id, comment_id)?)).await?;

    info!("Comment {} on post {} deleted by {}", comment_id, post_id, identity.username);
    Ok(Json(DeletedResponse {
        id: comment_id,
        deleted: true,
    }))
}

/// Blank means nothing but whitespace. The text itself is stored as sent.
fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::validation("comment content is required"));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(ApiError::validation(format!(
            "comment must be at most {} characters",
            MAX_COMMENT_LEN
        )));
    }
    Ok(())
}

pub(crate) fn comment_response(
    post_id: Uuid,
    comment: &Comment,
    usernames: &HashMap<Uuid, String>,
) -> CommentResponse {
    CommentResponse {
        id: comment.id,
        post_id,
        content: comment.content.clone(),
        author: author_ref(comment.author_id, usernames),
        created_at: comment.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_comments_are_rejected() {
        assert!(matches!(validate_content(""), Err(ApiError::Validation(_))));
        assert!(matches!(validate_content(" \n\t "), Err(ApiError::Validation(_))));
    }

    #[test]
    fn surrounding_whitespace_is_allowed() {
        assert!(validate_content("  indented\n").is_ok());
    }

    #[test]
    fn overlong_comments_are_rejected() {
        assert!(validate_content(&"x".repeat(MAX_COMMENT_LEN)).is_ok());
        assert!(matches!(
            validate_content(&"x".repeat(MAX_COMMENT_LEN + 1)),
            Err(ApiError::Validation(_))
        ));
    }
}
