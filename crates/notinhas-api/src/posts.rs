use std::collections::HashMap;

use axum::{
    Json,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use notinhas_db::queries::PostCursor;
use notinhas_types::api::{DeletedResponse, PostDetailResponse, PostResponse};
use notinhas_types::models::{NewPost, Post, PostChanges};

use crate::comments::comment_response;
use crate::error::{ApiError, Resource};
use crate::token::Identity;
use crate::uploads::CoverUpload;
use crate::{AppState, author_ref, blocking, parse_id, policy};

/// Listing never returns more than this many posts.
pub const MAX_PAGE_SIZE: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct PostQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the `created_at` of the oldest post on the previous page.
    pub before: Option<DateTime<Utc>>,
    /// Id of that post; only read together with `before`.
    pub before_id: Option<Uuid>,
}

fn default_limit() -> u32 {
    MAX_PAGE_SIZE
}

/// Multipart body shared by create and update. Unknown fields are ignored.
#[derive(Debug, Default)]
struct PostForm {
    title: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    cover: Option<CoverUpload>,
}

pub async fn list_posts(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<PostQuery>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(MAX_PAGE_SIZE);
    let before = query.before.map(|created_at| PostCursor {
        created_at,
        id: query.before_id,
    });

    let (posts, usernames) = blocking(&state, move |s| {
        let posts = s.db.list_posts(limit, before)?;
        let mut authors: Vec<Uuid> = posts.iter().map(|p| p.author_id).collect();
        authors.sort_unstable();
        authors.dedup();
        let usernames = s.db.usernames_for(&authors)?;
        Ok((posts, usernames))
    })
    .await?;

    let body: Vec<PostResponse> = posts
        .iter()
        .map(|post| post_response(post, &usernames))
        .collect();
    Ok(Json(body))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let post_id = parse_id(&post_id, Resource::Post)?;

    let (post, usernames) = blocking(&state, move |s| {
        let post = s.db.get_post(post_id)?;
        let mut authors: Vec<Uuid> = post.comments.iter().map(|c| c.author_id).collect();
        authors.push(post.author_id);
        authors.sort_unstable();
        authors.dedup();
        let usernames = s.db.usernames_for(&authors)?;
        Ok((post, usernames))
    })
    .await?;

    Ok(Json(PostDetailResponse {
        post: post_response(&post, &usernames),
        comments: post
            .comments
            .iter()
            .map(|c| comment_response(post.id, c, &usernames))
            .collect(),
    }))
}

pub async fn create_post(
    State(state): State<AppState>,
    identity: Identity,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_form(multipart).await?;

    let mut new = NewPost {
        title: required(form.title, "title")?,
        summary: required(form.summary, "summary")?,
        content: required(form.content, "content")?,
        cover: None,
    };
    if let Some(upload) = form.cover {
        new.cover = Some(state.uploads.store(upload).await?);
    }

    let cover = new.cover.clone();
    let author_id = identity.user_id;
    let post = match blocking(&state, move |s| Ok(s.db.create_post(author_id, new)?)).await {
        Ok(post) => post,
        Err(e) => {
            if let Some(cover) = cover {
                state.uploads.discard(&cover).await;
            }
            return Err(e);
        }
    };

    info!("Post {} created by {}", post.id, identity.username);
    let usernames = HashMap::from([(identity.user_id, identity.username)]);
    Ok((StatusCode::CREATED, Json(post_response(&post, &usernames))))
}

pub async fn update_post(
    State(state): State<AppState>,
    identity: Identity,
    Path(post_id): Path<String>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let post_id = parse_id(&post_id, Resource::Post)?;
    let form = read_form(multipart).await?;

    let post = blocking(&state, move |s| Ok(s.db.get_post(post_id)?)).await?;
    if !policy::can_mutate_post(identity.user_id, &post) {
        warn!("User {} tried to edit post {} without permission", identity.username, post_id);
        return Err(ApiError::Forbidden);
    }

    let mut changes = PostChanges {
        title: optional(form.title, "title")?,
        summary: optional(form.summary, "summary")?,
        content: optional(form.content, "content")?,
        cover: None,
    };
    if let Some(upload) = form.cover {
        changes.cover = Some(state.uploads.store(upload).await?);
    }

    // The post may have been deleted since it was loaded; the store reports
    // that as NotFound on its own.
    let cover = changes.cover.clone();
    let updated = match blocking(&state, move |s| Ok(s.db.update_post(post_id, changes)?)).await {
        Ok(post) => post,
        Err(e) => {
            if let Some(cover) = cover {
                state.uploads.discard(&cover).await;
            }
            return Err(e);
        }
    };

    info!("Post {} updated by {}", post_id, identity.username);
    let usernames = HashMap::from([(identity.user_id, identity.username)]);
    Ok(Json(post_response(&updated, &usernames)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    identity: Identity,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let post_id = parse_id(&post_id, Resource::Post)?;

    let post = blocking(&state, move |s| Ok(s.db.get_post(post_id)?)).await?;
    if !policy::can_mutate_post(identity.user_id, &post) {
        warn!("User {} tried to delete post {} without permission", identity.username, post_id);
        return Err(ApiError::Forbidden);
    }

    blocking(&state, move |s| Ok(s.db.delete_post(post_id)?)).await?;

    info!(
        "Post {} deleted by {} ({} comments removed)",
        post_id,
        identity.username,
        post.comments.len()
    );
    Ok(Json(DeletedResponse {
        id: post_id,
        deleted: true,
    }))
}

pub(crate) fn post_response(post: &Post, usernames: &HashMap<Uuid, String>) -> PostResponse {
    PostResponse {
        id: post.id,
        title: post.title.clone(),
        summary: post.summary.clone(),
        content: post.content.clone(),
        cover: post.cover.clone(),
        author: author_ref(post.author_id, usernames),
        comment_count: post.comments.len(),
        created_at: post.created_at,
        updated_at: post.updated_at,
    }
}

async fn read_form(mut multipart: Multipart) -> Result<PostForm, ApiError> {
    let mut form = PostForm::default();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => form.title = Some(field.text().await.map_err(malformed)?),
            "summary" => form.summary = Some(field.text().await.map_err(malformed)?),
            "content" => form.content = Some(field.text().await.map_err(malformed)?),
            "file" => {
                let original_filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(malformed)?;
                // Browsers send an empty part when no file was picked.
                if !bytes.is_empty() {
                    form.cover = Some(CoverUpload {
                        original_filename,
                        bytes,
                    });
                }
            }
            other => debug!("Ignoring form field '{}'", other),
        }
    }

    Ok(form)
}

fn malformed(e: MultipartError) -> ApiError {
    ApiError::validation(format!("malformed form data: {}", e.body_text()))
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    optional(value, field)?.ok_or_else(|| ApiError::validation(format!("{} is required", field)))
}

/// Absent is fine; present-but-blank is not.
fn optional(value: Option<String>, field: &str) -> Result<Option<String>, ApiError> {
    match value {
        Some(v) if v.trim().is_empty() => {
            Err(ApiError::validation(format!("{} must not be empty", field)))
        }
        other => Ok(other),
    }
}
