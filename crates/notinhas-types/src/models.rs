use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A blog post together with its embedded comments.
///
/// The post is the unit of persistence: comments have no storage of their
/// own and are written back with the post on every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    /// Rich text (HTML) body as submitted by the editor.
    pub content: String,
    /// Opaque reference to the stored cover image, e.g. `uploads/<id>.png`.
    pub cover: Option<String>,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub comments: Vec<Comment>,
}

impl Post {
    pub fn comment(&self, comment_id: Uuid) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when a post is first written. Id and timestamps are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub summary: String,
    pub content: String,
    pub cover: Option<String>,
}

/// Partial update of a post. `None` leaves the stored value untouched,
/// including the cover: a post keeps its existing file unless replaced.
#[derive(Debug, Clone, Default)]
pub struct PostChanges {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub cover: Option<String>,
}

impl PostChanges {
    pub fn apply(self, post: &mut Post, now: DateTime<Utc>) {
        if let Some(title) = self.title {
            post.title = title;
        }
        if let Some(summary) = self.summary {
            post.summary = summary;
        }
        if let Some(content) = self.content {
            post.content = content;
        }
        if let Some(cover) = self.cover {
            post.cover = Some(cover);
        }
        post.updated_at = now;
    }
}
