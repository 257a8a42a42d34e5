//! Database row types. These map directly to SQLite rows and are kept
//! separate from the `notinhas-types` models so the schema can evolve
//! independently of the API.

use anyhow::{Context, anyhow};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use notinhas_types::models::{Comment, Post, User};
use uuid::Uuid;

use crate::error::Result;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn to_user(&self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id)?,
            username: self.username.clone(),
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub cover: Option<String>,
    pub comments: String,
    pub created_at: String,
    pub updated_at: String,
}

impl PostRow {
    pub fn into_post(self) -> Result<Post> {
        Ok(Post {
            id: parse_id(&self.id)?,
            author_id: parse_id(&self.author_id)?,
            title: self.title,
            summary: self.summary,
            content: self.content,
            cover: self.cover,
            comments: serde_json::from_str::<Vec<Comment>>(&self.comments)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 in UTC, so lexical order in SQLite is time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?;
    Ok(ts.with_timezone(&Utc))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Ok(raw.parse().map_err(|e| anyhow!("corrupt id '{}': {}", raw, e))?)
}
