use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::debug;
use uuid::Uuid;

use notinhas_types::models::{Comment, NewPost, Post, PostChanges, User};

use crate::Database;
use crate::error::{Result, StoreError, is_constraint_violation};
use crate::models::{PostRow, UserRow, format_timestamp, now};

const POST_COLUMNS: &str =
    "id, author_id, title, summary, content, cover, comments, created_at, updated_at";

/// Where the previous page of posts ended.
///
/// `id` names the last post seen. Without it, posts sharing `created_at`
/// with that post would be skipped; with it they are resumed in order.
#[derive(Debug, Clone, Copy)]
pub struct PostCursor {
    pub created_at: DateTime<Utc>,
    pub id: Option<Uuid>,
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, username: &str, password_hash: &str) -> Result<User> {
        let created_at = now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    username,
                    password_hash,
                    format_timestamp(created_at)
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::DuplicateUsername
                } else {
                    e.into()
                }
            })?;
            Ok::<_, StoreError>(())
        })?;

        Ok(User {
            id,
            username: username.to_string(),
            created_at,
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    /// Batch-resolve author ids to usernames for display.
    pub fn usernames_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, username FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(id_strings.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .filter_map(|(id, username)| id.parse().ok().map(|id| (id, username)))
                .collect())
        })
    }

    // -- Posts --

    pub fn create_post(&self, author_id: Uuid, new: NewPost) -> Result<Post> {
        let created_at = now();
        let post = Post {
            id: Uuid::new_v4(),
            title: new.title,
            summary: new.summary,
            content: new.content,
            cover: new.cover,
            author_id,
            created_at,
            updated_at: created_at,
            comments: Vec::new(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, title, summary, content, cover, comments, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, '[]', ?7, ?7)",
                params![
                    post.id.to_string(),
                    author_id.to_string(),
                    post.title,
                    post.summary,
                    post.content,
                    post.cover,
                    format_timestamp(created_at),
                ],
            )
            .map_err(|e| {
                // The only constraint on insert is the author foreign key.
                if is_constraint_violation(&e) {
                    StoreError::UnknownAuthor
                } else {
                    e.into()
                }
            })?;
            Ok::<_, StoreError>(())
        })?;

        debug!("Created post {} by {}", post.id, author_id);
        Ok(post)
    }

    pub fn get_post(&self, id: Uuid) -> Result<Post> {
        self.with_conn(|conn| read_post(conn, id))?
            .ok_or(StoreError::PostNotFound)
    }

    /// Newest first; ties on `created_at` go to the later insert.
    /// `before` restricts the page to posts that sort after the cursor.
    pub fn list_posts(&self, limit: u32, before: Option<PostCursor>) -> Result<Vec<Post>> {
        let before_ts = before.map(|c| format_timestamp(c.created_at));
        let before_id = before.and_then(|c| c.id).map(|id| id.to_string());
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE ?1 IS NULL
                    OR created_at < ?1
                    OR (created_at = ?1 AND rowid < (SELECT rowid FROM posts WHERE id = ?2))
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![before_ts, before_id, limit], map_post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(PostRow::into_post).collect()
        })
    }

    pub fn update_post(&self, id: Uuid, changes: PostChanges) -> Result<Post> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut post = read_post(&tx, id)?.ok_or(StoreError::PostNotFound)?;
            changes.apply(&mut post, now());

            tx.execute(
                "UPDATE posts SET title = ?2, summary = ?3, content = ?4, cover = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    post.title,
                    post.summary,
                    post.content,
                    post.cover,
                    format_timestamp(post.updated_at),
                ],
            )?;
            tx.commit()?;
            Ok(post)
        })
    }

    /// Removes the post row, and with it every embedded comment.
    pub fn delete_post(&self, id: Uuid) -> Result<()> {
        let removed = self.with_conn(|conn| {
            Ok::<_, StoreError>(conn.execute("DELETE FROM posts WHERE id = ?1", [id.to_string()])?)
        })?;

        if removed == 0 {
            return Err(StoreError::PostNotFound);
        }
        debug!("Deleted post {}", id);
        Ok(())
    }

    // -- Comments --

    pub fn add_comment(&self, post_id: Uuid, author_id: Uuid, content: &str) -> Result<Comment> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut comments = read_comments(&tx, post_id)?.ok_or(StoreError::PostNotFound)?;

            if query_user(&tx, "id", &author_id.to_string())?.is_none() {
                return Err(StoreError::UnknownAuthor);
            }

            let comment = Comment {
                id: Uuid::new_v4(),
                content: content.to_string(),
                author_id,
                created_at: now(),
            };
            comments.push(comment.clone());
            write_comments(&tx, post_id, &comments)?;
            tx.commit()?;

            debug!("Added comment {} to post {}", comment.id, post_id);
            Ok(comment)
        })
    }

    pub fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        self.with_conn(|conn| read_comments(conn, post_id))?
            .ok_or(StoreError::PostNotFound)
    }

    pub fn delete_comment(&self, post_id: Uuid, comment_id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut comments = read_comments(&tx, post_id)?.ok_or(StoreError::PostNotFound)?;

            let index = comments
                .iter()
                .position(|c| c.id == comment_id)
                .ok_or(StoreError::CommentNotFound)?;
            comments.remove(index);

            write_comments(&tx, post_id, &comments)?;
            tx.commit()?;

            debug!("Deleted comment {} from post {}", comment_id, post_id);
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, created_at FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_post_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        content: row.get(4)?,
        cover: row.get(5)?,
        comments: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn read_post(conn: &Connection, id: Uuid) -> Result<Option<Post>> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], map_post_row)
        .optional()?;

    row.map(PostRow::into_post).transpose()
}

fn read_comments(conn: &Connection, post_id: Uuid) -> Result<Option<Vec<Comment>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT comments FROM posts WHERE id = ?1",
            [post_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write_comments(conn: &Connection, post_id: Uuid, comments: &[Comment]) -> Result<()> {
    let json = serde_json::to_string(comments)?;
    let updated = conn.execute(
        "UPDATE posts SET comments = ?2 WHERE id = ?1",
        params![post_id.to_string(), json],
    )?;

    if updated == 0 {
        return Err(StoreError::PostNotFound);
    }
    Ok(())
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
