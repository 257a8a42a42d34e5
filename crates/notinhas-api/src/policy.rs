//! Ownership rules. Pure functions: callers load the resources and must
//! have already established that they exist.

use uuid::Uuid;

use notinhas_types::models::{Comment, Post};

/// Only the author may edit or delete a post.
pub fn can_mutate_post(actor: Uuid, post: &Post) -> bool {
    actor == post.author_id
}

/// A comment may be removed by whoever wrote it or by the author of the
/// post it sits under.
pub fn can_delete_comment(actor: Uuid, comment: &Comment, post: &Post) -> bool {
    actor == comment.author_id || actor == post.author_id
}
