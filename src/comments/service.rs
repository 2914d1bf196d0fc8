use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use super::anonymous;
use crate::database::models::{Post, PostComment};

#[derive(Debug, Error)]
pub enum CommentError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    AlreadyDeleted(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentDto {
    pub post_id: i64,
    pub parent_comment_id: Option<i64>,
    pub comment_text: String,
    pub is_anonymous: bool,
}

/// Comment as returned to clients. The author id is withheld for anonymous
/// comments; the display name is then a section-scoped pseudonym.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub comment_id: i64,
    pub post_id: i64,
    pub parent_comment_id: Option<i64>,
    pub user_sys_id: Option<i64>,
    pub display_name: String,
    pub is_anonymous: bool,
    pub comment_text: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: CommentView,
    pub replies: Vec<CommentNode>,
}

/// Closure-table comment tree per post. Every comment has a zero-length
/// self-path; a reply copies all ancestor paths of its parent with the
/// length incremented. Deletes only flip flag_valid.
pub struct CommentService {
    pool: PgPool,
}

impl CommentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Paginated root comments with their full reply subtrees. One query per
    /// tree level actually present, then assembly in memory.
    pub async fn get_post_comments(
        &self,
        post_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CommentNode>, CommentError> {
        let post = self.fetch_active_post(post_id).await?;

        let roots: Vec<PostComment> = sqlx::query_as(
            "SELECT c.comment_id, c.post_id, c.user_sys_id, c.is_anonymous, c.comment_text, \
                    c.flag_valid, c.created_at, c.updated_at, \
                    NULL::bigint AS parent_comment_id, u.full_name AS author_name \
             FROM post_comment c \
             JOIN app_user u ON u.user_sys_id = c.user_sys_id \
             WHERE c.post_id = $1 AND c.flag_valid \
               AND NOT EXISTS (SELECT 1 FROM post_comment_path p \
                               WHERE p.descendant_id = c.comment_id \
                                 AND p.path_length = 1 AND p.flag_valid) \
             ORDER BY c.created_at, c.comment_id \
             LIMIT $2 OFFSET $3",
        )
        .bind(post_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        // Walk the tree level by level from the fetched roots
        let mut children_by_parent: HashMap<i64, Vec<PostComment>> = HashMap::new();
        let mut frontier: Vec<i64> = roots.iter().map(|c| c.comment_id).collect();
        while !frontier.is_empty() {
            let children: Vec<PostComment> = sqlx::query_as(
                "SELECT c.comment_id, c.post_id, c.user_sys_id, c.is_anonymous, c.comment_text, \
                        c.flag_valid, c.created_at, c.updated_at, \
                        p.ancestor_id AS parent_comment_id, u.full_name AS author_name \
                 FROM post_comment c \
                 JOIN post_comment_path p ON p.descendant_id = c.comment_id \
                                         AND p.path_length = 1 AND p.flag_valid \
                 JOIN app_user u ON u.user_sys_id = c.user_sys_id \
                 WHERE p.ancestor_id = ANY($1) AND c.flag_valid \
                 ORDER BY c.created_at, c.comment_id",
            )
            .bind(&frontier)
            .fetch_all(&self.pool)
            .await?;

            frontier = children.iter().map(|c| c.comment_id).collect();
            for child in children {
                let parent = child.parent_comment_id.unwrap_or_default();
                children_by_parent.entry(parent).or_default().push(child);
            }
        }

        Ok(assemble(roots, &mut children_by_parent, &post))
    }

    /// Insert a comment and its closure paths in one transaction.
    pub async fn create_post_comment(
        &self,
        user_sys_id: i64,
        dto: CreateCommentDto,
    ) -> Result<CommentView, CommentError> {
        let post = self.fetch_active_post(dto.post_id).await?;

        if let Some(parent_id) = dto.parent_comment_id {
            let parent: Option<(i64, bool)> = sqlx::query_as(
                "SELECT post_id, flag_valid FROM post_comment WHERE comment_id = $1",
            )
            .bind(parent_id)
            .fetch_optional(&self.pool)
            .await?;

            match parent {
                None => {
                    return Err(CommentError::NotFound(format!(
                        "Parent comment {} not found",
                        parent_id
                    )))
                }
                Some((_, false)) => {
                    return Err(CommentError::NotFound(format!(
                        "Parent comment {} has been deleted",
                        parent_id
                    )))
                }
                Some((parent_post, true)) if parent_post != dto.post_id => {
                    return Err(CommentError::NotFound(format!(
                        "Parent comment {} does not belong to post {}",
                        parent_id, dto.post_id
                    )))
                }
                _ => {}
            }
        }

        let mut tx = self.pool.begin().await?;

        let (comment_id, created_at, updated_at): (i64, NaiveDateTime, NaiveDateTime) =
            sqlx::query_as(
                "INSERT INTO post_comment (post_id, user_sys_id, is_anonymous, comment_text) \
                 VALUES ($1, $2, $3, $4) \
                 RETURNING comment_id, created_at, updated_at",
            )
            .bind(dto.post_id)
            .bind(user_sys_id)
            .bind(dto.is_anonymous)
            .bind(&dto.comment_text)
            .fetch_one(&mut *tx)
            .await?;

        // Self-path, then a copy of every ancestor path of the parent
        sqlx::query(
            "INSERT INTO post_comment_path (ancestor_id, descendant_id, path_length) \
             VALUES ($1, $1, 0)",
        )
        .bind(comment_id)
        .execute(&mut *tx)
        .await?;

        if let Some(parent_id) = dto.parent_comment_id {
            sqlx::query(
                "INSERT INTO post_comment_path (ancestor_id, descendant_id, path_length) \
                 SELECT ancestor_id, $1, path_length + 1 \
                 FROM post_comment_path \
                 WHERE descendant_id = $2 AND flag_valid",
            )
            .bind(comment_id)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let author_name: Option<(String,)> =
            sqlx::query_as("SELECT full_name FROM app_user WHERE user_sys_id = $1")
                .bind(user_sys_id)
                .fetch_optional(&self.pool)
                .await?;

        let comment = PostComment {
            comment_id,
            post_id: dto.post_id,
            user_sys_id,
            is_anonymous: dto.is_anonymous,
            comment_text: dto.comment_text,
            flag_valid: true,
            created_at,
            updated_at,
            parent_comment_id: dto.parent_comment_id,
            author_name: author_name.map(|(name,)| name),
        };
        Ok(view(comment, &post))
    }

    /// Owner-only edit of the comment text.
    pub async fn update_post_comment(
        &self,
        user_sys_id: i64,
        comment_id: i64,
        comment_text: String,
    ) -> Result<(), CommentError> {
        let comment = self.fetch_comment(comment_id).await?;
        if !comment.flag_valid {
            return Err(CommentError::AlreadyDeleted(format!(
                "Comment {} has been deleted",
                comment_id
            )));
        }
        if comment.user_sys_id != user_sys_id {
            return Err(CommentError::Forbidden(
                "Only the comment author can edit a comment".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE post_comment SET comment_text = $1, updated_at = NOW() WHERE comment_id = $2",
        )
        .bind(&comment_text)
        .bind(comment_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Soft-delete a comment and its whole descendant subtree in one pass.
    /// The closure table already holds every transitive ancestor-descendant
    /// pair, so no recursion is needed. Returns the number of comments
    /// removed.
    pub async fn delete_post_comment(
        &self,
        user_sys_id: i64,
        comment_id: i64,
    ) -> Result<u64, CommentError> {
        let comment = self.fetch_comment(comment_id).await?;
        if !comment.flag_valid {
            return Err(CommentError::AlreadyDeleted(format!(
                "Comment {} has already been deleted",
                comment_id
            )));
        }

        let post_author: Option<(i64,)> =
            sqlx::query_as("SELECT user_sys_id FROM post WHERE post_id = $1")
                .bind(comment.post_id)
                .fetch_optional(&self.pool)
                .await?;
        let is_post_author = post_author.map(|(id,)| id) == Some(user_sys_id);
        if comment.user_sys_id != user_sys_id && !is_post_author {
            return Err(CommentError::Forbidden(
                "Only the comment author or the post author can delete a comment".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "UPDATE post_comment SET flag_valid = FALSE, updated_at = NOW() \
             WHERE comment_id IN (SELECT descendant_id FROM post_comment_path \
                                  WHERE ancestor_id = $1 AND flag_valid)",
        )
        .bind(comment_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "UPDATE post_comment_path SET flag_valid = FALSE \
             WHERE descendant_id IN (SELECT descendant_id FROM post_comment_path \
                                     WHERE ancestor_id = $1 AND flag_valid)",
        )
        .bind(comment_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(comment_id, deleted, "soft-deleted comment subtree");
        Ok(deleted)
    }

    async fn fetch_active_post(&self, post_id: i64) -> Result<Post, CommentError> {
        sqlx::query_as::<_, Post>(
            "SELECT post_id, section_id, user_sys_id, post_text, is_anonymous, flag_valid, \
                    created_at, updated_at \
             FROM post WHERE post_id = $1 AND flag_valid",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CommentError::NotFound(format!("Post {} not found", post_id)))
    }

    async fn fetch_comment(&self, comment_id: i64) -> Result<PostComment, CommentError> {
        sqlx::query_as::<_, PostComment>(
            "SELECT comment_id, post_id, user_sys_id, is_anonymous, comment_text, flag_valid, \
                    created_at, updated_at \
             FROM post_comment WHERE comment_id = $1",
        )
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CommentError::NotFound(format!("Comment {} not found", comment_id)))
    }
}

fn assemble(
    level: Vec<PostComment>,
    children_by_parent: &mut HashMap<i64, Vec<PostComment>>,
    post: &Post,
) -> Vec<CommentNode> {
    level
        .into_iter()
        .map(|comment| {
            let children = children_by_parent
                .remove(&comment.comment_id)
                .unwrap_or_default();
            CommentNode {
                replies: assemble(children, children_by_parent, post),
                comment: view(comment, post),
            }
        })
        .collect()
}

/// Anonymous-name substitution happens here, after the rows are fetched;
/// nothing derived is ever persisted.
fn view(comment: PostComment, post: &Post) -> CommentView {
    let display_name = if comment.is_anonymous {
        anonymous::pseudonym(comment.user_sys_id, post.section_id)
    } else {
        comment
            .author_name
            .clone()
            .unwrap_or_else(|| "Unknown".to_string())
    };

    CommentView {
        comment_id: comment.comment_id,
        post_id: comment.post_id,
        parent_comment_id: comment.parent_comment_id,
        user_sys_id: (!comment.is_anonymous).then_some(comment.user_sys_id),
        display_name,
        is_anonymous: comment.is_anonymous,
        comment_text: comment.comment_text,
        created_at: comment.created_at,
        updated_at: comment.updated_at,
    }
}
