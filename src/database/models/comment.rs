use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PostComment {
    pub comment_id: i64,
    pub post_id: i64,
    pub user_sys_id: i64,
    pub is_anonymous: bool,
    pub comment_text: String,
    pub flag_valid: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    /// Direct parent in the reply tree; None for root comments.
    /// Joined from the path_length = 1 closure row, not a table column.
    #[sqlx(default)]
    pub parent_comment_id: Option<i64>,
    /// Author display name joined from app_user; replaced by a pseudonym
    /// before leaving the service when the comment is anonymous.
    #[sqlx(default)]
    pub author_name: Option<String>,
}
