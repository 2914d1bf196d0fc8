use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Post {
    pub post_id: i64,
    pub section_id: i64,
    pub user_sys_id: i64,
    pub post_text: String,
    pub is_anonymous: bool,
    pub flag_valid: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
