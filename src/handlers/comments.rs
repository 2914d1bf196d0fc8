use axum::{
    extract::{Path, Query},
    http::HeaderMap,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::comments::service::{CommentService, CreateCommentDto};
use crate::database::DatabaseManager;
use crate::error::ApiError;

/// Identity for the comment endpoints comes from the x-user-id header.
/// Temporary until these routes move behind the session middleware.
fn user_from_headers(headers: &HeaderMap) -> Result<i64, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing or invalid x-user-id header"))
}

async fn service() -> Result<CommentService, ApiError> {
    let pool = DatabaseManager::pool().await?;
    Ok(CommentService::new(pool))
}

#[derive(Debug, Deserialize)]
pub struct CommentPageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/post-comment/:post_id - Comment tree of a post, paginated roots
pub async fn get(
    Path(post_id): Path<i64>,
    Query(query): Query<CommentPageQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let tree = service().await?.get_post_comments(post_id, limit, offset).await?;
    Ok(Json(json!({ "success": true, "data": tree })))
}

/// POST /api/post-comment - Create a comment or reply
pub async fn create(
    headers: HeaderMap,
    Json(dto): Json<CreateCommentDto>,
) -> Result<Json<Value>, ApiError> {
    let user_sys_id = user_from_headers(&headers)?;
    if dto.comment_text.trim().is_empty() {
        return Err(ApiError::bad_request("commentText must not be empty"));
    }

    let created = service().await?.create_post_comment(user_sys_id, dto).await?;
    Ok(Json(json!({ "success": true, "data": created })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCommentDto {
    pub comment_text: String,
}

/// PUT /api/post-comment/:comment_id - Owner-only text edit
pub async fn update(
    Path(comment_id): Path<i64>,
    headers: HeaderMap,
    Json(dto): Json<UpdateCommentDto>,
) -> Result<Json<Value>, ApiError> {
    let user_sys_id = user_from_headers(&headers)?;
    if dto.comment_text.trim().is_empty() {
        return Err(ApiError::bad_request("commentText must not be empty"));
    }

    service()
        .await?
        .update_post_comment(user_sys_id, comment_id, dto.comment_text)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// DELETE /api/post-comment/:comment_id - Cascading soft delete of a subtree
pub async fn delete(
    Path(comment_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_sys_id = user_from_headers(&headers)?;

    let deleted = service()
        .await?
        .delete_post_comment(user_sys_id, comment_id)
        .await?;
    Ok(Json(json!({ "success": true, "data": { "deletedCount": deleted } })))
}
