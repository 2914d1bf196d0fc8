use axum::extract::Multipart;
use axum::response::Json;
use serde_json::{json, Value};

use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::import::spreadsheet::{self, RawRow};
use crate::import::{enrollment, program, schedule, InstType};

/// Fields extracted from an import upload. `file` is parsed in memory and
/// the raw bytes are dropped with the request.
struct ImportUpload {
    rows: Vec<RawRow>,
    inst_id: i64,
    section_id: Option<i64>,
    semester_id: Option<i64>,
    inst_type: Option<InstType>,
    validation_token: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<ImportUpload, ApiError> {
    let mut rows: Option<Vec<RawRow>> = None;
    let mut inst_id: Option<i64> = None;
    let mut section_id: Option<i64> = None;
    let mut semester_id: Option<i64> = None;
    let mut inst_type: Option<InstType> = None;
    let mut validation_token: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read file: {}", e)))?;
                rows = Some(
                    spreadsheet::parse(&filename, &bytes)
                        .map_err(|e| ApiError::InvalidSpreadsheet(e.to_string()))?,
                );
            }
            "instId" => inst_id = Some(parse_id(field.text().await, "instId")?),
            "sectionId" => section_id = Some(parse_id(field.text().await, "sectionId")?),
            "semesterId" => semester_id = Some(parse_id(field.text().await, "semesterId")?),
            "instType" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("invalid instType: {}", e)))?;
                inst_type = Some(text.parse().map_err(ApiError::BadRequest)?);
            }
            "validationToken" => {
                validation_token = Some(field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("invalid validationToken: {}", e))
                })?);
            }
            _ => {}
        }
    }

    Ok(ImportUpload {
        rows: rows.ok_or_else(|| ApiError::bad_request("missing 'file' field"))?,
        inst_id: inst_id.ok_or_else(|| ApiError::bad_request("missing 'instId' field"))?,
        section_id,
        semester_id,
        inst_type,
        validation_token,
    })
}

fn parse_id(text: Result<String, axum::extract::multipart::MultipartError>, name: &str) -> Result<i64, ApiError> {
    text.map_err(|e| ApiError::bad_request(format!("invalid {}: {}", name, e)))?
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("{} must be a numeric id", name)))
}

fn validate_response(outcome: crate::import::summary::ValidationOutcome) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "summary": outcome.summary,
            "rows": outcome.rows,
        },
        "validationToken": outcome.token,
    }))
}

fn save_response(outcome: crate::import::SaveOutcome, what: &str) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": format!(
            "Saved {} {} ({} skipped)",
            outcome.count, what, outcome.skipped_count
        ),
        "data": outcome,
    }))
}

/// POST /api/import/enrollment/validate
pub async fn enrollment_validate(multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let upload = read_upload(multipart).await?;
    let pool = DatabaseManager::pool().await?;

    let outcome =
        enrollment::validate(&pool, upload.inst_id, upload.section_id, upload.rows).await?;
    Ok(validate_response(outcome))
}

/// POST /api/import/enrollment/save
pub async fn enrollment_save(multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let upload = read_upload(multipart).await?;
    let token = upload
        .validation_token
        .ok_or_else(|| ApiError::bad_request("missing 'validationToken' field"))?;
    let pool = DatabaseManager::pool().await?;

    let outcome = enrollment::save(
        &pool,
        upload.inst_id,
        upload.section_id,
        upload.rows,
        &token,
    )
    .await?;
    Ok(save_response(outcome, "enrollments"))
}

/// POST /api/import/program/validate
pub async fn program_validate(multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let upload = read_upload(multipart).await?;
    let inst_type = upload
        .inst_type
        .ok_or_else(|| ApiError::bad_request("missing 'instType' field"))?;
    let pool = DatabaseManager::pool().await?;

    let outcome = program::validate(&pool, upload.inst_id, inst_type, upload.rows).await?;
    Ok(validate_response(outcome))
}

/// POST /api/import/program/save
pub async fn program_save(multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let upload = read_upload(multipart).await?;
    let inst_type = upload
        .inst_type
        .ok_or_else(|| ApiError::bad_request("missing 'instType' field"))?;
    let token = upload
        .validation_token
        .ok_or_else(|| ApiError::bad_request("missing 'validationToken' field"))?;
    let pool = DatabaseManager::pool().await?;

    let outcome = program::save(&pool, upload.inst_id, inst_type, upload.rows, &token).await?;
    Ok(save_response(outcome, "program rows"))
}

/// POST /api/import/section-schedule/validate
pub async fn schedule_validate(multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let upload = read_upload(multipart).await?;
    let semester_id = upload
        .semester_id
        .ok_or_else(|| ApiError::bad_request("missing 'semesterId' field"))?;
    let pool = DatabaseManager::pool().await?;

    let outcome = schedule::validate(&pool, upload.inst_id, semester_id, upload.rows).await?;
    Ok(validate_response(outcome))
}

/// POST /api/import/section-schedule/save
pub async fn schedule_save(multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let upload = read_upload(multipart).await?;
    let semester_id = upload
        .semester_id
        .ok_or_else(|| ApiError::bad_request("missing 'semesterId' field"))?;
    let token = upload
        .validation_token
        .ok_or_else(|| ApiError::bad_request("missing 'validationToken' field"))?;
    let pool = DatabaseManager::pool().await?;

    let outcome =
        schedule::save(&pool, upload.inst_id, semester_id, upload.rows, &token).await?;
    Ok(save_response(outcome, "schedule rows"))
}
