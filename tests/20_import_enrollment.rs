mod common;

use anyhow::Result;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use sqlx::PgPool;

// End-to-end enrollment import: validate a mixed file, commit it, re-commit
// it (idempotency), then tamper with it (hash binding). Requires a database;
// skipped when DATABASE_URL is not set.

struct Seed {
    inst_id: i64,
}

async fn seed(pool: &PgPool) -> Result<Seed> {
    let inst_id = common::unique_inst_id();

    let (semester_id,): (i64,) = sqlx::query_as(
        "INSERT INTO semester (inst_id, semester_name) VALUES ($1, 'Fall') RETURNING semester_id",
    )
    .bind(inst_id)
    .fetch_one(pool)
    .await?;

    for (code, section) in [("SUBA", "S1"), ("SUBB", "S2")] {
        let (subject_id,): (i64,) = sqlx::query_as(
            "INSERT INTO subject (inst_id, subject_code, subject_name) \
             VALUES ($1, $2, $2) RETURNING subject_id",
        )
        .bind(inst_id)
        .bind(code)
        .fetch_one(pool)
        .await?;

        sqlx::query(
            "INSERT INTO section (inst_id, semester_id, subject_id, section_name) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(inst_id)
        .bind(semester_id)
        .bind(subject_id)
        .bind(section)
        .execute(pool)
        .await?;
    }

    for code in ["1001", "1002"] {
        sqlx::query(
            "INSERT INTO app_user (inst_id, user_code, full_name, role) \
             VALUES ($1, $2, $2, 'student')",
        )
        .bind(inst_id)
        .bind(code)
        .execute(pool)
        .await?;
    }

    Ok(Seed { inst_id })
}

fn enrollment_form(csv: &'static str, inst_id: i64, token: Option<&str>) -> Form {
    let mut form = Form::new()
        .part(
            "file",
            Part::bytes(csv.as_bytes()).file_name("enrollments.csv"),
        )
        .text("instId", inst_id.to_string());
    if let Some(token) = token {
        form = form.text("validationToken", token.to_string());
    }
    form
}

const MIXED_CSV: &str = "Subject Code,Section Name,Student Code\n\
                         SUBA,S1,1001\n\
                         SUBA,S1,1001\n\
                         SUBB,S2,1002\n";

const TAMPERED_CSV: &str = "Subject Code,Section Name,Student Code\n\
                            SUBA,S1,1001\n\
                            SUBA,S1,1001\n\
                            SUBB,S2,1001\n";

#[tokio::test]
async fn validate_commit_recommit_and_tamper() -> Result<()> {
    let Some(pool) = common::test_pool().await? else {
        return Ok(());
    };
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let auth = common::bearer_token();
    let seed = seed(&pool).await?;

    // Validate: 3 rows, the second an exact in-file repeat of the first
    let res = client
        .post(format!("{}/api/import/enrollment/validate", server.base_url))
        .bearer_auth(&auth)
        .multipart(enrollment_form(MIXED_CSV, seed.inst_id, None))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let payload = res.json::<serde_json::Value>().await?;
    let summary = &payload["data"]["summary"];
    assert_eq!(summary["total"], 3);
    assert_eq!(summary["validCount"], 2);
    assert_eq!(summary["errorCount"], 1);
    assert_eq!(summary["duplicateCount"], 0);
    assert_eq!(summary["willSaveCount"], 2);

    let rows = payload["data"]["rows"].as_array().unwrap();
    assert_eq!(rows[1]["isValid"], false);

    let token = payload["validationToken"]
        .as_str()
        .expect("token issued for file with valid rows")
        .to_string();

    // First commit writes exactly the two distinct enrollments
    let res = client
        .post(format!("{}/api/import/enrollment/save", server.base_url))
        .bearer_auth(&auth)
        .multipart(enrollment_form(MIXED_CSV, seed.inst_id, Some(&token)))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["data"]["count"], 2);
    assert_eq!(payload["data"]["skippedCount"], 0);

    let (written,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM enrollment e \
         JOIN section s ON s.section_id = e.section_id \
         WHERE s.inst_id = $1 AND e.flag_valid",
    )
    .bind(seed.inst_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(written, 2);

    // Replaying the same token against unchanged data is an idempotent skip
    let res = client
        .post(format!("{}/api/import/enrollment/save", server.base_url))
        .bearer_auth(&auth)
        .multipart(enrollment_form(MIXED_CSV, seed.inst_id, Some(&token)))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["data"]["count"], 0);
    assert_eq!(payload["data"]["skippedCount"], 2);

    // One mutated cell must be rejected outright, with nothing written
    let res = client
        .post(format!("{}/api/import/enrollment/save", server.base_url))
        .bearer_auth(&auth)
        .multipart(enrollment_form(TAMPERED_CSV, seed.inst_id, Some(&token)))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["code"], "DATA_CHANGED");

    let (after,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM enrollment e \
         JOIN section s ON s.section_id = e.section_id \
         WHERE s.inst_id = $1 AND e.flag_valid",
    )
    .bind(seed.inst_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(after, 2);

    Ok(())
}

#[tokio::test]
async fn wrong_institution_token_is_rejected() -> Result<()> {
    let Some(pool) = common::test_pool().await? else {
        return Ok(());
    };
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let auth = common::bearer_token();
    let seed = seed(&pool).await?;

    let res = client
        .post(format!("{}/api/import/enrollment/validate", server.base_url))
        .bearer_auth(&auth)
        .multipart(enrollment_form(MIXED_CSV, seed.inst_id, None))
        .send()
        .await?;
    let payload = res.json::<serde_json::Value>().await?;
    let token = payload["validationToken"].as_str().unwrap().to_string();

    // Same file, different institution
    let res = client
        .post(format!("{}/api/import/enrollment/save", server.base_url))
        .bearer_auth(&auth)
        .multipart(enrollment_form(MIXED_CSV, seed.inst_id + 1, Some(&token)))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["code"], "TOKEN_WRONG_INSTITUTION");

    Ok(())
}

#[tokio::test]
async fn unparseable_upload_is_a_request_error() -> Result<()> {
    if common::test_pool().await?.is_none() {
        return Ok(());
    }
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let auth = common::bearer_token();

    let form = Form::new()
        .part("file", Part::bytes(&b"not a spreadsheet"[..]).file_name("data.pdf"))
        .text("instId", "1");

    let res = client
        .post(format!("{}/api/import/enrollment/validate", server.base_url))
        .bearer_auth(&auth)
        .multipart(form)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["code"], "INVALID_SPREADSHEET");

    Ok(())
}
