use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::spreadsheet::RawRow;
use super::{ImportType, TOKEN_TTL_MINUTES};
use crate::config;

/// Claims of a validation token: binds the validation outcome to a content
/// hash of the uploaded rows, the institution and the import type. Stateless;
/// nothing is stored server-side and nothing marks a token as spent. Replay
/// within the expiry against unchanged data re-runs an idempotent save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportValidationClaims {
    pub inst_id: i64,
    pub semester_id: Option<i64>,
    pub section_id: Option<i64>,
    pub data_hash: String,
    pub valid_count: usize,
    pub duplicate_count: usize,
    pub import_type: ImportType,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("validation token has expired; validate the file again")]
    Expired,

    #[error("validation token is malformed")]
    Malformed,

    #[error("validation token was issued for a different import type")]
    WrongType,

    #[error("validation token was issued for a different institution")]
    WrongInstitution,

    #[error("uploaded data has changed since validation; validate the file again")]
    DataChanged,

    #[error("token signing secret is not configured")]
    MissingSecret,
}

/// SHA-256 hex over the canonical JSON serialization of the parsed rows.
/// serde_json maps serialize with sorted keys, so the hash is stable for a
/// given cell content regardless of column order.
pub fn data_hash(rows: &[RawRow]) -> String {
    let serialized = serde_json::to_string(rows).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Mint a signed token for a successful validation run.
pub fn issue(
    import_type: ImportType,
    inst_id: i64,
    semester_id: Option<i64>,
    section_id: Option<i64>,
    valid_count: usize,
    duplicate_count: usize,
    rows: &[RawRow],
) -> Result<String, TokenError> {
    issue_with_ttl(
        import_type,
        inst_id,
        semester_id,
        section_id,
        valid_count,
        duplicate_count,
        rows,
        Duration::minutes(TOKEN_TTL_MINUTES),
    )
}

/// Same as `issue` with an explicit TTL; negative TTLs mint already-expired
/// tokens, which the expiry tests rely on.
pub fn issue_with_ttl(
    import_type: ImportType,
    inst_id: i64,
    semester_id: Option<i64>,
    section_id: Option<i64>,
    valid_count: usize,
    duplicate_count: usize,
    rows: &[RawRow],
    ttl: Duration,
) -> Result<String, TokenError> {
    let secret = signing_secret()?;
    let now = Utc::now();

    let claims = ImportValidationClaims {
        inst_id,
        semester_id,
        section_id,
        data_hash: data_hash(rows),
        valid_count,
        duplicate_count,
        import_type,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| TokenError::Malformed)
}

/// Decode and check a token against a freshly re-uploaded file. Signature and
/// expiry first, then the three semantic checks in order: import type,
/// institution, data hash.
pub fn verify(
    token: &str,
    expected_type: ImportType,
    inst_id: i64,
    rows: &[RawRow],
) -> Result<ImportValidationClaims, TokenError> {
    let secret = signing_secret()?;

    let mut validation = Validation::default();
    validation.leeway = 0;

    let claims = decode::<ImportValidationClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    })?;

    if claims.import_type != expected_type {
        return Err(TokenError::WrongType);
    }
    if claims.inst_id != inst_id {
        return Err(TokenError::WrongInstitution);
    }
    if claims.data_hash != data_hash(rows) {
        return Err(TokenError::DataChanged);
    }

    Ok(claims)
}

fn signing_secret() -> Result<&'static str, TokenError> {
    let secret = &config::config().security.jwt_secret;
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn ensure_secret() {
        if std::env::var("JWT_SECRET").is_err() {
            std::env::set_var("JWT_SECRET", "test-secret");
        }
    }

    fn sample_rows() -> Vec<RawRow> {
        let mut row = RawRow::new();
        row.insert("Subject Code".into(), Value::String("MATH101".into()));
        row.insert("Student Code".into(), Value::String("1001".into()));
        vec![row]
    }

    #[test]
    fn round_trip_verifies() {
        ensure_secret();
        let rows = sample_rows();
        let token =
            issue(ImportType::Enrollment, 7, None, Some(42), 1, 0, &rows).unwrap();

        let claims = verify(&token, ImportType::Enrollment, 7, &rows).unwrap();
        assert_eq!(claims.valid_count, 1);
        assert_eq!(claims.section_id, Some(42));
        assert_eq!(claims.data_hash, data_hash(&rows));
    }

    #[test]
    fn mutated_cell_is_rejected_as_data_changed() {
        ensure_secret();
        let rows = sample_rows();
        let token = issue(ImportType::Enrollment, 7, None, None, 1, 0, &rows).unwrap();

        let mut tampered = rows.clone();
        tampered[0].insert("Student Code".into(), Value::String("1002".into()));

        assert_eq!(
            verify(&token, ImportType::Enrollment, 7, &tampered),
            Err(TokenError::DataChanged)
        );
    }

    #[test]
    fn wrong_type_and_institution_are_distinct_rejections() {
        ensure_secret();
        let rows = sample_rows();
        let token = issue(ImportType::Program, 7, None, None, 1, 0, &rows).unwrap();

        assert_eq!(
            verify(&token, ImportType::Enrollment, 7, &rows),
            Err(TokenError::WrongType)
        );
        assert_eq!(
            verify(&token, ImportType::Program, 8, &rows),
            Err(TokenError::WrongInstitution)
        );
    }

    #[test]
    fn expired_token_is_rejected_before_semantic_checks() {
        ensure_secret();
        let rows = sample_rows();
        let token = issue_with_ttl(
            ImportType::Enrollment,
            7,
            None,
            None,
            1,
            0,
            &rows,
            Duration::minutes(-1),
        )
        .unwrap();

        // Even with the wrong institution, expiry wins
        assert_eq!(
            verify(&token, ImportType::Enrollment, 99, &rows),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn garbage_token_is_malformed() {
        ensure_secret();
        assert_eq!(
            verify("not.a.token", ImportType::Enrollment, 7, &sample_rows()),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn hash_ignores_column_insertion_order() {
        let mut a = RawRow::new();
        a.insert("x".into(), Value::String("1".into()));
        a.insert("y".into(), Value::String("2".into()));

        let mut b = RawRow::new();
        b.insert("y".into(), Value::String("2".into()));
        b.insert("x".into(), Value::String("1".into()));

        assert_eq!(data_hash(&[a]), data_hash(&[b]));
    }
}
