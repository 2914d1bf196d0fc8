use std::collections::HashMap;

use sqlx::PgPool;
use tracing::info;

use super::batch::{chunk, process_batches_parallel};
use super::prefetch::{enrollment_key, prefetch_enrollment, section_key, EnrollmentRefs};
use super::row::{require_field, ValidatedRow};
use super::spreadsheet::RawRow;
use super::summary::{ValidationOutcome, ValidationSummary};
use super::token;
use super::{ImportError, ImportType, SaveOutcome, BATCH_SIZE, MAX_CONCURRENT_BATCHES};

const COL_SUBJECT: &str = "Subject Code";
const COL_SECTION: &str = "Section Name";
const COL_STUDENT: &str = "Student Code";

const SKIP_REASON: &str = "student is already enrolled in the section";

/// Validate an enrollment file and mint a token when it holds savable rows.
pub async fn validate(
    pool: &PgPool,
    inst_id: i64,
    section_id: Option<i64>,
    rows: Vec<RawRow>,
) -> Result<ValidationOutcome, ImportError> {
    let refs = prefetch_enrollment(pool, inst_id).await?;
    let validated = validate_rows(&refs, &rows).await;
    let summary = ValidationSummary::from_rows(&validated);

    let token = if summary.token_issuable() {
        Some(token::issue(
            ImportType::Enrollment,
            inst_id,
            None,
            section_id,
            summary.valid_count,
            summary.duplicate_count,
            &rows,
        )?)
    } else {
        None
    };

    info!(
        inst_id,
        total = summary.total,
        errors = summary.error_count,
        "validated enrollment import"
    );

    Ok(ValidationOutcome {
        summary,
        rows: validated,
        token,
    })
}

/// Batch-parallel validation over prefetched references; output is sorted by
/// row number regardless of batch completion order.
pub async fn validate_rows(refs: &EnrollmentRefs, rows: &[RawRow]) -> Vec<ValidatedRow> {
    let first_occurrence = first_occurrences(rows);
    let first_occurrence = &first_occurrence;

    let indexed: Vec<(usize, RawRow)> = rows.iter().cloned().enumerate().collect();
    let batches = chunk(indexed, BATCH_SIZE);

    let mut validated = process_batches_parallel(
        batches,
        move |batch| async move {
            batch
                .into_iter()
                .map(|(index, data)| validate_row(index, data, refs, first_occurrence))
                .collect::<Vec<_>>()
        },
        MAX_CONCURRENT_BATCHES,
    )
    .await;

    validated.sort_by_key(|r| r.row);
    validated
}

/// Map each in-file composite key to the index of its first occurrence. Only
/// that row may save; later repeats are ambiguous and rejected.
fn first_occurrences(rows: &[RawRow]) -> HashMap<String, usize> {
    let mut first = HashMap::new();
    for (index, data) in rows.iter().enumerate() {
        let key = file_key(data);
        first.entry(key).or_insert(index);
    }
    first
}

fn file_key(data: &RawRow) -> String {
    format!(
        "{}|{}",
        section_key(
            super::row::field(data, COL_SUBJECT),
            super::row::field(data, COL_SECTION)
        ),
        super::row::field(data, COL_STUDENT).to_lowercase()
    )
}

fn validate_row(
    index: usize,
    data: RawRow,
    refs: &EnrollmentRefs,
    first_occurrence: &HashMap<String, usize>,
) -> ValidatedRow {
    let mut row = ValidatedRow::new(index as i64 + 1, data.clone());

    let subject = require_field(&mut row, &data, COL_SUBJECT);
    let section = require_field(&mut row, &data, COL_SECTION);
    let student = require_field(&mut row, &data, COL_STUDENT);
    let (Some(subject), Some(section), Some(student)) = (subject, section, student) else {
        return row;
    };

    let subject_id = refs.subjects.get(&subject.to_lowercase()).copied();
    if subject_id.is_none() {
        row.error(format!("Subject code '{}' not found", subject));
    }

    let section_id = refs.sections.get(&section_key(subject, section)).copied();
    if subject_id.is_some() && section_id.is_none() {
        row.error(format!(
            "Section '{}' for subject '{}' not found",
            section, subject
        ));
    }

    let student_id = refs.students.get(&student.to_lowercase()).copied();
    if student_id.is_none() {
        row.error(format!("Student code '{}' not found", student));
    }

    if !row.is_valid {
        return row;
    }

    let key = file_key(&data);
    match first_occurrence.get(&key) {
        Some(first) if *first != index => {
            row.error(format!("Duplicate of row {} in this file", first + 1));
            return row;
        }
        _ => {}
    }

    let (Some(section_id), Some(student_id)) = (section_id, student_id) else {
        return row;
    };
    if refs.existing.contains(&enrollment_key(section_id, student_id)) {
        row.mark_duplicate(format!(
            "Student '{}' is already enrolled in section '{}'; row will be skipped",
            student, section
        ));
    }

    row
}

/// Commit a validated enrollment file. Re-verifies the token, re-fetches
/// references, replays the validator over the fresh references, then writes
/// the surviving rows sequentially inside one transaction. Rows that fail
/// re-validation are excluded, mirroring what the client was told at
/// validate time.
pub async fn save(
    pool: &PgPool,
    inst_id: i64,
    _section_id: Option<i64>,
    rows: Vec<RawRow>,
    validation_token: &str,
) -> Result<SaveOutcome, ImportError> {
    token::verify(validation_token, ImportType::Enrollment, inst_id, &rows)?;

    let refs = prefetch_enrollment(pool, inst_id).await?;
    let validated = validate_rows(&refs, &rows).await;
    let mut existing = refs.existing.clone();

    let mut tx = pool.begin().await?;
    let mut count = 0usize;
    let mut skipped = 0usize;

    for row in &validated {
        if !row.is_valid {
            continue;
        }
        let data = &row.data;
        let subject = super::row::field(data, COL_SUBJECT);
        let section = super::row::field(data, COL_SECTION);
        let student = super::row::field(data, COL_STUDENT);

        // A valid row resolves; a missing entry here means the maps and the
        // validator disagree, which must abort the whole file
        let section_id = refs
            .sections
            .get(&section_key(subject, section))
            .copied()
            .ok_or_else(|| {
                ImportError::MissingReference(format!("section '{}|{}'", subject, section))
            })?;
        let student_id = refs
            .students
            .get(&student.to_lowercase())
            .copied()
            .ok_or_else(|| ImportError::MissingReference(format!("student '{}'", student)))?;

        // Skip what the database already holds; the set also carries keys
        // inserted earlier in this same file
        let key = enrollment_key(section_id, student_id);
        if existing.contains(&key) {
            skipped += 1;
            continue;
        }

        let inserted = sqlx::query(
            "INSERT INTO enrollment (section_id, user_sys_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(section_id)
        .bind(student_id)
        .execute(&mut *tx)
        .await?;

        existing.insert(key);
        if inserted.rows_affected() == 1 {
            count += 1;
        } else {
            // Lost a race with a concurrent importer; same outcome as skip
            skipped += 1;
        }
    }

    tx.commit().await?;

    info!(inst_id, count, skipped, "committed enrollment import");
    Ok(SaveOutcome::new(count, skipped, SKIP_REASON))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::{HashMap, HashSet};

    fn refs() -> EnrollmentRefs {
        let mut subjects = HashMap::new();
        subjects.insert("a".to_string(), 1);
        subjects.insert("b".to_string(), 2);

        let mut sections = HashMap::new();
        sections.insert("a|s1".to_string(), 10);
        sections.insert("b|s2".to_string(), 20);

        let mut students = HashMap::new();
        students.insert("1001".to_string(), 100);
        students.insert("1002".to_string(), 200);

        EnrollmentRefs {
            subjects,
            sections,
            students,
            existing: HashSet::new(),
        }
    }

    fn raw(subject: &str, section: &str, student: &str) -> RawRow {
        let mut m = RawRow::new();
        m.insert(COL_SUBJECT.into(), Value::String(subject.into()));
        m.insert(COL_SECTION.into(), Value::String(section.into()));
        m.insert(COL_STUDENT.into(), Value::String(student.into()));
        m
    }

    #[tokio::test]
    async fn scenario_three_rows_with_in_file_repeat() {
        // [A,S1,1001] new; exact repeat (error); [B,S2,1002] new
        let rows = vec![
            raw("A", "S1", "1001"),
            raw("A", "S1", "1001"),
            raw("B", "S2", "1002"),
        ];
        let validated = validate_rows(&refs(), &rows).await;
        let summary = ValidationSummary::from_rows(&validated);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.valid_count, 2);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.duplicate_count, 0);
        assert_eq!(summary.will_save_count, 2);
        assert!(summary.token_issuable());

        assert!(validated[0].is_valid);
        assert!(!validated[1].is_valid);
        assert!(validated[1].errors[0].contains("row 1"));
        assert!(validated[2].is_valid);
    }

    #[tokio::test]
    async fn against_db_duplicate_is_warning_not_error() {
        let mut refs = refs();
        refs.existing.insert(enrollment_key(10, 100));

        let validated = validate_rows(&refs, &[raw("A", "S1", "1001")]).await;
        let summary = ValidationSummary::from_rows(&validated);

        assert!(validated[0].is_valid);
        assert!(validated[0].is_duplicate);
        assert_eq!(summary.will_save_count, 0);
        assert_eq!(summary.error_count, 0);
        // valid but nothing new to save: still issuable per the valid count
        assert!(summary.token_issuable());
    }

    #[tokio::test]
    async fn missing_references_are_row_errors() {
        let validated = validate_rows(&refs(), &[raw("ZZ", "S1", "9999")]).await;
        assert!(!validated[0].is_valid);
        assert_eq!(validated[0].errors.len(), 2); // subject and student
    }

    #[tokio::test]
    async fn lookups_are_case_insensitive() {
        let validated = validate_rows(&refs(), &[raw("a", "s1", "1001")]).await;
        assert!(validated[0].is_valid);
    }

    #[tokio::test]
    async fn output_is_sorted_by_row_across_many_batches() {
        // Enough rows to span several concurrency windows
        let rows: Vec<RawRow> = (0..260)
            .map(|i| {
                if i % 2 == 0 {
                    raw("A", "S1", "1001")
                } else {
                    raw("B", "S2", "1002")
                }
            })
            .collect();
        let validated = validate_rows(&refs(), &rows).await;
        let numbers: Vec<i64> = validated.iter().map(|r| r.row).collect();
        assert_eq!(numbers, (1..=260).collect::<Vec<i64>>());
    }
}
