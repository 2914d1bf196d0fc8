use std::collections::HashMap;

use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use super::batch::{chunk, process_batches_parallel};
use super::prefetch::{prefetch_program, program_key, ProgramRefs};
use super::row::{field, require_field, ValidatedRow};
use super::spreadsheet::RawRow;
use super::summary::{ValidationOutcome, ValidationSummary};
use super::token;
use super::{ImportError, ImportType, InstType, SaveOutcome, BATCH_SIZE, MAX_CONCURRENT_BATCHES};

const SKIP_REASON: &str = "program combination already exists";

/// One level of the program tree an import file describes.
struct Level {
    column: &'static str,
    program_type: &'static str,
}

/// Universities stop at majors; schools carry the chain down to classes.
fn levels(inst_type: InstType) -> &'static [Level] {
    const UNIVERSITY: &[Level] = &[
        Level { column: "Faculty", program_type: "faculty" },
        Level { column: "Department", program_type: "department" },
        Level { column: "Major", program_type: "major" },
    ];
    const SCHOOL: &[Level] = &[
        Level { column: "Faculty", program_type: "faculty" },
        Level { column: "Department", program_type: "department" },
        Level { column: "Major", program_type: "major" },
        Level { column: "Study Plan", program_type: "study_plan" },
        Level { column: "Class", program_type: "class" },
    ];
    match inst_type {
        InstType::University => UNIVERSITY,
        InstType::School => SCHOOL,
    }
}

/// tree_type encodes the position in the chain alongside program_type.
fn tree_type(position: usize, depth: usize) -> &'static str {
    if position == 0 {
        "root"
    } else if position + 1 == depth {
        "leaf"
    } else {
        "twig"
    }
}

pub async fn validate(
    pool: &PgPool,
    inst_id: i64,
    inst_type: InstType,
    rows: Vec<RawRow>,
) -> Result<ValidationOutcome, ImportError> {
    let refs = prefetch_program(pool, inst_id).await?;
    let validated = validate_rows(&refs, inst_type, &rows).await;
    let summary = ValidationSummary::from_rows(&validated);

    let token = if summary.token_issuable() {
        Some(token::issue(
            ImportType::Program,
            inst_id,
            None,
            None,
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
        "validated program import"
    );

    Ok(ValidationOutcome {
        summary,
        rows: validated,
        token,
    })
}

pub async fn validate_rows(
    refs: &ProgramRefs,
    inst_type: InstType,
    rows: &[RawRow],
) -> Vec<ValidatedRow> {
    let first_occurrence = first_occurrences(inst_type, rows);
    let first_occurrence = &first_occurrence;

    let indexed: Vec<(usize, RawRow)> = rows.iter().cloned().enumerate().collect();
    let batches = chunk(indexed, BATCH_SIZE);

    let mut validated = process_batches_parallel(
        batches,
        move |batch| async move {
            batch
                .into_iter()
                .map(|(index, data)| {
                    validate_row(index, data, refs, inst_type, first_occurrence)
                })
                .collect::<Vec<_>>()
        },
        MAX_CONCURRENT_BATCHES,
    )
    .await;

    validated.sort_by_key(|r| r.row);
    validated
}

fn first_occurrences(inst_type: InstType, rows: &[RawRow]) -> HashMap<String, usize> {
    let mut first = HashMap::new();
    for (index, data) in rows.iter().enumerate() {
        first.entry(file_key(inst_type, data)).or_insert(index);
    }
    first
}

fn file_key(inst_type: InstType, data: &RawRow) -> String {
    let names: Vec<&str> = levels(inst_type)
        .iter()
        .map(|level| field(data, level.column))
        .collect();
    program_key(&names)
}

fn validate_row(
    index: usize,
    data: RawRow,
    refs: &ProgramRefs,
    inst_type: InstType,
    first_occurrence: &HashMap<String, usize>,
) -> ValidatedRow {
    let mut row = ValidatedRow::new(index as i64 + 1, data.clone());

    for level in levels(inst_type) {
        require_field(&mut row, &data, level.column);
    }
    if !row.is_valid {
        return row;
    }

    let key = file_key(inst_type, &data);
    match first_occurrence.get(&key) {
        Some(first) if *first != index => {
            row.error(format!("Duplicate of row {} in this file", first + 1));
            return row;
        }
        _ => {}
    }

    if refs.existing.contains(&key) {
        row.mark_duplicate("Program combination already exists; row will be skipped");
    }

    row
}

/// Commit a validated program file: replay the validator, then walk each
/// surviving row's chain inside one transaction, creating missing tree nodes
/// level by level and reusing existing ones.
pub async fn save(
    pool: &PgPool,
    inst_id: i64,
    inst_type: InstType,
    rows: Vec<RawRow>,
    validation_token: &str,
) -> Result<SaveOutcome, ImportError> {
    token::verify(validation_token, ImportType::Program, inst_id, &rows)?;

    let refs = prefetch_program(pool, inst_id).await?;
    let validated = validate_rows(&refs, inst_type, &rows).await;
    let mut existing = refs.existing.clone();

    let mut tx = pool.begin().await?;
    let mut count = 0usize;
    let mut skipped = 0usize;

    let chain = levels(inst_type);
    for row in &validated {
        if !row.is_valid {
            continue;
        }
        let data = &row.data;
        let key = file_key(inst_type, data);
        if existing.contains(&key) {
            skipped += 1;
            continue;
        }

        let mut parent_id: Option<i64> = None;
        for (position, level) in chain.iter().enumerate() {
            let name = field(data, level.column);
            let program_id = upsert_program(
                &mut tx,
                inst_id,
                parent_id,
                name,
                tree_type(position, chain.len()),
                level.program_type,
            )
            .await?;
            parent_id = Some(program_id);
        }

        existing.insert(key);
        count += 1;
    }

    tx.commit().await?;

    info!(inst_id, count, skipped, "committed program import");
    Ok(SaveOutcome::new(count, skipped, SKIP_REASON))
}

/// Insert a tree node, tolerating a concurrent writer: a conflicting insert
/// is a no-op, after which the existing row is re-selected. Neither insert
/// nor re-select producing an id is fatal for the whole file.
async fn upsert_program(
    tx: &mut Transaction<'_, Postgres>,
    inst_id: i64,
    parent_id: Option<i64>,
    name: &str,
    tree_type: &str,
    program_type: &str,
) -> Result<i64, ImportError> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO program (inst_id, parent_id, program_name, tree_type, program_type) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT DO NOTHING \
         RETURNING program_id",
    )
    .bind(inst_id)
    .bind(parent_id)
    .bind(name)
    .bind(tree_type)
    .bind(program_type)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some((id,)) = inserted {
        return Ok(id);
    }

    let found: Option<(i64,)> = sqlx::query_as(
        "SELECT program_id FROM program \
         WHERE inst_id = $1 \
           AND parent_id IS NOT DISTINCT FROM $2 \
           AND lower(program_name) = lower($3) \
           AND flag_valid",
    )
    .bind(inst_id)
    .bind(parent_id)
    .bind(name)
    .fetch_optional(&mut **tx)
    .await?;

    found.map(|(id,)| id).ok_or_else(|| {
        ImportError::MissingReference(format!("program '{}' could not be created", name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::HashSet;

    fn raw_university(faculty: &str, department: &str, major: &str) -> RawRow {
        let mut m = RawRow::new();
        m.insert("Faculty".into(), Value::String(faculty.into()));
        m.insert("Department".into(), Value::String(department.into()));
        m.insert("Major".into(), Value::String(major.into()));
        m
    }

    #[tokio::test]
    async fn in_file_repeat_is_error_existing_combo_is_duplicate() {
        let mut existing = HashSet::new();
        existing.insert("engineering|cs|ai".to_string());
        let refs = ProgramRefs { existing };

        let rows = vec![
            raw_university("Engineering", "CS", "AI"),
            raw_university("Engineering", "CS", "Robotics"),
            raw_university("engineering", "cs", "ROBOTICS"),
        ];
        let validated = validate_rows(&refs, InstType::University, &rows).await;

        assert!(validated[0].is_valid);
        assert!(validated[0].is_duplicate);
        assert!(validated[1].is_valid && !validated[1].is_duplicate);
        // case-insensitive in-file repeat of row 2
        assert!(!validated[2].is_valid);
        assert!(validated[2].errors[0].contains("row 2"));

        let summary = ValidationSummary::from_rows(&validated);
        assert_eq!(summary.will_save_count, 1);
        assert!(!summary.token_issuable());
    }

    #[tokio::test]
    async fn school_requires_the_full_five_level_chain() {
        let refs = ProgramRefs { existing: HashSet::new() };
        let validated =
            validate_rows(&refs, InstType::School, &[raw_university("F", "D", "M")]).await;

        assert!(!validated[0].is_valid);
        let missing: Vec<_> = validated[0]
            .errors
            .iter()
            .filter(|e| e.contains("Study Plan") || e.contains("Class"))
            .collect();
        assert_eq!(missing.len(), 2);
    }

    #[test]
    fn tree_types_follow_chain_position() {
        assert_eq!(tree_type(0, 3), "root");
        assert_eq!(tree_type(1, 3), "twig");
        assert_eq!(tree_type(2, 3), "leaf");
        assert_eq!(tree_type(3, 5), "twig");
        assert_eq!(tree_type(4, 5), "leaf");
    }
}
