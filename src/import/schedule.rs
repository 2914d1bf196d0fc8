use std::collections::HashMap;

use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use super::batch::{chunk, process_batches_parallel};
use super::prefetch::{prefetch_schedule, schedule_key, section_key, ScheduleRefs};
use super::row::{field, is_day_of_week, is_military_time, require_field, ValidatedRow};
use super::spreadsheet::RawRow;
use super::summary::{ValidationOutcome, ValidationSummary};
use super::token;
use super::{ImportError, ImportType, SaveOutcome, BATCH_SIZE, MAX_CONCURRENT_BATCHES};

const COL_SUBJECT: &str = "Subject Code";
const COL_SECTION: &str = "Section Name";
const COL_TEACHER: &str = "Teacher Code";
const COL_DAY: &str = "Day";
const COL_START: &str = "Start Time";
const COL_END: &str = "End Time";
const COL_BUILDING: &str = "Building";
const COL_ROOM: &str = "Room";

const SKIP_REASON: &str = "schedule slot already exists for the section";

pub async fn validate(
    pool: &PgPool,
    inst_id: i64,
    semester_id: i64,
    rows: Vec<RawRow>,
) -> Result<ValidationOutcome, ImportError> {
    let refs = prefetch_schedule(pool, inst_id, semester_id).await?;
    let validated = validate_rows(&refs, &rows).await;
    let summary = ValidationSummary::from_rows(&validated);

    let token = if summary.token_issuable() {
        Some(token::issue(
            ImportType::SectionSchedule,
            inst_id,
            Some(semester_id),
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
        semester_id,
        total = summary.total,
        errors = summary.error_count,
        "validated section-schedule import"
    );

    Ok(ValidationOutcome {
        summary,
        rows: validated,
        token,
    })
}

pub async fn validate_rows(refs: &ScheduleRefs, rows: &[RawRow]) -> Vec<ValidatedRow> {
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

fn first_occurrences(rows: &[RawRow]) -> HashMap<String, usize> {
    let mut first = HashMap::new();
    for (index, data) in rows.iter().enumerate() {
        first.entry(file_key(data)).or_insert(index);
    }
    first
}

/// In-file slot identity: section natural key + day + start time.
fn file_key(data: &RawRow) -> String {
    format!(
        "{}|{}|{}",
        section_key(field(data, COL_SUBJECT), field(data, COL_SECTION)),
        field(data, COL_DAY).to_lowercase(),
        field(data, COL_START)
    )
}

fn validate_row(
    index: usize,
    data: RawRow,
    refs: &ScheduleRefs,
    first_occurrence: &HashMap<String, usize>,
) -> ValidatedRow {
    let mut row = ValidatedRow::new(index as i64 + 1, data.clone());

    let subject = require_field(&mut row, &data, COL_SUBJECT);
    let section = require_field(&mut row, &data, COL_SECTION);
    let teacher = require_field(&mut row, &data, COL_TEACHER);
    let day = require_field(&mut row, &data, COL_DAY);
    let start = require_field(&mut row, &data, COL_START);
    let end = require_field(&mut row, &data, COL_END);
    let building = require_field(&mut row, &data, COL_BUILDING);
    let room = require_field(&mut row, &data, COL_ROOM);

    if let Some(day) = day {
        if !is_day_of_week(day) {
            row.error(format!("'{}' is not a day of the week", day));
        }
    }
    for (label, value) in [(COL_START, start), (COL_END, end)] {
        if let Some(value) = value {
            if !is_military_time(value) {
                row.error(format!("{} '{}' is not military time (HHMM)", label, value));
            }
        }
    }
    if let (Some(start), Some(end)) = (start, end) {
        if is_military_time(start) && is_military_time(end) && start >= end {
            row.error(format!("Start time '{}' is not before end time '{}'", start, end));
        }
    }

    let section_id = match (subject, section) {
        (Some(subject), Some(section)) => {
            if !refs.subjects.contains_key(&subject.to_lowercase()) {
                row.error(format!("Subject code '{}' not found", subject));
                None
            } else {
                let id = refs.sections.get(&section_key(subject, section)).copied();
                if id.is_none() {
                    row.error(format!(
                        "Section '{}' for subject '{}' not found in this semester",
                        section, subject
                    ));
                }
                id
            }
        }
        _ => None,
    };

    if let Some(teacher) = teacher {
        if !refs.teachers.contains_key(&teacher.to_lowercase()) {
            row.error(format!("Teacher code '{}' not found", teacher));
        }
    }

    // Buildings and rooms are created on demand at save time
    if let Some(building) = building {
        let building_lower = building.to_lowercase();
        if !refs.buildings.contains_key(&building_lower) {
            row.warning(format!("Building '{}' does not exist and will be created", building));
        } else if let Some(room) = room {
            let room_key = format!("{}|{}", building_lower, room.to_lowercase());
            if !refs.rooms.contains_key(&room_key) {
                row.warning(format!(
                    "Room '{}' in building '{}' does not exist and will be created",
                    room, building
                ));
            }
        }
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

    if let (Some(section_id), Some(day), Some(start)) = (section_id, day, start) {
        if refs.existing.contains(&schedule_key(section_id, day, start)) {
            row.mark_duplicate(format!(
                "Section '{}' already has a schedule slot on {} at {}; row will be skipped",
                field(&data, COL_SECTION),
                day,
                start
            ));
        }
    }

    row
}

/// Commit a validated section-schedule file. Rows are replayed sequentially
/// inside one transaction so a building created for an earlier row is
/// observed by later rows through the in-memory maps.
pub async fn save(
    pool: &PgPool,
    inst_id: i64,
    semester_id: i64,
    rows: Vec<RawRow>,
    validation_token: &str,
) -> Result<SaveOutcome, ImportError> {
    token::verify(validation_token, ImportType::SectionSchedule, inst_id, &rows)?;

    let refs = prefetch_schedule(pool, inst_id, semester_id).await?;
    let validated = validate_rows(&refs, &rows).await;
    let mut existing = refs.existing.clone();
    let mut buildings = refs.buildings.clone();
    let mut rooms = refs.rooms.clone();

    let mut tx = pool.begin().await?;
    let mut count = 0usize;
    let mut skipped = 0usize;

    for row in &validated {
        if !row.is_valid {
            continue;
        }
        let data = &row.data;
        let subject = field(data, COL_SUBJECT);
        let section = field(data, COL_SECTION);
        let teacher = field(data, COL_TEACHER);
        let day = field(data, COL_DAY).to_lowercase();
        let start = field(data, COL_START);
        let end = field(data, COL_END);
        let building = field(data, COL_BUILDING);
        let room = field(data, COL_ROOM);

        let section_id = refs
            .sections
            .get(&section_key(subject, section))
            .copied()
            .ok_or_else(|| {
                ImportError::MissingReference(format!("section '{}|{}'", subject, section))
            })?;
        let teacher_id = refs
            .teachers
            .get(&teacher.to_lowercase())
            .copied()
            .ok_or_else(|| ImportError::MissingReference(format!("teacher '{}'", teacher)))?;

        let key = schedule_key(section_id, &day, start);
        if existing.contains(&key) {
            skipped += 1;
            continue;
        }

        let building_lower = building.to_lowercase();
        let building_id = match buildings.get(&building_lower) {
            Some(id) => *id,
            None => {
                let id = upsert_building(&mut tx, inst_id, building).await?;
                buildings.insert(building_lower.clone(), id);
                id
            }
        };

        let room_key = format!("{}|{}", building_lower, room.to_lowercase());
        let room_id = match rooms.get(&room_key) {
            Some(id) => *id,
            None => {
                let id = upsert_room(&mut tx, building_id, room).await?;
                rooms.insert(room_key, id);
                id
            }
        };

        let inserted = sqlx::query(
            "INSERT INTO section_schedule \
             (section_id, teacher_sys_id, day_of_week, start_time, end_time, room_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT DO NOTHING",
        )
        .bind(section_id)
        .bind(teacher_id)
        .bind(&day)
        .bind(start)
        .bind(end)
        .bind(room_id)
        .execute(&mut *tx)
        .await?;

        existing.insert(key);
        if inserted.rows_affected() == 1 {
            count += 1;
        } else {
            skipped += 1;
        }
    }

    tx.commit().await?;

    info!(inst_id, semester_id, count, skipped, "committed section-schedule import");
    Ok(SaveOutcome::new(count, skipped, SKIP_REASON))
}

async fn upsert_building(
    tx: &mut Transaction<'_, Postgres>,
    inst_id: i64,
    name: &str,
) -> Result<i64, ImportError> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO building (inst_id, building_name) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING \
         RETURNING building_id",
    )
    .bind(inst_id)
    .bind(name)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some((id,)) = inserted {
        return Ok(id);
    }

    let found: Option<(i64,)> = sqlx::query_as(
        "SELECT building_id FROM building \
         WHERE inst_id = $1 AND lower(building_name) = lower($2) AND flag_valid",
    )
    .bind(inst_id)
    .bind(name)
    .fetch_optional(&mut **tx)
    .await?;

    found.map(|(id,)| id).ok_or_else(|| {
        ImportError::MissingReference(format!("building '{}' could not be created", name))
    })
}

async fn upsert_room(
    tx: &mut Transaction<'_, Postgres>,
    building_id: i64,
    name: &str,
) -> Result<i64, ImportError> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO room (building_id, room_name) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING \
         RETURNING room_id",
    )
    .bind(building_id)
    .bind(name)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some((id,)) = inserted {
        return Ok(id);
    }

    let found: Option<(i64,)> = sqlx::query_as(
        "SELECT room_id FROM room \
         WHERE building_id = $1 AND lower(room_name) = lower($2) AND flag_valid",
    )
    .bind(building_id)
    .bind(name)
    .fetch_optional(&mut **tx)
    .await?;

    found.map(|(id,)| id).ok_or_else(|| {
        ImportError::MissingReference(format!("room '{}' could not be created", name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::{HashMap, HashSet};

    fn refs() -> ScheduleRefs {
        let mut subjects = HashMap::new();
        subjects.insert("math101".to_string(), 1);

        let mut sections = HashMap::new();
        sections.insert("math101|a1".to_string(), 10);

        let mut teachers = HashMap::new();
        teachers.insert("t01".to_string(), 500);

        let mut buildings = HashMap::new();
        buildings.insert("main hall".to_string(), 7);

        let mut rooms = HashMap::new();
        rooms.insert("main hall|101".to_string(), 70);

        ScheduleRefs {
            subjects,
            sections,
            teachers,
            buildings,
            rooms,
            existing: HashSet::new(),
        }
    }

    fn raw(day: &str, start: &str, end: &str, building: &str, room: &str) -> RawRow {
        let mut m = RawRow::new();
        m.insert(COL_SUBJECT.into(), Value::String("MATH101".into()));
        m.insert(COL_SECTION.into(), Value::String("A1".into()));
        m.insert(COL_TEACHER.into(), Value::String("T01".into()));
        m.insert(COL_DAY.into(), Value::String(day.into()));
        m.insert(COL_START.into(), Value::String(start.into()));
        m.insert(COL_END.into(), Value::String(end.into()));
        m.insert(COL_BUILDING.into(), Value::String(building.into()));
        m.insert(COL_ROOM.into(), Value::String(room.into()));
        m
    }

    #[tokio::test]
    async fn valid_row_in_known_building_has_no_warnings() {
        let validated =
            validate_rows(&refs(), &[raw("Monday", "0900", "1030", "Main Hall", "101")]).await;
        assert!(validated[0].is_valid);
        assert!(validated[0].warnings.is_empty());
    }

    #[tokio::test]
    async fn unknown_building_and_room_are_warnings_not_errors() {
        let rows = vec![
            raw("Monday", "0900", "1030", "Annex", "12"),
            raw("Tuesday", "0900", "1030", "Main Hall", "202"),
        ];
        let validated = validate_rows(&refs(), &rows).await;

        assert!(validated[0].is_valid);
        assert!(validated[0].warnings[0].contains("Building 'Annex'"));
        assert!(validated[1].is_valid);
        assert!(validated[1].warnings[0].contains("Room '202'"));

        let summary = ValidationSummary::from_rows(&validated);
        assert_eq!(summary.will_save_count, 2);
    }

    #[tokio::test]
    async fn bad_day_and_times_are_errors() {
        let rows = vec![
            raw("Moonday", "0900", "1030", "Main Hall", "101"),
            raw("Monday", "9am", "1030", "Main Hall", "101"),
            raw("Monday", "1100", "0900", "Main Hall", "101"),
        ];
        let validated = validate_rows(&refs(), &rows).await;

        assert!(!validated[0].is_valid);
        assert!(!validated[1].is_valid);
        assert!(!validated[2].is_valid);
        assert!(validated[2].errors[0].contains("not before"));
    }

    #[tokio::test]
    async fn same_slot_twice_in_file_is_an_error_once() {
        let rows = vec![
            raw("Monday", "0900", "1030", "Main Hall", "101"),
            raw("Monday", "0900", "1030", "Main Hall", "101"),
        ];
        let validated = validate_rows(&refs(), &rows).await;
        assert!(validated[0].is_valid);
        assert!(!validated[1].is_valid);
    }

    #[tokio::test]
    async fn committed_slot_is_a_skippable_duplicate() {
        let mut refs = refs();
        refs.existing.insert(schedule_key(10, "monday", "0900"));

        let validated =
            validate_rows(&refs, &[raw("Monday", "0900", "1030", "Main Hall", "101")]).await;
        assert!(validated[0].is_valid);
        assert!(validated[0].is_duplicate);
    }
}
