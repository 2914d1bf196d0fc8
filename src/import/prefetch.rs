use std::collections::{HashMap, HashSet};

use sqlx::PgPool;

/// Reference lookups for one import run. Keys are lower-cased natural keys;
/// every query is institution-scoped. Built fresh per request and discarded
/// with it, so lookups reflect committed state as of the call.

/// Composite key for a section: subject code + section name.
pub fn section_key(subject_code: &str, section_name: &str) -> String {
    format!(
        "{}|{}",
        subject_code.trim().to_lowercase(),
        section_name.trim().to_lowercase()
    )
}

/// Composite key for an enrollment relation.
pub fn enrollment_key(section_id: i64, student_id: i64) -> String {
    format!("{}|{}", section_id, student_id)
}

/// Composite key for a schedule slot within a section.
pub fn schedule_key(section_id: i64, day_of_week: &str, start_time: &str) -> String {
    format!(
        "{}|{}|{}",
        section_id,
        day_of_week.trim().to_lowercase(),
        start_time.trim()
    )
}

/// Composite key for a program chain (faculty|department|major...).
pub fn program_key(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

pub struct EnrollmentRefs {
    /// subject code -> subject_id
    pub subjects: HashMap<String, i64>,
    /// section_key -> section_id
    pub sections: HashMap<String, i64>,
    /// student code -> user_sys_id
    pub students: HashMap<String, i64>,
    /// enrollment_key of every committed enrollment
    pub existing: HashSet<String>,
}

pub async fn prefetch_enrollment(pool: &PgPool, inst_id: i64) -> Result<EnrollmentRefs, sqlx::Error> {
    let (subjects, sections, students, existing) = tokio::try_join!(
        fetch_subjects(pool, inst_id),
        fetch_sections(pool, inst_id, None),
        fetch_users(pool, inst_id, "student"),
        fetch_enrollments(pool, inst_id),
    )?;

    Ok(EnrollmentRefs {
        subjects,
        sections,
        students,
        existing,
    })
}

pub struct ProgramRefs {
    /// program_key of every committed chain prefix, leaf-most first walk
    pub existing: HashSet<String>,
}

pub async fn prefetch_program(pool: &PgPool, inst_id: i64) -> Result<ProgramRefs, sqlx::Error> {
    let rows: Vec<(i64, Option<i64>, String)> = sqlx::query_as(
        "SELECT program_id, parent_id, lower(program_name) \
         FROM program WHERE inst_id = $1 AND flag_valid",
    )
    .bind(inst_id)
    .fetch_all(pool)
    .await?;

    let by_id: HashMap<i64, (Option<i64>, String)> = rows
        .into_iter()
        .map(|(id, parent, name)| (id, (parent, name)))
        .collect();

    // Every node contributes its root-path name chain, so a file row's
    // combination key tests membership directly regardless of depth.
    let mut existing = HashSet::new();
    for (parent, name) in by_id.values() {
        let mut chain = vec![name.as_str()];
        let mut cursor = *parent;
        while let Some(parent_id) = cursor {
            match by_id.get(&parent_id) {
                Some((next, parent_name)) => {
                    chain.push(parent_name.as_str());
                    cursor = *next;
                }
                None => break,
            }
        }
        chain.reverse();
        existing.insert(chain.join("|"));
    }

    Ok(ProgramRefs { existing })
}

pub struct ScheduleRefs {
    pub subjects: HashMap<String, i64>,
    pub sections: HashMap<String, i64>,
    /// teacher code -> user_sys_id
    pub teachers: HashMap<String, i64>,
    /// building name -> building_id
    pub buildings: HashMap<String, i64>,
    /// "building|room" -> room_id
    pub rooms: HashMap<String, i64>,
    /// schedule_key of every committed schedule slot
    pub existing: HashSet<String>,
}

pub async fn prefetch_schedule(
    pool: &PgPool,
    inst_id: i64,
    semester_id: i64,
) -> Result<ScheduleRefs, sqlx::Error> {
    let (subjects, sections, teachers, buildings, rooms, existing) = tokio::try_join!(
        fetch_subjects(pool, inst_id),
        fetch_sections(pool, inst_id, Some(semester_id)),
        fetch_users(pool, inst_id, "teacher"),
        fetch_buildings(pool, inst_id),
        fetch_rooms(pool, inst_id),
        fetch_schedules(pool, inst_id, semester_id),
    )?;

    Ok(ScheduleRefs {
        subjects,
        sections,
        teachers,
        buildings,
        rooms,
        existing,
    })
}

async fn fetch_subjects(pool: &PgPool, inst_id: i64) -> Result<HashMap<String, i64>, sqlx::Error> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT lower(subject_code), subject_id \
         FROM subject WHERE inst_id = $1 AND flag_valid",
    )
    .bind(inst_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

async fn fetch_sections(
    pool: &PgPool,
    inst_id: i64,
    semester_id: Option<i64>,
) -> Result<HashMap<String, i64>, sqlx::Error> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT sub.subject_code, sec.section_name, sec.section_id \
         FROM section sec \
         JOIN subject sub ON sub.subject_id = sec.subject_id \
         WHERE sec.inst_id = $1 \
           AND ($2::bigint IS NULL OR sec.semester_id = $2) \
           AND sec.flag_valid AND sub.flag_valid",
    )
    .bind(inst_id)
    .bind(semester_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(code, name, id)| (section_key(&code, &name), id))
        .collect())
}

async fn fetch_users(
    pool: &PgPool,
    inst_id: i64,
    role: &str,
) -> Result<HashMap<String, i64>, sqlx::Error> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT lower(user_code), user_sys_id \
         FROM app_user WHERE inst_id = $1 AND role = $2 AND flag_valid",
    )
    .bind(inst_id)
    .bind(role)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

async fn fetch_enrollments(pool: &PgPool, inst_id: i64) -> Result<HashSet<String>, sqlx::Error> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT e.section_id, e.user_sys_id \
         FROM enrollment e \
         JOIN section s ON s.section_id = e.section_id \
         WHERE s.inst_id = $1 AND e.flag_valid",
    )
    .bind(inst_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(section_id, student_id)| enrollment_key(section_id, student_id))
        .collect())
}

async fn fetch_buildings(pool: &PgPool, inst_id: i64) -> Result<HashMap<String, i64>, sqlx::Error> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT lower(building_name), building_id \
         FROM building WHERE inst_id = $1 AND flag_valid",
    )
    .bind(inst_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

async fn fetch_rooms(pool: &PgPool, inst_id: i64) -> Result<HashMap<String, i64>, sqlx::Error> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT lower(b.building_name), lower(r.room_name), r.room_id \
         FROM room r \
         JOIN building b ON b.building_id = r.building_id \
         WHERE b.inst_id = $1 AND r.flag_valid AND b.flag_valid",
    )
    .bind(inst_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(building, room, id)| (format!("{}|{}", building, room), id))
        .collect())
}

async fn fetch_schedules(
    pool: &PgPool,
    inst_id: i64,
    semester_id: i64,
) -> Result<HashSet<String>, sqlx::Error> {
    let rows: Vec<(i64, String, String)> = sqlx::query_as(
        "SELECT ss.section_id, ss.day_of_week, ss.start_time \
         FROM section_schedule ss \
         JOIN section s ON s.section_id = ss.section_id \
         WHERE s.inst_id = $1 AND s.semester_id = $2 AND ss.flag_valid",
    )
    .bind(inst_id)
    .bind(semester_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(section_id, day, start)| schedule_key(section_id, &day, &start))
        .collect())
}
