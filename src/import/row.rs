use serde::Serialize;

use super::spreadsheet::RawRow;

/// Verdict for one spreadsheet row, produced by the pure per-type validators.
/// Row numbers are 1-based over the data rows (the header is row 0).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRow {
    pub row: i64,
    pub data: RawRow,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub is_duplicate: bool,
}

impl ValidatedRow {
    pub fn new(row: i64, data: RawRow) -> Self {
        Self {
            row,
            data,
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            is_duplicate: false,
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn mark_duplicate(&mut self, message: impl Into<String>) {
        self.is_duplicate = true;
        self.warnings.push(message.into());
    }

    /// Valid, not an against-database duplicate: the rows save will write.
    pub fn will_save(&self) -> bool {
        self.is_valid && !self.is_duplicate
    }
}

/// Trimmed cell value under `key`, or "" when the column is absent.
pub fn field<'a>(data: &'a RawRow, key: &str) -> &'a str {
    data.get(key).and_then(|v| v.as_str()).unwrap_or("").trim()
}

/// Fetch a required cell; records an error and returns None when empty.
pub fn require_field<'a>(row: &mut ValidatedRow, data: &'a RawRow, key: &str) -> Option<&'a str> {
    let value = data.get(key).and_then(|v| v.as_str()).unwrap_or("").trim();
    if value.is_empty() {
        row.error(format!("Missing required column '{}'", key));
        None
    } else {
        Some(value)
    }
}

/// Military time as the schedule importer accepts it: HHMM, HH < 24, MM < 60.
pub fn is_military_time(value: &str) -> bool {
    if value.len() != 4 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let hours: u32 = value[..2].parse().unwrap_or(99);
    let minutes: u32 = value[2..].parse().unwrap_or(99);
    hours < 24 && minutes < 60
}

pub const DAYS_OF_WEEK: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

pub fn is_day_of_week(value: &str) -> bool {
    DAYS_OF_WEEK.contains(&value.to_lowercase().as_str())
}
