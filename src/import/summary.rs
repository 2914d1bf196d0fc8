use serde::Serialize;

use super::row::ValidatedRow;

/// Aggregate counts over one validated file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total: usize,
    pub valid_count: usize,
    pub error_count: usize,
    pub duplicate_count: usize,
    pub warning_count: usize,
    pub will_save_count: usize,
}

impl ValidationSummary {
    pub fn from_rows(rows: &[ValidatedRow]) -> Self {
        Self {
            total: rows.len(),
            valid_count: rows.iter().filter(|r| r.is_valid).count(),
            error_count: rows.iter().filter(|r| !r.is_valid).count(),
            duplicate_count: rows.iter().filter(|r| r.is_duplicate).count(),
            warning_count: rows.iter().filter(|r| !r.warnings.is_empty()).count(),
            will_save_count: rows.iter().filter(|r| r.will_save()).count(),
        }
    }

    /// A token is only minted when the file holds valid rows. Row errors do
    /// not block it: invalid rows are simply excluded when the file commits.
    pub fn token_issuable(&self) -> bool {
        self.valid_count > 0
    }
}

/// Outcome of a validation run as returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub summary: ValidationSummary,
    pub rows: Vec<ValidatedRow>,
    #[serde(skip)]
    pub token: Option<String>,
}
