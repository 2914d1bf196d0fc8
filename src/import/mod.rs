pub mod batch;
pub mod enrollment;
pub mod prefetch;
pub mod program;
pub mod row;
pub mod schedule;
pub mod spreadsheet;
pub mod summary;
pub mod token;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rows per validation batch.
pub const BATCH_SIZE: usize = 50;

/// Batches validated concurrently inside one window.
pub const MAX_CONCURRENT_BATCHES: usize = 5;

/// Validity window of a validation token, bounding the validate-to-save gap.
pub const TOKEN_TTL_MINUTES: i64 = 30;

/// The import pipelines the backend supports. Carried inside the validation
/// token so a token minted for one pipeline cannot commit another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportType {
    Enrollment,
    Program,
    SectionSchedule,
}

impl std::fmt::Display for ImportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportType::Enrollment => write!(f, "enrollment"),
            ImportType::Program => write!(f, "program"),
            ImportType::SectionSchedule => write!(f, "section-schedule"),
        }
    }
}

/// Institution kind; decides the depth of the program tree an import builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstType {
    School,
    University,
}

impl std::str::FromStr for InstType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "school" => Ok(InstType::School),
            "university" => Ok(InstType::University),
            other => Err(format!("unknown instType '{}'", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Database(#[from] crate::database::DatabaseError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Token(#[from] token::TokenError),

    /// A reference the rows depend on disappeared between validate and save.
    /// Aborts the transaction; no partial writes.
    #[error("missing reference: {0}")]
    MissingReference(String),
}

/// Result of a committed import file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub count: usize,
    pub skipped_count: usize,
    pub skipped_reason: Option<String>,
}

impl SaveOutcome {
    pub fn new(count: usize, skipped_count: usize, reason: &str) -> Self {
        Self {
            count,
            skipped_count,
            skipped_reason: (skipped_count > 0).then(|| reason.to_string()),
        }
    }
}
