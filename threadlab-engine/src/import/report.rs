//! Import summary returned to clients

use super::ImportOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Completed,
    CompletedWithErrors,
}

impl ImportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
        }
    }
}

/// Counts plus the first few row messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub status: ImportStatus,
    pub total_rows: usize,
    pub processed_rows: usize,
    pub turns_imported: usize,
    pub annotations_seeded: usize,
    pub error_count: usize,
    pub warning_count: usize,
    /// At most `message_limit` row errors
    pub errors: Vec<String>,
    /// At most `message_limit` row warnings
    pub warnings: Vec<String>,
}

impl ImportReport {
    pub(crate) fn from_outcome(outcome: &ImportOutcome, message_limit: usize) -> Self {
        let status = if outcome.row_errors.is_empty() {
            ImportStatus::Completed
        } else {
            ImportStatus::CompletedWithErrors
        };

        Self {
            status,
            total_rows: outcome.total_rows,
            processed_rows: outcome.processed_rows(),
            turns_imported: outcome.turns.len(),
            annotations_seeded: outcome.annotations.len(),
            error_count: outcome.row_errors.len(),
            warning_count: outcome.row_warnings.len(),
            errors: outcome
                .row_errors
                .iter()
                .take(message_limit)
                .map(ToString::to_string)
                .collect(),
            warnings: outcome
                .row_warnings
                .iter()
                .take(message_limit)
                .map(ToString::to_string)
                .collect(),
        }
    }
}
