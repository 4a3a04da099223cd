//! Import mapper
//!
//! Turns tabular rows plus a [`ColumnMapping`] into canonical `Turn` records
//! and seeded `import` annotations.
//!
//! - A mapping without `content` fails the whole import before any row is read.
//! - A row with no `content` value (column missing or cell blank, and no
//!   default), or with an empty mapped `turn_id`, is skipped with a
//!   [`RowError`]; the remaining rows still import.
//! - A missing value for a mapped optional field leaves the field empty and
//!   records a [`RowWarning`].
//! - A repeated `turn_id` keeps the last occurrence and warns about the
//!   discarded earlier row.
//! - Surviving rows keep file order, which becomes ingestion order.

pub mod mapping;
pub mod report;

pub use mapping::{ColumnMapping, FieldSource, MappingEntry, TargetField};
pub use report::{ImportReport, ImportStatus};

use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use threadlab_common::time::parse_timestamp;
use threadlab_common::{AnnotationSource, ThreadAnnotation, Turn};
use uuid::Uuid;

/// Notes attached to annotations seeded from a `thread` column
pub const IMPORT_ANNOTATION_NOTE: &str = "Initial thread annotation from import";

/// One source row: ordered `column -> value` cells
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    cells: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cell
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.cells.push((column.into(), value.into()));
        self
    }

    /// Value of a column; the last cell wins if a column repeats
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .rev()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Who and where an import lands
#[derive(Debug, Clone, PartialEq)]
pub struct ImportContext {
    pub container_id: String,
    pub created_by: String,
    /// Ingestion sequence of the first surviving row
    pub first_ingest_seq: u64,
    /// Confidence of seeded annotations
    pub import_confidence: f64,
}

impl ImportContext {
    pub fn new(container_id: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            created_by: created_by.into(),
            first_ingest_seq: 0,
            import_confidence: 1.0,
        }
    }

    pub fn starting_at(mut self, first_ingest_seq: u64) -> Self {
        self.first_ingest_seq = first_ingest_seq;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.import_confidence = confidence;
        self
    }
}

/// A row that was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based row number in the source
    pub row: usize,
    pub turn_id: Option<String>,
    pub message: String,
}

/// A row that imported with a gap or a discarded duplicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowWarning {
    /// 1-based row number in the source
    pub row: usize,
    pub turn_id: Option<String>,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {}: {}", self.row, self.message)
    }
}

impl fmt::Display for RowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {}: {}", self.row, self.message)
    }
}

/// Everything an import produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub turns: Vec<Turn>,
    pub annotations: Vec<ThreadAnnotation>,
    pub row_errors: Vec<RowError>,
    pub row_warnings: Vec<RowWarning>,
    pub total_rows: usize,
}

impl ImportOutcome {
    /// Rows that were not skipped (duplicates count as processed)
    pub fn processed_rows(&self) -> usize {
        self.total_rows - self.row_errors.len()
    }

    /// Summary with message lists capped at `message_limit`
    pub fn report(&self, message_limit: usize) -> ImportReport {
        ImportReport::from_outcome(self, message_limit)
    }
}

/// What a cell lookup found, after applying the mapping default
enum Cell<'r> {
    Value(&'r str),
    Blank,
    Absent,
}

fn lookup<'r>(row: &'r RawRow, source: &'r FieldSource) -> Cell<'r> {
    let raw = row.get(&source.column);
    match raw {
        Some(value) if !value.trim().is_empty() => Cell::Value(value),
        _ => match source.default_value.as_deref() {
            Some(default) => Cell::Value(default),
            None if raw.is_some() => Cell::Blank,
            None => Cell::Absent,
        },
    }
}

struct MappedRow {
    row: usize,
    turn: Turn,
    thread: Option<String>,
}

struct RowMapper<'m> {
    mapping: &'m ColumnMapping,
    ctx: &'m ImportContext,
    warnings: Vec<RowWarning>,
}

impl<'m> RowMapper<'m> {
    fn warn(&mut self, row: usize, turn_id: &str, message: String) {
        self.warnings.push(RowWarning {
            row,
            turn_id: Some(turn_id.to_string()),
            message,
        });
    }

    fn missing_column_message(&self, target: TargetField) -> String {
        let column = self
            .mapping
            .source(target)
            .map(|s| s.column.as_str())
            .unwrap_or_default();
        format!("Missing value for {} (column '{}')", target.as_str(), column)
    }

    fn map_row(&mut self, row_no: usize, row: &RawRow) -> Result<MappedRow, RowError> {
        let mapping = self.mapping;
        let turn_id = match mapping.source(TargetField::TurnId) {
            None => row_no.to_string(),
            Some(source) => match lookup(row, source) {
                Cell::Value(value) => value.trim().to_string(),
                Cell::Blank | Cell::Absent => {
                    return Err(RowError {
                        row: row_no,
                        turn_id: None,
                        message: format!("Empty turn_id (column '{}')", source.column),
                    });
                }
            },
        };

        // Validated mappings always carry content
        let content_source = mapping.source(TargetField::Content);
        let text = match content_source.map(|s| lookup(row, s)) {
            Some(Cell::Value(value)) => value.to_string(),
            Some(Cell::Blank) | Some(Cell::Absent) | None => {
                return Err(RowError {
                    row: row_no,
                    turn_id: Some(turn_id),
                    message: self.missing_column_message(TargetField::Content),
                });
            }
        };

        let user_id = match mapping.source(TargetField::UserId).map(|s| lookup(row, s)) {
            None => String::new(),
            Some(Cell::Value(value)) => value.trim().to_string(),
            Some(Cell::Blank) | Some(Cell::Absent) => {
                let message = self.missing_column_message(TargetField::UserId);
                self.warn(row_no, &turn_id, message);
                String::new()
            }
        };

        let reply_to_turn = match mapping.source(TargetField::ReplyToTurn).map(|s| lookup(row, s)) {
            Some(Cell::Value(value)) => Some(value.trim().to_string()),
            Some(Cell::Absent) => {
                let message = self.missing_column_message(TargetField::ReplyToTurn);
                self.warn(row_no, &turn_id, message);
                None
            }
            // A blank parent is a root
            Some(Cell::Blank) | None => None,
        };

        let timestamp = match mapping.source(TargetField::Timestamp).map(|s| lookup(row, s)) {
            None => None,
            Some(Cell::Value(value)) => {
                let parsed = parse_timestamp(value);
                if parsed.is_none() {
                    self.warn(row_no, &turn_id, format!("Unparseable timestamp '{}'", value));
                }
                parsed
            }
            Some(Cell::Blank) | Some(Cell::Absent) => {
                let message = self.missing_column_message(TargetField::Timestamp);
                self.warn(row_no, &turn_id, message);
                None
            }
        };

        let thread = match mapping.source(TargetField::Thread).map(|s| lookup(row, s)) {
            Some(Cell::Value(value)) => Some(value.trim().to_string()),
            Some(Cell::Absent) => {
                let message = self.missing_column_message(TargetField::Thread);
                self.warn(row_no, &turn_id, message);
                None
            }
            Some(Cell::Blank) | None => None,
        };

        Ok(MappedRow {
            row: row_no,
            turn: Turn {
                id: Uuid::new_v4(),
                turn_id,
                container_id: self.ctx.container_id.clone(),
                user_id,
                text,
                reply_to_turn,
                timestamp,
                ingest_seq: 0,
            },
            thread,
        })
    }
}

/// Map rows to turns and seeded annotations
///
/// Seeded annotations carry `created_at = 0`; the annotation store stamps
/// them when they are appended.
pub fn import_rows(
    rows: &[RawRow],
    mapping: &ColumnMapping,
    ctx: &ImportContext,
) -> EngineResult<ImportOutcome> {
    mapping.validate()?;

    let mut mapper = RowMapper {
        mapping,
        ctx,
        warnings: Vec::new(),
    };
    let mut row_errors = Vec::new();
    let mut slots: Vec<Option<MappedRow>> = Vec::with_capacity(rows.len());
    let mut slot_by_turn: HashMap<String, usize> = HashMap::new();

    for (idx, row) in rows.iter().enumerate() {
        let row_no = idx + 1;
        match mapper.map_row(row_no, row) {
            Ok(mapped) => {
                let turn_id = mapped.turn.turn_id.clone();
                if let Some(previous) = slot_by_turn.insert(turn_id.clone(), slots.len()) {
                    if let Some(discarded) = slots[previous].take() {
                        mapper.warn(
                            discarded.row,
                            &turn_id,
                            format!(
                                "Duplicate turn_id '{}'; superseded by row {}",
                                turn_id, row_no
                            ),
                        );
                    }
                }
                slots.push(Some(mapped));
            }
            Err(err) => row_errors.push(err),
        }
    }

    let mut turns = Vec::new();
    let mut annotations = Vec::new();
    for (offset, mapped) in slots.into_iter().flatten().enumerate() {
        let mut turn = mapped.turn;
        turn.ingest_seq = ctx.first_ingest_seq + offset as u64;

        if let Some(thread_id) = mapped.thread {
            annotations.push(ThreadAnnotation {
                turn_id: turn.turn_id.clone(),
                thread_id,
                confidence: ctx.import_confidence,
                notes: Some(IMPORT_ANNOTATION_NOTE.to_string()),
                source: AnnotationSource::Import,
                created_by: ctx.created_by.clone(),
                created_at: 0,
            });
        }
        turns.push(turn);
    }

    let mut row_warnings = mapper.warnings;
    row_warnings.sort_by_key(|w| w.row);

    Ok(ImportOutcome {
        turns,
        annotations,
        row_errors,
        row_warnings,
        total_rows: rows.len(),
    })
}
