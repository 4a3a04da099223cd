//! Column mapping configuration
//!
//! A client declares `{target field -> source column}`. `content` is the only
//! required target; every other target is optional. Each entry may carry a
//! default used when a row lacks a value for the column.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical field a source column can feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetField {
    Content,
    TurnId,
    UserId,
    ReplyToTurn,
    Timestamp,
    Thread,
}

impl TargetField {
    pub const ALL: [TargetField; 6] = [
        TargetField::Content,
        TargetField::TurnId,
        TargetField::UserId,
        TargetField::ReplyToTurn,
        TargetField::Timestamp,
        TargetField::Thread,
    ];

    /// Parse a client-declared target name; `turn_text` is accepted for `content`
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "content" | "turn_text" => Some(Self::Content),
            "turn_id" => Some(Self::TurnId),
            "user_id" => Some(Self::UserId),
            "reply_to_turn" => Some(Self::ReplyToTurn),
            "timestamp" => Some(Self::Timestamp),
            "thread" => Some(Self::Thread),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::TurnId => "turn_id",
            Self::UserId => "user_id",
            Self::ReplyToTurn => "reply_to_turn",
            Self::Timestamp => "timestamp",
            Self::Thread => "thread",
        }
    }

    pub fn is_required(self) -> bool {
        matches!(self, Self::Content)
    }
}

/// Where a target field's value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSource {
    pub column: String,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl FieldSource {
    pub fn column(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            default_value: None,
        }
    }
}

/// One entry of a declared mapping: a bare column name or a full source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingEntry {
    Column(String),
    Source(FieldSource),
}

impl From<MappingEntry> for FieldSource {
    fn from(entry: MappingEntry) -> Self {
        match entry {
            MappingEntry::Column(column) => FieldSource::column(column),
            MappingEntry::Source(source) => source,
        }
    }
}

/// Validated-on-use mapping from target fields to source columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    fields: BTreeMap<TargetField, FieldSource>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a target to a column
    pub fn map(mut self, target: TargetField, column: impl Into<String>) -> Self {
        self.fields.insert(target, FieldSource::column(column));
        self
    }

    /// Map a target to a column with a fallback value
    pub fn map_with_default(
        mut self,
        target: TargetField,
        column: impl Into<String>,
        default_value: impl Into<String>,
    ) -> Self {
        self.fields.insert(
            target,
            FieldSource {
                column: column.into(),
                default_value: Some(default_value.into()),
            },
        );
        self
    }

    /// Build from client-declared `(target name, column)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self::from_entries(
            pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_string(), MappingEntry::Column(v.into()))),
        )
    }

    /// Build from declared entries, rejecting unknown or repeated targets
    pub fn from_entries<I>(entries: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (String, MappingEntry)>,
    {
        let mut fields = BTreeMap::new();
        for (name, entry) in entries {
            let target = TargetField::parse(&name).ok_or_else(|| {
                EngineError::Configuration(format!("Unknown target field in mapping: '{}'", name))
            })?;
            if fields.insert(target, FieldSource::from(entry)).is_some() {
                return Err(EngineError::Configuration(format!(
                    "Target field '{}' mapped more than once",
                    target.as_str()
                )));
            }
        }
        Ok(Self { fields })
    }

    pub fn source(&self, target: TargetField) -> Option<&FieldSource> {
        self.fields.get(&target)
    }

    pub fn is_mapped(&self, target: TargetField) -> bool {
        self.fields.contains_key(&target)
    }

    /// Fail fast on problems that would make every row unusable
    pub fn validate(&self) -> EngineResult<()> {
        let missing: Vec<&str> = TargetField::ALL
            .iter()
            .filter(|t| t.is_required() && !self.fields.contains_key(*t))
            .map(|t| t.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::Configuration(format!(
                "Required fields not mapped: {}",
                missing.join(", ")
            )));
        }

        for (target, source) in &self.fields {
            if source.column.trim().is_empty() {
                return Err(EngineError::Configuration(format!(
                    "Target field '{}' mapped to an empty column name",
                    target.as_str()
                )));
            }
        }
        Ok(())
    }
}
