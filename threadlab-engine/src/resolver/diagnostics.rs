//! Resolution diagnostics
//!
//! Data-quality findings attached to a resolution result. They are never
//! raised as errors and never logged by the resolver itself.

use serde::{Deserialize, Serialize};

/// One data-quality finding, tagged with the affected turn ids
///
/// Variant order is the sort order of a resolution's diagnostic list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Reply links form a loop; every listed turn is unresolved.
    /// Listed in parent-link order starting from the smallest turn id.
    CycleDetected { turn_ids: Vec<String> },

    /// `turn_id` replies to a turn that is not available; the turn and its
    /// descendants stay unresolved until the parent arrives.
    DanglingParent {
        turn_id: String,
        missing_parent: String,
    },

    /// Several annotations competed for one turn and a winner was chosen
    AnnotationConflictResolved {
        turn_id: String,
        winning_thread_id: String,
        /// Distinct losing thread ids, sorted; empty when all annotations agreed
        discarded_thread_ids: Vec<String>,
        annotation_count: usize,
    },

    /// The working set held several records with the same turn id; the
    /// latest-ingested one was used.
    DuplicateTurnId { turn_id: String, occurrences: usize },
}

/// Discriminant of a [`Diagnostic`], handy for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    CycleDetected,
    DanglingParent,
    AnnotationConflictResolved,
    DuplicateTurnId,
}

impl Diagnostic {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Self::CycleDetected { .. } => DiagnosticKind::CycleDetected,
            Self::DanglingParent { .. } => DiagnosticKind::DanglingParent,
            Self::AnnotationConflictResolved { .. } => DiagnosticKind::AnnotationConflictResolved,
            Self::DuplicateTurnId { .. } => DiagnosticKind::DuplicateTurnId,
        }
    }

    /// Turn ids this diagnostic is about
    pub fn turn_ids(&self) -> Vec<&str> {
        match self {
            Self::CycleDetected { turn_ids } => turn_ids.iter().map(String::as_str).collect(),
            Self::DanglingParent { turn_id, .. }
            | Self::AnnotationConflictResolved { turn_id, .. }
            | Self::DuplicateTurnId { turn_id, .. } => vec![turn_id.as_str()],
        }
    }

    pub fn concerns(&self, turn_id: &str) -> bool {
        self.turn_ids().contains(&turn_id)
    }
}

/// Rotate a cycle so it starts at its smallest turn id, keeping link order
pub(crate) fn canonical_cycle(mut members: Vec<String>) -> Vec<String> {
    if let Some(start) = members
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(idx, _)| idx)
    {
        members.rotate_left(start);
    }
    members
}
