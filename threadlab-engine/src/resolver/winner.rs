//! Winning annotation selection
//!
//! A turn may carry many annotations over time. Exactly one wins:
//! latest `created_at`, then `manual` over `import`, then highest confidence.
//! Remaining ties fall to the lexicographically smallest thread id so the
//! choice never depends on input order.

use super::diagnostics::Diagnostic;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use threadlab_common::{AnnotationSource, ThreadAnnotation};

fn source_rank(source: AnnotationSource) -> u8 {
    match source {
        AnnotationSource::Import => 0,
        AnnotationSource::Manual => 1,
    }
}

/// Total order over annotations for one turn; `Greater` wins
pub fn precedence(a: &ThreadAnnotation, b: &ThreadAnnotation) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| source_rank(a.source).cmp(&source_rank(b.source)))
        .then_with(|| a.confidence.total_cmp(&b.confidence))
        .then_with(|| b.thread_id.cmp(&a.thread_id))
        .then_with(|| b.created_by.cmp(&a.created_by))
        .then_with(|| b.notes.cmp(&a.notes))
}

/// Pick the winner among annotations for the same turn
pub fn winning_annotation<'a, I>(candidates: I) -> Option<&'a ThreadAnnotation>
where
    I: IntoIterator<Item = &'a ThreadAnnotation>,
{
    candidates.into_iter().max_by(|a, b| precedence(a, b))
}

/// Winning annotation per turn plus one conflict diagnostic per turn that had
/// more than one annotation
pub fn select_winners<'a, I>(
    annotations: I,
) -> (BTreeMap<&'a str, &'a ThreadAnnotation>, Vec<Diagnostic>)
where
    I: IntoIterator<Item = &'a ThreadAnnotation>,
{
    let mut by_turn: BTreeMap<&'a str, Vec<&'a ThreadAnnotation>> = BTreeMap::new();
    for annotation in annotations {
        by_turn
            .entry(annotation.turn_id.as_str())
            .or_default()
            .push(annotation);
    }

    let mut winners = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for (turn_id, group) in by_turn {
        let Some(winner) = winning_annotation(group.iter().copied()) else {
            continue;
        };

        if group.len() > 1 {
            let discarded: BTreeSet<&str> = group
                .iter()
                .map(|a| a.thread_id.as_str())
                .filter(|thread| *thread != winner.thread_id)
                .collect();
            diagnostics.push(Diagnostic::AnnotationConflictResolved {
                turn_id: turn_id.to_string(),
                winning_thread_id: winner.thread_id.clone(),
                discarded_thread_ids: discarded.into_iter().map(str::to_string).collect(),
                annotation_count: group.len(),
            });
        }

        winners.insert(turn_id, winner);
    }

    (winners, diagnostics)
}
