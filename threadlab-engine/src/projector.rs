//! Result projector
//!
//! Pure transformations from resolved memberships back to presentable thread
//! groups. Safe to call repeatedly; nothing here has side effects.

use crate::resolver::winner::select_winners;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use threadlab_common::{AnnotationSource, ResolvedMembership, ThreadAnnotation, Turn};

/// Turns grouped by resolved thread
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Projection {
    /// Thread id to member turns, each group ordered by timestamp then
    /// ingestion order
    pub threads: BTreeMap<String, Vec<Turn>>,
    /// Turns with no thread, in the same order
    pub unresolved: Vec<Turn>,
}

impl Projection {
    pub fn thread(&self, thread_id: &str) -> Option<&[Turn]> {
        self.threads.get(thread_id).map(Vec::as_slice)
    }

    pub fn thread_ids(&self) -> impl Iterator<Item = &str> {
        self.threads.keys().map(String::as_str)
    }

    pub fn turn_count(&self) -> usize {
        self.threads.values().map(Vec::len).sum::<usize>() + self.unresolved.len()
    }
}

fn sort_for_display(turns: &mut [Turn]) {
    turns.sort_by(|a, b| {
        a.ordering_key()
            .cmp(&b.ordering_key())
            .then_with(|| a.turn_id.cmp(&b.turn_id))
    });
}

/// Latest-ingested record per turn id, in first-seen order
fn distinct_turns(turns: &[Turn]) -> Vec<&Turn> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut distinct: Vec<&Turn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match position.get(turn.turn_id.as_str()) {
            Some(&idx) => {
                if turn.ingest_seq >= distinct[idx].ingest_seq {
                    distinct[idx] = turn;
                }
            }
            None => {
                position.insert(turn.turn_id.as_str(), distinct.len());
                distinct.push(turn);
            }
        }
    }
    distinct
}

/// Group turns by resolved thread
///
/// Turns without a membership, or whose membership has no thread, land in
/// `unresolved`. Memberships for turns not in `turns` are ignored.
pub fn project(memberships: &[ResolvedMembership], turns: &[Turn]) -> Projection {
    let threads_by_turn: HashMap<&str, Option<&str>> = memberships
        .iter()
        .map(|m| (m.turn_id.as_str(), m.thread_id.as_deref()))
        .collect();

    let mut projection = Projection::default();
    for turn in distinct_turns(turns) {
        match threads_by_turn.get(turn.turn_id.as_str()).copied().flatten() {
            Some(thread_id) => projection
                .threads
                .entry(thread_id.to_string())
                .or_default()
                .push(turn.clone()),
            None => projection.unresolved.push(turn.clone()),
        }
    }

    for group in projection.threads.values_mut() {
        sort_for_display(group);
    }
    sort_for_display(&mut projection.unresolved);
    projection
}

/// One explicitly annotated turn in an annotation listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedTurn {
    pub turn_id: String,
    pub text: String,
    pub annotator: String,
    pub source: AnnotationSource,
    pub created_at: u64,
    pub confidence: f64,
    pub notes: Option<String>,
}

/// Winning annotations grouped by thread, for annotator review
///
/// Only turns present in `turns` are listed; entries follow display order.
pub fn annotation_listing(
    annotations: &[ThreadAnnotation],
    turns: &[Turn],
) -> BTreeMap<String, Vec<AnnotatedTurn>> {
    let (winners, _) = select_winners(annotations);

    let mut ordered: Vec<Turn> = distinct_turns(turns).into_iter().cloned().collect();
    sort_for_display(&mut ordered);

    let mut listing: BTreeMap<String, Vec<AnnotatedTurn>> = BTreeMap::new();
    for turn in ordered {
        let Some(winner) = winners.get(turn.turn_id.as_str()) else {
            continue;
        };
        listing
            .entry(winner.thread_id.clone())
            .or_default()
            .push(AnnotatedTurn {
                turn_id: turn.turn_id,
                text: turn.text,
                annotator: winner.created_by.clone(),
                source: winner.source,
                created_at: winner.created_at,
                confidence: winner.confidence,
                notes: winner.notes.clone(),
            });
    }
    listing
}
