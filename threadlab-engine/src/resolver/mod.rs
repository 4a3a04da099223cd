//! Thread resolver
//!
//! Assigns every turn of a working set to at most one thread by combining
//! explicit annotations with the reply forest:
//!
//! 1. Pick the winning annotation per turn ([`winner`]); its thread is the
//!    turn's explicit label.
//! 2. Index `turn_id -> reply_to_turn` for the working set and any read-only
//!    context turns.
//! 3. Walk each turn up its reply chain until a labelled turn, a root, a
//!    missing parent or a turn already on the walk (cycle). Every turn on the
//!    walk takes the outcome of the walk's end.
//! 4. Memoize outcomes so a shared ancestor is walked once per pass.
//!
//! The walk is iterative with explicit path tracking, so malformed input
//! (cycles, self-replies, duplicate ids) can neither overflow the stack nor
//! loop. Output is sorted and independent of input order.

pub mod diagnostics;
pub mod winner;

pub use diagnostics::{Diagnostic, DiagnosticKind};

use diagnostics::canonical_cycle;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use threadlab_common::{MembershipOrigin, ResolvedMembership, ThreadAnnotation, Turn};

/// Output of one resolution pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// One membership per distinct working-set turn id, in ingestion order
    pub memberships: Vec<ResolvedMembership>,
    /// Sorted data-quality findings
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    pub fn membership(&self, turn_id: &str) -> Option<&ResolvedMembership> {
        self.memberships.iter().find(|m| m.turn_id == turn_id)
    }

    pub fn thread_of(&self, turn_id: &str) -> Option<&str> {
        self.membership(turn_id).and_then(|m| m.thread_id.as_deref())
    }

    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind() == kind)
    }

    pub fn unresolved_count(&self) -> usize {
        self.memberships
            .iter()
            .filter(|m| m.origin == MembershipOrigin::Unresolved)
            .count()
    }

    /// `(turn_id, missing_parent)` pairs waiting for a parent to arrive
    pub fn pending_parents(&self) -> Vec<(&str, &str)> {
        self.diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::DanglingParent {
                    turn_id,
                    missing_parent,
                } => Some((turn_id.as_str(), missing_parent.as_str())),
                _ => None,
            })
            .collect()
    }
}

/// Resolve a working set with no extra context
pub fn resolve(turns: &[Turn], annotations: &[ThreadAnnotation]) -> Resolution {
    resolve_with_context(turns, &[], annotations)
}

/// Resolve `turns`, using `context` turns as read-only ancestors
///
/// Context turns take part in walks (their labels and parents count) but get
/// no membership of their own. A working-set record shadows a context record
/// with the same turn id.
pub fn resolve_with_context(
    turns: &[Turn],
    context: &[Turn],
    annotations: &[ThreadAnnotation],
) -> Resolution {
    let mut diagnostics = Vec::new();

    let (working, duplicates) = latest_by_turn_id(turns);
    for (turn_id, occurrences) in duplicates {
        diagnostics.push(Diagnostic::DuplicateTurnId {
            turn_id: turn_id.to_string(),
            occurrences,
        });
    }
    let (context, _) = latest_by_turn_id(context);

    let mut parents: HashMap<&str, Option<&str>> =
        HashMap::with_capacity(working.len() + context.len());
    for turn in context.values().chain(working.values()) {
        parents.insert(turn.turn_id.as_str(), turn.reply_to_turn.as_deref());
    }

    let (labels, conflicts) = winner::select_winners(
        annotations
            .iter()
            .filter(|a| parents.contains_key(a.turn_id.as_str())),
    );
    diagnostics.extend(
        conflicts
            .into_iter()
            .filter(|d| d.turn_ids().iter().all(|t| working.contains_key(t))),
    );

    let mut order: Vec<&Turn> = working.values().copied().collect();
    order.sort_by(|a, b| {
        a.ingest_seq
            .cmp(&b.ingest_seq)
            .then_with(|| a.turn_id.cmp(&b.turn_id))
    });

    let mut walker = Walker {
        parents: &parents,
        labels: &labels,
        memo: HashMap::with_capacity(parents.len()),
        diagnostics: &mut diagnostics,
    };
    for turn in &order {
        walker.walk(&turn.turn_id);
    }

    let memo = walker.memo;
    let memberships = order
        .iter()
        .map(|turn| {
            let turn_id = turn.turn_id.as_str();
            match memo.get(turn_id).copied().unwrap_or(Outcome::Unresolved) {
                Outcome::Explicit { thread, confidence } => {
                    ResolvedMembership::explicit(turn_id, thread, confidence)
                }
                Outcome::Inherited(thread) => ResolvedMembership::inherited(turn_id, thread),
                Outcome::Unresolved => ResolvedMembership::unresolved(turn_id),
            }
        })
        .collect();

    diagnostics.sort();
    diagnostics.dedup();

    Resolution {
        memberships,
        diagnostics,
    }
}

/// Keep the latest-ingested record per turn id; report ids seen more than once
fn latest_by_turn_id(turns: &[Turn]) -> (BTreeMap<&str, &Turn>, Vec<(&str, usize)>) {
    let mut latest: BTreeMap<&str, &Turn> = BTreeMap::new();
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();

    for turn in turns {
        let key = turn.turn_id.as_str();
        *seen.entry(key).or_insert(0) += 1;
        match latest.get(key) {
            Some(existing) if (existing.ingest_seq, existing.id) >= (turn.ingest_seq, turn.id) => {}
            _ => {
                latest.insert(key, turn);
            }
        }
    }

    let duplicates = seen.into_iter().filter(|(_, count)| *count > 1).collect();
    (latest, duplicates)
}

#[derive(Debug, Clone, Copy)]
enum Outcome<'a> {
    Explicit { thread: &'a str, confidence: f64 },
    Inherited(&'a str),
    Unresolved,
}

impl<'a> Outcome<'a> {
    fn thread(self) -> Option<&'a str> {
        match self {
            Outcome::Explicit { thread, .. } | Outcome::Inherited(thread) => Some(thread),
            Outcome::Unresolved => None,
        }
    }
}

struct Walker<'a, 'd> {
    parents: &'a HashMap<&'a str, Option<&'a str>>,
    labels: &'a BTreeMap<&'a str, &'a ThreadAnnotation>,
    memo: HashMap<&'a str, Outcome<'a>>,
    diagnostics: &'d mut Vec<Diagnostic>,
}

impl<'a, 'd> Walker<'a, 'd> {
    fn walk(&mut self, start: &'a str) {
        let mut path: Vec<&'a str> = Vec::new();
        let mut on_path: HashMap<&'a str, usize> = HashMap::new();
        let mut cursor = start;

        let inherited: Option<&'a str> = loop {
            if let Some(outcome) = self.memo.get(cursor) {
                break outcome.thread();
            }

            if let Some(&position) = on_path.get(cursor) {
                let members: Vec<String> = path[position..].iter().map(|t| t.to_string()).collect();
                for member in path.drain(position..) {
                    self.memo.insert(member, Outcome::Unresolved);
                }
                self.diagnostics.push(Diagnostic::CycleDetected {
                    turn_ids: canonical_cycle(members),
                });
                break None;
            }

            if let Some(label) = self.labels.get(cursor) {
                self.memo.insert(
                    cursor,
                    Outcome::Explicit {
                        thread: label.thread_id.as_str(),
                        confidence: label.confidence,
                    },
                );
                break Some(label.thread_id.as_str());
            }

            on_path.insert(cursor, path.len());
            path.push(cursor);

            match self.parents.get(cursor).copied().flatten() {
                None => break None,
                Some(parent) if self.parents.contains_key(parent) => cursor = parent,
                Some(parent) => {
                    self.diagnostics.push(Diagnostic::DanglingParent {
                        turn_id: cursor.to_string(),
                        missing_parent: parent.to_string(),
                    });
                    break None;
                }
            }
        };

        let outcome = match inherited {
            Some(thread) => Outcome::Inherited(thread),
            None => Outcome::Unresolved,
        };
        for turn_id in path {
            self.memo.insert(turn_id, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadlab_common::AnnotationSource;

    fn turn(id: &str, parent: Option<&str>, seq: u64) -> Turn {
        let turn = Turn::new("c1", id, "user", format!("text {}", id), seq);
        match parent {
            Some(p) => turn.replying_to(p),
            None => turn,
        }
    }

    fn label(turn: &str, thread: &str, created_at: u64) -> ThreadAnnotation {
        ThreadAnnotation {
            turn_id: turn.to_string(),
            thread_id: thread.to_string(),
            confidence: 0.9,
            notes: None,
            source: AnnotationSource::Manual,
            created_by: "ann".to_string(),
            created_at,
        }
    }

    #[test]
    fn test_empty_input() {
        let resolution = resolve(&[], &[]);
        assert!(resolution.memberships.is_empty());
        assert!(resolution.diagnostics.is_empty());
    }

    #[test]
    fn test_unlabelled_root_is_unresolved_without_diagnostics() {
        let resolution = resolve(&[turn("t1", None, 0)], &[]);
        assert_eq!(resolution.memberships, vec![ResolvedMembership::unresolved("t1")]);
        assert!(resolution.diagnostics.is_empty());
    }

    #[test]
    fn test_self_reply_is_a_cycle() {
        let resolution = resolve(&[turn("t1", Some("t1"), 0)], &[]);
        assert_eq!(resolution.unresolved_count(), 1);
        assert_eq!(
            resolution.diagnostics,
            vec![Diagnostic::CycleDetected {
                turn_ids: vec!["t1".to_string()]
            }]
        );
    }

    #[test]
    fn test_tail_into_cycle_is_unresolved_but_not_in_cycle() {
        // t3 -> t2 -> t1 -> t2
        let turns = vec![
            turn("t1", Some("t2"), 0),
            turn("t2", Some("t1"), 1),
            turn("t3", Some("t2"), 2),
        ];
        let resolution = resolve(&turns, &[]);
        assert_eq!(resolution.unresolved_count(), 3);
        assert_eq!(
            resolution.diagnostics,
            vec![Diagnostic::CycleDetected {
                turn_ids: vec!["t1".to_string(), "t2".to_string()]
            }]
        );
    }

    #[test]
    fn test_label_inside_loop_breaks_cycle() {
        let turns = vec![turn("a", Some("b"), 0), turn("b", Some("a"), 1)];
        let resolution = resolve(&turns, &[label("a", "X", 1)]);
        assert_eq!(resolution.thread_of("a"), Some("X"));
        assert_eq!(resolution.thread_of("b"), Some("X"));
        assert!(resolution.diagnostics.is_empty());
    }

    #[test]
    fn test_context_turn_supplies_label_without_membership() {
        let working = vec![turn("t2", Some("t1"), 1)];
        let context = vec![turn("t1", None, 0)];
        let resolution = resolve_with_context(&working, &context, &[label("t1", "A", 1)]);

        assert_eq!(resolution.memberships, vec![ResolvedMembership::inherited("t2", "A")]);
        assert!(resolution.membership("t1").is_none());
    }

    #[test]
    fn test_duplicate_turn_ids_use_latest_record() {
        let turns = vec![
            turn("t1", None, 0),
            turn("t2", Some("missing"), 1),
            turn("t2", Some("t1"), 2),
        ];
        let resolution = resolve(&turns, &[label("t1", "A", 1)]);

        assert_eq!(resolution.memberships.len(), 2);
        assert_eq!(resolution.thread_of("t2"), Some("A"));
        assert_eq!(
            resolution.diagnostics,
            vec![Diagnostic::DuplicateTurnId {
                turn_id: "t2".to_string(),
                occurrences: 2
            }]
        );
    }

    #[test]
    fn test_annotations_for_unknown_turns_are_ignored() {
        let resolution = resolve(
            &[turn("t1", None, 0)],
            &[label("zz", "A", 1), label("zz", "B", 2)],
        );
        assert_eq!(resolution.thread_of("t1"), None);
        assert!(resolution.diagnostics.is_empty());
    }

    #[test]
    fn test_dangling_parent_reported_once_for_shared_chain() {
        let turns = vec![
            turn("t2", Some("t1"), 0),
            turn("t3", Some("t2"), 1),
            turn("t4", Some("t2"), 2),
        ];
        let resolution = resolve(&turns, &[]);
        assert_eq!(resolution.unresolved_count(), 3);
        assert_eq!(resolution.pending_parents(), vec![("t2", "t1")]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut turns = vec![turn("n0", None, 0)];
        for i in 1..50_000u64 {
            turns.push(turn(&format!("n{}", i), Some(&format!("n{}", i - 1)), i));
        }
        let resolution = resolve(&turns, &[label("n0", "root", 1)]);
        assert_eq!(resolution.thread_of("n49999"), Some("root"));
        assert_eq!(resolution.unresolved_count(), 0);
    }
}
