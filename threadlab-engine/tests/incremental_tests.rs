//! Incremental recomputation across pages and annotation edits

use threadlab_common::{
    AnnotationSource, MembershipOrigin, ResolvedMembership, ThreadAnnotation, Turn,
};
use threadlab_engine::{IncrementalCoordinator, MembershipCache};

const CONTAINER: &str = "conv-9";

fn turn(id: &str, parent: Option<&str>, seq: u64) -> Turn {
    let turn = Turn::new(CONTAINER, id, "speaker", "", seq);
    match parent {
        Some(p) => turn.replying_to(p),
        None => turn,
    }
}

fn manual(turn_id: &str, thread: &str, created_at: u64) -> ThreadAnnotation {
    ThreadAnnotation {
        turn_id: turn_id.to_string(),
        thread_id: thread.to_string(),
        confidence: 1.0,
        notes: None,
        source: AnnotationSource::Manual,
        created_by: "annotator".to_string(),
        created_at,
    }
}

#[test]
fn test_parent_on_later_page_pulls_waiting_replies_in() {
    let annotations = vec![manual("t1", "A", 1)];
    let mut coordinator = IncrementalCoordinator::new();
    let mut cache = MembershipCache::new();

    // Page 2 arrives first: replies whose parent is not loaded yet
    coordinator.ingest_turns(vec![turn("t3", Some("t2"), 2), turn("t4", Some("t3"), 3)]);
    let first = coordinator.recompute(CONTAINER, &[], &annotations, &mut cache);
    assert_eq!(first.unresolved_count(), 2);
    assert_eq!(first.pending_parents(), vec![("t3", "t2")]);

    // Page 1 supplies the missing ancestors
    coordinator.ingest_turns(vec![turn("t1", None, 0), turn("t2", Some("t1"), 1)]);
    let plan = coordinator.plan(CONTAINER, &[]);
    assert_eq!(plan.turn_ids(), vec!["t1", "t2", "t3", "t4"]);

    let second = coordinator.apply(&plan, &annotations, &mut cache);
    assert!(second.pending_parents().is_empty());

    let t4 = cache.get(CONTAINER, "t4").unwrap();
    assert_eq!(t4.thread_id.as_deref(), Some("A"));
    assert_eq!(t4.origin, MembershipOrigin::Inherited);
    assert!(coordinator.touched(CONTAINER).is_empty());
}

#[test]
fn test_untouched_component_keeps_cached_membership() {
    let mut coordinator = IncrementalCoordinator::new();
    let mut cache = MembershipCache::new();
    coordinator.ingest_turns(vec![
        turn("r1", None, 0),
        turn("c1", Some("r1"), 1),
        turn("r2", None, 2),
        turn("c2", Some("r2"), 3),
    ]);

    let mut annotations = vec![manual("r1", "A", 1)];
    let first = coordinator.recompute(CONTAINER, &[], &annotations, &mut cache);
    assert_eq!(first.memberships.len(), 4);

    // Caller-injected prior state for r2's tree; it only survives if that
    // tree is left out of the next pass
    cache.insert(CONTAINER, ResolvedMembership::explicit("r2", "PRIOR", 0.5));
    cache.insert(CONTAINER, ResolvedMembership::inherited("c2", "PRIOR"));

    annotations.push(manual("c1", "B", 2));
    coordinator.touch_annotations(CONTAINER, &annotations[1..]);

    let plan = coordinator.plan(CONTAINER, &[]);
    assert_eq!(plan.turn_ids(), vec!["r1", "c1"]);
    coordinator.apply(&plan, &annotations, &mut cache);

    assert_eq!(cache.get(CONTAINER, "c1").unwrap().thread_id.as_deref(), Some("B"));
    assert_eq!(cache.get(CONTAINER, "c2").unwrap().thread_id.as_deref(), Some("PRIOR"));
    assert_eq!(cache.get(CONTAINER, "r2").unwrap().confidence, Some(0.5));
}

#[test]
fn test_explicit_extra_ids_join_the_touched_set() {
    let mut coordinator = IncrementalCoordinator::new();
    let mut cache = MembershipCache::new();
    coordinator.ingest_turns(vec![turn("r1", None, 0), turn("r2", None, 1)]);
    coordinator.recompute(CONTAINER, &[], &[], &mut cache);

    let plan = coordinator.plan(CONTAINER, &["r2".to_string()]);
    assert_eq!(plan.turn_ids(), vec!["r2"]);
}

#[test]
fn test_full_plan_drops_stale_cache_entries() {
    let mut coordinator = IncrementalCoordinator::new();
    coordinator.ingest_turns(vec![turn("t1", None, 0)]);

    let mut cache = MembershipCache::new();
    cache.insert(CONTAINER, ResolvedMembership::explicit("ghost", "G", 1.0));

    let plan = coordinator.plan_full(CONTAINER);
    coordinator.apply(&plan, &[manual("t1", "A", 1)], &mut cache);

    assert!(cache.get(CONTAINER, "ghost").is_none());
    assert_eq!(cache.len(CONTAINER), 1);
    assert_eq!(
        coordinator.view(CONTAINER, &cache),
        vec![ResolvedMembership::explicit("t1", "A", 1.0)]
    );
}

#[test]
fn test_moving_a_turn_to_another_parent_rescopes_both_trees() {
    let mut coordinator = IncrementalCoordinator::new();
    let mut cache = MembershipCache::new();
    let annotations = vec![manual("r1", "A", 1), manual("r2", "B", 2)];
    coordinator.ingest_turns(vec![
        turn("r1", None, 0),
        turn("r2", None, 1),
        turn("x", Some("r1"), 2),
        turn("y", Some("x"), 3),
    ]);
    coordinator.recompute(CONTAINER, &[], &annotations, &mut cache);
    assert_eq!(cache.get(CONTAINER, "y").unwrap().thread_id.as_deref(), Some("A"));

    // A corrected record re-parents x under r2
    coordinator.ingest_turns(vec![turn("x", Some("r2"), 2)]);
    coordinator.recompute(CONTAINER, &[], &annotations, &mut cache);

    assert_eq!(cache.get(CONTAINER, "x").unwrap().thread_id.as_deref(), Some("B"));
    assert_eq!(cache.get(CONTAINER, "y").unwrap().thread_id.as_deref(), Some("B"));
    assert_eq!(cache.get(CONTAINER, "r1").unwrap().thread_id.as_deref(), Some("A"));
}
