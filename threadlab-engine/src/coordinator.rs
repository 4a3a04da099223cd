//! Incremental recomputation coordinator
//!
//! Keeps, per container, the reply graph of every turn ingested so far and the
//! set of turn ids touched since the last resolution. A recomputation is
//! limited to the touched turns, their ancestors and their known
//! descendants; memberships of every other turn stay as cached.
//!
//! A turn waiting on a missing parent is registered as a child of that parent
//! id. When the parent finally arrives it is touched like any new turn, and
//! the descendant walk pulls the waiting turns back into scope.

use crate::resolver::{self, Resolution};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use threadlab_common::{ResolvedMembership, ThreadAnnotation, Turn};

/// Previously computed memberships keyed by `(container_id, turn_id)`
///
/// Passed into the coordinator rather than held globally, so callers can
/// seed it with any prior state.
#[derive(Debug, Clone, Default)]
pub struct MembershipCache {
    entries: HashMap<String, HashMap<String, ResolvedMembership>>,
}

impl MembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, container_id: &str, turn_id: &str) -> Option<&ResolvedMembership> {
        self.entries.get(container_id)?.get(turn_id)
    }

    /// Store a membership, returning the one it replaced
    pub fn insert(
        &mut self,
        container_id: &str,
        membership: ResolvedMembership,
    ) -> Option<ResolvedMembership> {
        self.entries
            .entry(container_id.to_string())
            .or_default()
            .insert(membership.turn_id.clone(), membership)
    }

    /// Number of cached memberships for a container
    pub fn len(&self, container_id: &str) -> usize {
        self.entries.get(container_id).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, container_id: &str) -> bool {
        self.len(container_id) == 0
    }

    /// Memberships of a container in turn id order
    pub fn memberships(&self, container_id: &str) -> Vec<ResolvedMembership> {
        let mut memberships: Vec<ResolvedMembership> = self
            .entries
            .get(container_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        memberships.sort_by(|a, b| a.turn_id.cmp(&b.turn_id));
        memberships
    }

    pub fn clear_container(&mut self, container_id: &str) {
        self.entries.remove(container_id);
    }
}

/// Reply graph and touched set of one container
#[derive(Debug, Clone, Default)]
pub struct ContainerGraph {
    turns: HashMap<String, Turn>,
    /// Parent turn id (known or not yet ingested) to child turn ids
    children: HashMap<String, BTreeSet<String>>,
    touched: BTreeSet<String>,
}

impl ContainerGraph {
    /// Add or replace a turn and mark it touched
    pub fn ingest(&mut self, turn: Turn) {
        let turn_id = turn.turn_id.clone();

        if let Some(previous) = self.turns.get(&turn_id) {
            if previous.reply_to_turn != turn.reply_to_turn {
                if let Some(old_parent) = &previous.reply_to_turn {
                    if let Some(siblings) = self.children.get_mut(old_parent) {
                        siblings.remove(&turn_id);
                        if siblings.is_empty() {
                            self.children.remove(old_parent);
                        }
                    }
                }
            }
        }

        if let Some(parent) = &turn.reply_to_turn {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(turn_id.clone());
        }

        self.touched.insert(turn_id.clone());
        self.turns.insert(turn_id, turn);
    }

    pub fn touch(&mut self, turn_id: impl Into<String>) {
        self.touched.insert(turn_id.into());
    }

    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    pub fn turn(&self, turn_id: &str) -> Option<&Turn> {
        self.turns.get(turn_id)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// All known turns in ingestion order
    pub fn turns(&self) -> Vec<&Turn> {
        let mut turns: Vec<&Turn> = self.turns.values().collect();
        turns.sort_by(|a, b| {
            a.ingest_seq
                .cmp(&b.ingest_seq)
                .then_with(|| a.turn_id.cmp(&b.turn_id))
        });
        turns
    }

    /// Known turns replying to a parent id that has not been ingested
    pub fn waiting_on(&self, parent_id: &str) -> Vec<&str> {
        if self.turns.contains_key(parent_id) {
            return Vec::new();
        }
        self.children
            .get(parent_id)
            .map(|c| c.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Known ancestors of a turn, nearest first; stops at a root, a missing
    /// parent or a repeated turn
    pub fn ancestors(&self, turn_id: &str) -> Vec<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut ancestors = Vec::new();
        let mut cursor = self.turns.get(turn_id).and_then(|t| t.reply_to_turn.as_deref());

        while let Some(parent) = cursor {
            let Some((key, parent_turn)) = self.turns.get_key_value(parent) else {
                break;
            };
            if !seen.insert(key.as_str()) {
                break;
            }
            ancestors.push(key.as_str());
            cursor = parent_turn.reply_to_turn.as_deref();
        }
        ancestors
    }

    /// Known descendants of a turn id, breadth first; the id itself need not
    /// be known
    pub fn descendants(&self, turn_id: &str) -> Vec<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut descendants = Vec::new();

        if let Some(children) = self.children.get(turn_id) {
            queue.extend(children.iter().map(String::as_str));
        }

        while let Some(child) = queue.pop_front() {
            if child == turn_id || !seen.insert(child) {
                continue;
            }
            if self.turns.contains_key(child) {
                descendants.push(child);
            }
            if let Some(grandchildren) = self.children.get(child) {
                queue.extend(grandchildren.iter().map(String::as_str));
            }
        }
        descendants
    }

    /// Known turns reachable from the seeds: each seed, up through its
    /// ancestors and down through its descendants
    pub fn component<'s, I>(&self, seeds: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'s str>,
    {
        let mut scope = BTreeSet::new();
        for seed in seeds {
            if self.turns.contains_key(seed) {
                scope.insert(seed.to_string());
            }
            scope.extend(self.ancestors(seed).into_iter().map(str::to_string));
            scope.extend(self.descendants(seed).into_iter().map(str::to_string));
        }
        scope
    }
}

/// Work order for one recomputation
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputePlan {
    pub container_id: String,
    /// Touched ids this plan consumes
    pub seeds: BTreeSet<String>,
    /// Turns to resolve, in ingestion order
    pub scope: Vec<Turn>,
    /// Whether the scope is the whole container
    pub full: bool,
}

impl RecomputePlan {
    pub fn turn_ids(&self) -> Vec<String> {
        self.scope.iter().map(|t| t.turn_id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scope.is_empty()
    }
}

/// Tracks touched turns per container and scopes recomputation to them
#[derive(Debug, Default)]
pub struct IncrementalCoordinator {
    graphs: HashMap<String, ContainerGraph>,
}

impl IncrementalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a page of turns; every turn is marked touched in its own container
    pub fn ingest_turns<I>(&mut self, turns: I) -> usize
    where
        I: IntoIterator<Item = Turn>,
    {
        let mut count = 0;
        for turn in turns {
            self.graphs
                .entry(turn.container_id.clone())
                .or_default()
                .ingest(turn);
            count += 1;
        }
        count
    }

    /// Mark the turns of new or edited annotations as touched
    pub fn touch_annotations(&mut self, container_id: &str, annotations: &[ThreadAnnotation]) {
        self.touch(container_id, annotations.iter().map(|a| a.turn_id.as_str()));
    }

    pub fn touch<I, S>(&mut self, container_id: &str, turn_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let graph = self.graphs.entry(container_id.to_string()).or_default();
        for turn_id in turn_ids {
            graph.touch(turn_id);
        }
    }

    pub fn graph(&self, container_id: &str) -> Option<&ContainerGraph> {
        self.graphs.get(container_id)
    }

    pub fn knows(&self, container_id: &str) -> bool {
        self.graphs.contains_key(container_id)
    }

    /// Touched ids not yet consumed by a recomputation
    pub fn touched(&self, container_id: &str) -> Vec<String> {
        self.graphs
            .get(container_id)
            .map(|g| g.touched().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Plan a recomputation covering the tracked touched set plus `extra`
    pub fn plan(&self, container_id: &str, extra: &[String]) -> RecomputePlan {
        let Some(graph) = self.graphs.get(container_id) else {
            return RecomputePlan {
                container_id: container_id.to_string(),
                seeds: extra.iter().cloned().collect(),
                scope: Vec::new(),
                full: false,
            };
        };

        let seeds: BTreeSet<String> = graph.touched().iter().chain(extra.iter()).cloned().collect();
        let component = graph.component(seeds.iter().map(String::as_str));
        let scope = graph
            .turns()
            .into_iter()
            .filter(|t| component.contains(&t.turn_id))
            .cloned()
            .collect();

        RecomputePlan {
            container_id: container_id.to_string(),
            seeds,
            scope,
            full: false,
        }
    }

    /// Plan a recomputation of every known turn in the container
    pub fn plan_full(&self, container_id: &str) -> RecomputePlan {
        let (seeds, scope) = match self.graphs.get(container_id) {
            Some(graph) => (
                graph.touched().clone(),
                graph.turns().into_iter().cloned().collect(),
            ),
            None => (BTreeSet::new(), Vec::new()),
        };
        RecomputePlan {
            container_id: container_id.to_string(),
            seeds,
            scope,
            full: true,
        }
    }

    /// Resolve a plan against an annotation snapshot covering its scope and
    /// write the results into the cache
    ///
    /// Only the plan's seeds are cleared from the touched set, so turns
    /// touched while the snapshot was being fetched wait for the next pass.
    pub fn apply(
        &mut self,
        plan: &RecomputePlan,
        annotations: &[ThreadAnnotation],
        cache: &mut MembershipCache,
    ) -> Resolution {
        let resolution = resolver::resolve(&plan.scope, annotations);

        if plan.full {
            cache.clear_container(&plan.container_id);
        }
        for membership in &resolution.memberships {
            cache.insert(&plan.container_id, membership.clone());
        }

        if let Some(graph) = self.graphs.get_mut(&plan.container_id) {
            for seed in &plan.seeds {
                graph.touched.remove(seed);
            }
        }

        resolution
    }

    /// Plan and apply in one step
    pub fn recompute(
        &mut self,
        container_id: &str,
        extra: &[String],
        annotations: &[ThreadAnnotation],
        cache: &mut MembershipCache,
    ) -> Resolution {
        let plan = self.plan(container_id, extra);
        self.apply(&plan, annotations, cache)
    }

    /// Cached memberships of every known turn, in ingestion order
    pub fn view(&self, container_id: &str, cache: &MembershipCache) -> Vec<ResolvedMembership> {
        self.graphs
            .get(container_id)
            .map(|graph| {
                graph
                    .turns()
                    .into_iter()
                    .filter_map(|t| cache.get(container_id, &t.turn_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadlab_common::MembershipOrigin;

    fn turn(id: &str, parent: Option<&str>, seq: u64) -> Turn {
        let turn = Turn::new("c1", id, "user", "", seq);
        match parent {
            Some(p) => turn.replying_to(p),
            None => turn,
        }
    }

    #[test]
    fn test_ingest_marks_touched() {
        let mut coordinator = IncrementalCoordinator::new();
        coordinator.ingest_turns(vec![turn("t1", None, 0), turn("t2", Some("t1"), 1)]);
        assert_eq!(coordinator.touched("c1"), vec!["t1", "t2"]);
    }

    #[test]
    fn test_component_goes_up_and_down_but_not_sideways() {
        let mut graph = ContainerGraph::default();
        // t1 <- t2 <- t3, t1 <- t4
        graph.ingest(turn("t1", None, 0));
        graph.ingest(turn("t2", Some("t1"), 1));
        graph.ingest(turn("t3", Some("t2"), 2));
        graph.ingest(turn("t4", Some("t1"), 3));

        let scope = graph.component(["t2"]);
        assert_eq!(scope.into_iter().collect::<Vec<_>>(), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_component_terminates_on_cycle() {
        let mut graph = ContainerGraph::default();
        graph.ingest(turn("a", Some("b"), 0));
        graph.ingest(turn("b", Some("a"), 1));

        let scope = graph.component(["a"]);
        assert_eq!(scope.len(), 2);
    }

    #[test]
    fn test_waiting_on_missing_parent() {
        let mut graph = ContainerGraph::default();
        graph.ingest(turn("t2", Some("t1"), 1));
        assert_eq!(graph.waiting_on("t1"), vec!["t2"]);

        graph.ingest(turn("t1", None, 0));
        assert!(graph.waiting_on("t1").is_empty());
        assert_eq!(graph.descendants("t1"), vec!["t2"]);
    }

    #[test]
    fn test_reingest_with_new_parent_moves_child() {
        let mut graph = ContainerGraph::default();
        graph.ingest(turn("t1", None, 0));
        graph.ingest(turn("t9", None, 1));
        graph.ingest(turn("t2", Some("t1"), 2));
        graph.ingest(turn("t2", Some("t9"), 2));

        assert!(graph.descendants("t1").is_empty());
        assert_eq!(graph.descendants("t9"), vec!["t2"]);
    }

    #[test]
    fn test_apply_clears_only_planned_seeds() {
        let mut coordinator = IncrementalCoordinator::new();
        let mut cache = MembershipCache::new();
        coordinator.ingest_turns(vec![turn("t1", None, 0)]);

        let plan = coordinator.plan("c1", &[]);
        coordinator.ingest_turns(vec![turn("t2", None, 1)]);
        coordinator.apply(&plan, &[], &mut cache);

        assert_eq!(coordinator.touched("c1"), vec!["t2"]);
        assert_eq!(cache.get("c1", "t1").unwrap().origin, MembershipOrigin::Unresolved);
        assert!(cache.get("c1", "t2").is_none());
    }

    #[test]
    fn test_plan_for_unknown_container_is_empty() {
        let coordinator = IncrementalCoordinator::new();
        assert!(coordinator.plan("nope", &["x".to_string()]).is_empty());
        assert!(coordinator.plan_full("nope").is_empty());
    }

    #[test]
    fn test_cache_memberships_sorted() {
        let mut cache = MembershipCache::new();
        cache.insert("c1", ResolvedMembership::unresolved("b"));
        cache.insert("c1", ResolvedMembership::unresolved("a"));
        let ids: Vec<String> = cache.memberships("c1").into_iter().map(|m| m.turn_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(cache.len("c1"), 2);
        assert!(cache.is_empty("c2"));
    }
}
