//! Resolution service
//!
//! Hosts the engine for many containers on top of a store. Each container
//! has its own coordinator and membership cache behind its own mutex, so
//! containers never wait on each other. Within a container, imports, page
//! loads, annotation writes and resolutions are serialized.

use crate::coordinator::{IncrementalCoordinator, MembershipCache};
use crate::error::{EngineError, EngineResult};
use crate::import::{import_rows, ColumnMapping, ImportContext, ImportOutcome, RawRow};
use crate::projector::{self, AnnotatedTurn, Projection};
use crate::resolver::{self, Resolution};
use crate::store::{fetch_all_turns, AnnotationStore, AnnotationWrite, PageRequest, TurnSource};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use threadlab_common::config::EngineSettings;
use threadlab_common::{ResolvedMembership, ThreadAnnotation, Turn};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ContainerState {
    coordinator: IncrementalCoordinator,
    cache: MembershipCache,
    /// Every stored page has been pulled into the coordinator
    loaded: bool,
}

impl ContainerState {
    fn known_turns(&self, container_id: &str) -> Vec<Turn> {
        self.coordinator
            .graph(container_id)
            .map(|g| g.turns().into_iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Incremental resolution over a turn source and annotation store
pub struct ResolutionService<S> {
    store: Arc<S>,
    settings: EngineSettings,
    containers: RwLock<HashMap<String, Arc<Mutex<ContainerState>>>>,
}

impl<S> ResolutionService<S>
where
    S: TurnSource + AnnotationStore,
{
    pub fn new(store: Arc<S>, settings: EngineSettings) -> EngineResult<Self> {
        settings
            .validate()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        Ok(Self {
            store,
            settings,
            containers: RwLock::new(HashMap::new()),
        })
    }

    /// Seed a container with previously computed memberships
    pub fn with_cache(mut self, container_id: impl Into<String>, cache: MembershipCache) -> Self {
        let state = ContainerState {
            cache,
            ..Default::default()
        };
        self.containers
            .get_mut()
            .insert(container_id.into(), Arc::new(Mutex::new(state)));
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn container(&self, container_id: &str) -> Arc<Mutex<ContainerState>> {
        if let Some(state) = self.containers.read().await.get(container_id) {
            return state.clone();
        }
        self.containers
            .write()
            .await
            .entry(container_id.to_string())
            .or_default()
            .clone()
    }

    async fn load_all(
        &self,
        container_id: &str,
        state: &mut ContainerState,
    ) -> EngineResult<usize> {
        let turns =
            fetch_all_turns(self.store.as_ref(), container_id, self.settings.page_size).await?;
        let count = state.coordinator.ingest_turns(turns);
        state.loaded = true;
        debug!(container_id = %container_id, turns = count, "Loaded container turns");
        Ok(count)
    }

    /// Load a container the coordinator has never seen; paged loads are
    /// left alone
    async fn ensure_loaded(
        &self,
        container_id: &str,
        state: &mut ContainerState,
    ) -> EngineResult<()> {
        if !state.loaded && !state.coordinator.knows(container_id) {
            self.load_all(container_id, state).await?;
        }
        Ok(())
    }

    /// Map rows, persist the turns and seeded annotations, and mark them
    /// touched
    ///
    /// A mapping without `content` fails before anything is written.
    pub async fn import(
        &self,
        container_id: &str,
        rows: &[RawRow],
        mapping: &ColumnMapping,
        created_by: &str,
    ) -> EngineResult<ImportOutcome> {
        mapping.validate()?;

        let state = self.container(container_id).await;
        let mut state = state.lock().await;
        self.ensure_loaded(container_id, &mut state).await?;

        let first_seq = self.store.next_ingest_seq(container_id).await?;
        let ctx = ImportContext::new(container_id, created_by)
            .starting_at(first_seq)
            .with_confidence(self.settings.import_confidence);
        let mut outcome = import_rows(rows, mapping, &ctx)?;

        self.store.store_turns(&outcome.turns).await?;
        outcome.annotations = self
            .store
            .append_imported(container_id, &outcome.annotations)
            .await?;

        state.coordinator.ingest_turns(outcome.turns.iter().cloned());
        state
            .coordinator
            .touch_annotations(container_id, &outcome.annotations);

        info!(
            container_id = %container_id,
            total_rows = outcome.total_rows,
            turns = outcome.turns.len(),
            annotations = outcome.annotations.len(),
            row_errors = outcome.row_errors.len(),
            row_warnings = outcome.row_warnings.len(),
            "Import completed"
        );
        if !outcome.row_errors.is_empty() {
            warn!(
                container_id = %container_id,
                skipped = outcome.row_errors.len(),
                "Import skipped rows"
            );
        }
        Ok(outcome)
    }

    /// Pull one page of stored turns into the coordinator
    pub async fn load_page(&self, container_id: &str, page: PageRequest) -> EngineResult<usize> {
        let state = self.container(container_id).await;
        let mut state = state.lock().await;

        let turns = self.store.fetch_turns(container_id, page).await?;
        let count = state.coordinator.ingest_turns(turns);
        debug!(
            container_id = %container_id,
            offset = page.offset,
            turns = count,
            "Loaded page"
        );
        Ok(count)
    }

    /// Pull every stored page of the container into the coordinator
    pub async fn load_container(&self, container_id: &str) -> EngineResult<usize> {
        let state = self.container(container_id).await;
        let mut state = state.lock().await;
        self.load_all(container_id, &mut state).await?;
        Ok(state
            .coordinator
            .graph(container_id)
            .map_or(0, |g| g.len()))
    }

    /// Append a manual annotation and mark its turn touched
    pub async fn write_annotation(
        &self,
        container_id: &str,
        write: AnnotationWrite,
    ) -> EngineResult<ThreadAnnotation> {
        let state = self.container(container_id).await;
        let mut state = state.lock().await;

        let annotation = self.store.write_annotation(container_id, write).await?;
        state.coordinator.touch(container_id, [annotation.turn_id.as_str()]);
        debug!(
            container_id = %container_id,
            turn_id = %annotation.turn_id,
            thread_id = %annotation.thread_id,
            created_by = %annotation.created_by,
            "Annotation written"
        );
        Ok(annotation)
    }

    /// Recompute the touched turns plus `touched`, and return every cached
    /// membership of the container with this pass's diagnostics
    ///
    /// A container never seen before is loaded in full first.
    pub async fn resolve(
        &self,
        container_id: &str,
        touched: Option<&[String]>,
    ) -> EngineResult<Resolution> {
        let state = self.container(container_id).await;
        let mut state = state.lock().await;
        self.ensure_loaded(container_id, &mut state).await?;

        let plan = state.coordinator.plan(container_id, touched.unwrap_or_default());
        let annotations = self
            .store
            .fetch_annotations(container_id, &plan.turn_ids())
            .await?;

        let ContainerState { coordinator, cache, .. } = &mut *state;
        let pass = coordinator.apply(&plan, &annotations, cache);
        debug!(
            container_id = %container_id,
            seeds = plan.seeds.len(),
            scope = plan.scope.len(),
            diagnostics = pass.diagnostics.len(),
            "Incremental resolution"
        );

        Ok(Resolution {
            memberships: coordinator.view(container_id, cache),
            diagnostics: pass.diagnostics,
        })
    }

    /// Recompute every known turn of the container
    pub async fn resolve_full(&self, container_id: &str) -> EngineResult<Resolution> {
        let state = self.container(container_id).await;
        let mut state = state.lock().await;
        self.ensure_loaded(container_id, &mut state).await?;

        let plan = state.coordinator.plan_full(container_id);
        let annotations = self
            .store
            .fetch_annotations(container_id, &plan.turn_ids())
            .await?;

        let ContainerState { coordinator, cache, .. } = &mut *state;
        let resolution = coordinator.apply(&plan, &annotations, cache);
        info!(
            container_id = %container_id,
            turns = plan.scope.len(),
            unresolved = resolution.unresolved_count(),
            diagnostics = resolution.diagnostics.len(),
            "Full resolution"
        );
        Ok(resolution)
    }

    /// Group the container's known turns by their cached memberships
    pub async fn project(&self, container_id: &str) -> EngineResult<Projection> {
        let state = self.container(container_id).await;
        let state = state.lock().await;
        let memberships = state.coordinator.view(container_id, &state.cache);
        Ok(projector::project(&memberships, &state.known_turns(container_id)))
    }

    /// Cached membership of one turn
    pub async fn membership(
        &self,
        container_id: &str,
        turn_id: &str,
    ) -> Option<ResolvedMembership> {
        let state = self.container(container_id).await;
        let state = state.lock().await;
        state.cache.get(container_id, turn_id).cloned()
    }

    /// Winning explicit annotations of the container's known turns, by thread
    pub async fn annotation_listing(
        &self,
        container_id: &str,
    ) -> EngineResult<BTreeMap<String, Vec<AnnotatedTurn>>> {
        let state = self.container(container_id).await;
        let state = state.lock().await;
        let turns = state.known_turns(container_id);
        let turn_ids: Vec<String> = turns.iter().map(|t| t.turn_id.clone()).collect();
        let annotations = self.store.fetch_annotations(container_id, &turn_ids).await?;
        Ok(projector::annotation_listing(&annotations, &turns))
    }
}

/// Fully resolve several containers in parallel, one worker task each
///
/// Nothing is cached or shared between containers. The first failing
/// container fails the whole call.
pub async fn resolve_containers<S>(
    store: Arc<S>,
    container_ids: Vec<String>,
    settings: &EngineSettings,
) -> EngineResult<BTreeMap<String, Resolution>>
where
    S: TurnSource + AnnotationStore + 'static,
{
    settings
        .validate()
        .map_err(|e| EngineError::Configuration(e.to_string()))?;
    let page_size = settings.page_size;
    let total = container_ids.len();

    let results: Vec<EngineResult<(String, Resolution)>> = stream::iter(container_ids)
        .map(|container_id| {
            let store = store.clone();
            async move {
                tokio::spawn(async move {
                    let turns = fetch_all_turns(store.as_ref(), &container_id, page_size).await?;
                    let turn_ids: Vec<String> = turns.iter().map(|t| t.turn_id.clone()).collect();
                    let annotations = store.fetch_annotations(&container_id, &turn_ids).await?;
                    let resolution = resolver::resolve(&turns, &annotations);
                    debug!(
                        container_id = %container_id,
                        turns = turns.len(),
                        diagnostics = resolution.diagnostics.len(),
                        "Container resolved"
                    );
                    Ok::<_, EngineError>((container_id, resolution))
                })
                .await
                .unwrap_or_else(|e| Err(e.into()))
            }
        })
        .buffer_unordered(settings.max_concurrent_containers)
        .collect()
        .await;

    let resolved: BTreeMap<String, Resolution> = results.into_iter().collect::<EngineResult<_>>()?;
    info!(containers = total, "Resolved containers");
    Ok(resolved)
}
