//! In-process turn and annotation store

use super::{AnnotationStore, AnnotationWrite, PageRequest, TurnSource};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use threadlab_common::{AnnotationSource, Result, ThreadAnnotation, Turn};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct ContainerData {
    /// Ingestion order
    turns: Vec<Turn>,
    position: HashMap<String, usize>,
    annotations: Vec<ThreadAnnotation>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: HashMap<String, ContainerData>,
    /// Last `created_at` handed out
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Turn source and annotation store held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of annotations recorded for a container
    pub async fn annotation_count(&self, container_id: &str) -> usize {
        let inner = self.inner.read().await;
        inner
            .containers
            .get(container_id)
            .map_or(0, |c| c.annotations.len())
    }
}

#[async_trait]
impl TurnSource for MemoryStore {
    async fn fetch_turns(&self, container_id: &str, page: PageRequest) -> Result<Vec<Turn>> {
        let inner = self.inner.read().await;
        let Some(container) = inner.containers.get(container_id) else {
            return Ok(Vec::new());
        };
        let mut ordered: Vec<&Turn> = container.turns.iter().collect();
        ordered.sort_by_key(|t| t.ingest_seq);
        Ok(ordered
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn store_turns(&self, turns: &[Turn]) -> Result<()> {
        let mut inner = self.inner.write().await;
        for turn in turns {
            let container = inner.containers.entry(turn.container_id.clone()).or_default();
            match container.position.get(&turn.turn_id) {
                Some(&idx) => container.turns[idx] = turn.clone(),
                None => {
                    container.position.insert(turn.turn_id.clone(), container.turns.len());
                    container.turns.push(turn.clone());
                }
            }
        }
        debug!("Stored {} turns in memory", turns.len());
        Ok(())
    }

    async fn next_ingest_seq(&self, container_id: &str) -> Result<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .containers
            .get(container_id)
            .and_then(|c| c.turns.iter().map(|t| t.ingest_seq).max())
            .map_or(0, |max| max + 1))
    }
}

#[async_trait]
impl AnnotationStore for MemoryStore {
    async fn fetch_annotations(
        &self,
        container_id: &str,
        turn_ids: &[String],
    ) -> Result<Vec<ThreadAnnotation>> {
        let inner = self.inner.read().await;
        let Some(container) = inner.containers.get(container_id) else {
            return Ok(Vec::new());
        };
        let wanted: HashSet<&str> = turn_ids.iter().map(String::as_str).collect();
        Ok(container
            .annotations
            .iter()
            .filter(|a| wanted.contains(a.turn_id.as_str()))
            .cloned()
            .collect())
    }

    async fn write_annotation(
        &self,
        container_id: &str,
        write: AnnotationWrite,
    ) -> Result<ThreadAnnotation> {
        write.validate()?;

        let mut inner = self.inner.write().await;
        let created_at = inner.tick();
        let annotation = ThreadAnnotation {
            turn_id: write.turn_id,
            thread_id: write.thread_id,
            confidence: write.confidence,
            notes: write.notes,
            source: AnnotationSource::Manual,
            created_by: write.created_by,
            created_at,
        };
        inner
            .containers
            .entry(container_id.to_string())
            .or_default()
            .annotations
            .push(annotation.clone());
        Ok(annotation)
    }

    async fn append_imported(
        &self,
        container_id: &str,
        annotations: &[ThreadAnnotation],
    ) -> Result<Vec<ThreadAnnotation>> {
        let mut inner = self.inner.write().await;
        let mut stamped = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            let mut annotation = annotation.clone();
            annotation.created_at = inner.tick();
            stamped.push(annotation);
        }
        inner
            .containers
            .entry(container_id.to_string())
            .or_default()
            .annotations
            .extend(stamped.iter().cloned());
        Ok(stamped)
    }
}
