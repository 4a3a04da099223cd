//! Turn and annotation collaborators
//!
//! The engine never owns persistence. It reads turns page by page through a
//! [`TurnSource`] and reads or appends annotations through an
//! [`AnnotationStore`]. Annotations are append-only; "moving" a turn to a
//! different thread means appending a newer annotation.
//!
//! Two implementations ship with the engine:
//! - [`MemoryStore`]: process-local, used by tests and one-shot runs
//! - [`SqliteStore`]: sqlx-backed, used by the CLI

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use threadlab_common::{Error, Result, ThreadAnnotation, Turn};

/// Offset-based page of turns in ingestion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// Page following this one
    pub fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// An annotator's request to label one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationWrite {
    pub turn_id: String,
    pub thread_id: String,
    pub confidence: f64,
    pub notes: Option<String>,
    pub created_by: String,
}

impl AnnotationWrite {
    pub fn new(
        turn_id: impl Into<String>,
        thread_id: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            turn_id: turn_id.into(),
            thread_id: thread_id.into(),
            confidence: 1.0,
            notes: None,
            created_by: created_by.into(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Reject writes the resolver could not rank
    pub fn validate(&self) -> Result<()> {
        if self.turn_id.trim().is_empty() {
            return Err(Error::InvalidInput("turn_id must not be empty".to_string()));
        }
        if self.thread_id.trim().is_empty() {
            return Err(Error::InvalidInput("thread_id must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::InvalidInput(format!(
                "confidence {} outside [0.0, 1.0]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Source of canonical turns for a container
#[async_trait]
pub trait TurnSource: Send + Sync {
    /// One page of turns in ingestion order; an empty page ends the container
    async fn fetch_turns(&self, container_id: &str, page: PageRequest) -> Result<Vec<Turn>>;

    /// Persist newly ingested turns; a repeated `(container_id, turn_id)`
    /// replaces the stored record
    async fn store_turns(&self, turns: &[Turn]) -> Result<()>;

    /// Ingestion sequence the next stored turn of the container should take
    async fn next_ingest_seq(&self, container_id: &str) -> Result<u64>;
}

/// Append-only annotation log
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Every annotation recorded for the given turns, all sources
    async fn fetch_annotations(
        &self,
        container_id: &str,
        turn_ids: &[String],
    ) -> Result<Vec<ThreadAnnotation>>;

    /// Append a manual annotation, stamping `created_at`
    async fn write_annotation(
        &self,
        container_id: &str,
        write: AnnotationWrite,
    ) -> Result<ThreadAnnotation>;

    /// Append import-seeded annotations, stamping each `created_at` in order
    async fn append_imported(
        &self,
        container_id: &str,
        annotations: &[ThreadAnnotation],
    ) -> Result<Vec<ThreadAnnotation>>;
}

/// Read every page of a container
pub async fn fetch_all_turns<S>(
    source: &S,
    container_id: &str,
    page_size: usize,
) -> Result<Vec<Turn>>
where
    S: TurnSource + ?Sized,
{
    if page_size == 0 {
        return Err(Error::InvalidInput("page size must be positive".to_string()));
    }

    let mut turns = Vec::new();
    let mut page = PageRequest::first(page_size);
    loop {
        let batch = source.fetch_turns(container_id, page).await?;
        let len = batch.len();
        turns.extend(batch);
        if len < page.limit {
            break;
        }
        page = page.next();
    }
    Ok(turns)
}
