//! Canonical record model
//!
//! `Turn` and `ThreadAnnotation` are created by ingestion and annotation
//! writers and are never mutated by the engine. `ResolvedMembership` is a
//! projection regenerated by the resolver on demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Process-unique identifier assigned at ingestion
    pub id: Uuid,
    /// Source-provided identifier, unique within a container
    pub turn_id: String,
    /// Owning conversation container
    pub container_id: String,
    /// Author identifier (opaque)
    pub user_id: String,
    /// Message content, possibly empty
    pub text: String,
    /// `turn_id` of the parent; `None` for roots
    pub reply_to_turn: Option<String>,
    /// Logical ordering key
    pub timestamp: Option<DateTime<Utc>>,
    /// Ingestion order within the container; stands in for a missing timestamp
    pub ingest_seq: u64,
}

impl Turn {
    /// Create a root turn with a fresh id and no timestamp
    pub fn new(
        container_id: impl Into<String>,
        turn_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
        ingest_seq: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            turn_id: turn_id.into(),
            container_id: container_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            reply_to_turn: None,
            timestamp: None,
            ingest_seq,
        }
    }

    /// Set the parent turn
    pub fn replying_to(mut self, parent: impl Into<String>) -> Self {
        self.reply_to_turn = Some(parent.into());
        self
    }

    /// Set the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn is_root(&self) -> bool {
        self.reply_to_turn.is_none()
    }

    /// Presentation order: timestamped turns first by timestamp, then
    /// untimestamped turns, with ingestion order breaking every tie.
    pub fn ordering_key(&self) -> (bool, Option<DateTime<Utc>>, u64) {
        (self.timestamp.is_none(), self.timestamp, self.ingest_seq)
    }
}

/// Provenance of a thread annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationSource {
    /// Written by an annotator
    Manual,
    /// Seeded from an imported `thread` column
    Import,
}

impl AnnotationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Import => "import",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "import" => Some(Self::Import),
            _ => None,
        }
    }
}

/// A claim that one turn belongs to one thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadAnnotation {
    pub turn_id: String,
    pub thread_id: String,
    /// Confidence in [0.0, 1.0]
    pub confidence: f64,
    pub notes: Option<String>,
    pub source: AnnotationSource,
    pub created_by: String,
    /// Monotonic per store; assigned when the annotation is appended
    pub created_at: u64,
}

/// How a turn obtained its thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipOrigin {
    /// The turn's own winning annotation
    Explicit,
    /// Propagated from the nearest labelled ancestor
    Inherited,
    /// No label reachable (unlabelled root, dangling parent or cycle)
    Unresolved,
}

/// Derived thread assignment for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMembership {
    pub turn_id: String,
    pub thread_id: Option<String>,
    pub origin: MembershipOrigin,
    /// Confidence of the turn's own winning annotation; `None` unless explicit
    pub confidence: Option<f64>,
}

impl ResolvedMembership {
    pub fn explicit(
        turn_id: impl Into<String>,
        thread_id: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            turn_id: turn_id.into(),
            thread_id: Some(thread_id.into()),
            origin: MembershipOrigin::Explicit,
            confidence: Some(confidence),
        }
    }

    pub fn inherited(turn_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            thread_id: Some(thread_id.into()),
            origin: MembershipOrigin::Inherited,
            confidence: None,
        }
    }

    pub fn unresolved(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            thread_id: None,
            origin: MembershipOrigin::Unresolved,
            confidence: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.thread_id.is_some()
    }
}
