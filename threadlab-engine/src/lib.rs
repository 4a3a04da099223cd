//! threadlab-engine: thread resolution and annotation consistency
//!
//! - [`import`]: tabular rows to canonical turns and seeded annotations
//! - [`resolver`]: deterministic thread membership over the reply graph
//! - [`coordinator`]: incremental recomputation scoped to touched turns
//! - [`projector`]: memberships back to presentable thread groups
//! - [`store`]: turn source and annotation store collaborators
//! - [`service`]: the above wired together for many containers

pub mod coordinator;
pub mod error;
pub mod import;
pub mod projector;
pub mod resolver;
pub mod service;
pub mod store;

pub use crate::coordinator::{IncrementalCoordinator, MembershipCache, RecomputePlan};
pub use crate::error::{EngineError, EngineResult};
pub use crate::import::{
    import_rows, ColumnMapping, ImportContext, ImportOutcome, ImportReport, ImportStatus, RawRow,
    RowError, RowWarning, TargetField,
};
pub use crate::projector::{annotation_listing, project, AnnotatedTurn, Projection};
pub use crate::resolver::diagnostics::{Diagnostic, DiagnosticKind};
pub use crate::resolver::{resolve, resolve_with_context, Resolution};
pub use crate::service::{resolve_containers, ResolutionService};
pub use crate::store::{
    AnnotationStore, AnnotationWrite, MemoryStore, PageRequest, SqliteStore, TurnSource,
};
