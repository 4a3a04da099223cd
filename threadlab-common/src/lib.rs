//! # threadlab Common Library
//!
//! Shared code for the threadlab workspace including:
//! - Canonical record model (turns, thread annotations, resolved memberships)
//! - Common error types
//! - Configuration loading
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{
    AnnotationSource, MembershipOrigin, ResolvedMembership, ThreadAnnotation, Turn,
};
