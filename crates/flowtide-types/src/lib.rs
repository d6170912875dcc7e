//! Shared domain types for Flowtide.
//!
//! This crate contains the serde-facing types used across the Flowtide
//! engine: node metadata, execution results and statuses, schema field
//! descriptors, and the workflow document interchange format.
//!
//! Zero infrastructure dependencies -- only serde.

pub mod document;
pub mod node;
pub mod schema;
