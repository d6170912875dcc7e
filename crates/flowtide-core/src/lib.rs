//! Flowtide: a typed, DAG-oriented workflow execution engine.
//!
//! Workflows are directed acyclic graphs of nodes; each node is a
//! self-describing unit with declared input/output schemas, a category,
//! capability flags, and an async executor. The engine validates inputs,
//! resolves `{{ }}` variable references against prior outputs, executes
//! nodes in dependency order with intra-wave parallelism, applies
//! per-node retry/timeout/cache policies, propagates conditional-branch
//! and failure skips, and returns a per-node status/result map.
//!
//! Module map:
//! - `schema` -- input/output shape validation and field introspection
//! - `definition` -- node definitions and the executor contract
//! - `registry` -- the type-id index of definitions
//! - `context` -- the per-run variable store, templating, output merging
//! - `cache` -- pluggable TTL store for node result memoization
//! - `config` -- retry/cache/timeout/cancellation policies and hooks
//! - `node_executor` -- single-node pipeline (validate, cache, retry)
//! - `dag` -- cycle detection and parallel wave computation
//! - `workflow` -- the in-memory workflow model and document conversion
//! - `executor` -- the wave-based workflow executor

pub mod cache;
pub mod config;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod node_executor;
pub mod registry;
pub mod schema;
pub mod workflow;

pub use cache::{CacheStore, MemoryCacheStore};
pub use config::{
    CachePolicy, ExecutionConfig, ExecutionHooks, NodeOverrides, NodeRunConfig, RetryPolicy,
};
pub use context::{ExecutionContext, NodeContext, NodeContextOptions};
pub use dag::{PlanError, build_execution_plan};
pub use definition::{ExecutorError, FnExecutor, NodeDefinition, NodeExecutor};
pub use executor::{WorkflowResult, WorkflowRunError, WorkflowRunner};
pub use node_executor::{NodeExecutorError, execute_node};
pub use registry::{NodeRegistry, RegistryError};
pub use schema::{FieldSpec, Schema, SchemaError};
pub use workflow::{Edge, Workflow, WorkflowError, WorkflowNode, validate_workflow};

pub use flowtide_types::document::{DocumentEdge, DocumentNode, Position, WorkflowDocument};
pub use flowtide_types::node::{
    NodeCapabilities, NodeCategory, NodeExecutionResult, NodeMetadata, NodeStatus,
};
pub use flowtide_types::schema::{FieldDescriptor, FieldType};
