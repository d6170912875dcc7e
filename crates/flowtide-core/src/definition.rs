//! Node definitions: the static description of a node type plus its
//! executor.
//!
//! A `NodeDefinition` bundles the type identifier, display metadata,
//! input/output schemas, and the async executor. Definitions are created
//! once at startup and shared by reference; executors must be reentrant --
//! many workflows may run the same definition concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use flowtide_types::node::{NodeCapabilities, NodeCategory, NodeExecutionResult, NodeMetadata};
use serde_json::Value;

use crate::context::NodeContext;
use crate::schema::Schema;

/// Error type executors may raise for unexpected failures.
///
/// Raising is equivalent to returning an in-band failure result: the
/// engine converts the error's message into `{ success: false, error }`
/// and runs it through the same retry policy.
pub type ExecutorError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// NodeExecutor
// ---------------------------------------------------------------------------

/// The async unit of work attached to a node definition.
///
/// `input` is already validated against the definition's input schema.
/// Recoverable failures should be reported as
/// `Ok(NodeExecutionResult::failure(..))`; `Err` is for unexpected
/// failures. Executors that support cancellation should observe the
/// configured signal at every I/O suspension -- the engine cannot
/// forcibly interrupt one that does not.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        input: Value,
        ctx: &NodeContext,
    ) -> Result<NodeExecutionResult, ExecutorError>;
}

// ---------------------------------------------------------------------------
// FnExecutor
// ---------------------------------------------------------------------------

/// Adapter turning an async closure into a `NodeExecutor`.
///
/// The closure receives the validated input and an owned clone of the
/// node context.
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(Value, NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeExecutionResult, ExecutorError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Convenience: wrap the closure straight into the `Arc` a
    /// definition wants.
    pub fn shared(f: F) -> Arc<dyn NodeExecutor> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> NodeExecutor for FnExecutor<F>
where
    F: Fn(Value, NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeExecutionResult, ExecutorError>> + Send,
{
    async fn execute(
        &self,
        input: Value,
        ctx: &NodeContext,
    ) -> Result<NodeExecutionResult, ExecutorError> {
        (self.f)(input, ctx.clone()).await
    }
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// The immutable description of a node type.
#[derive(Clone)]
pub struct NodeDefinition {
    pub type_id: String,
    pub name: String,
    pub description: String,
    pub category: NodeCategory,
    /// Rough duration estimate in seconds, informational only.
    pub estimated_duration_secs: Option<u64>,
    pub capabilities: NodeCapabilities,
    pub input_schema: Schema,
    pub output_schema: Schema,
    executor: Arc<dyn NodeExecutor>,
}

impl NodeDefinition {
    /// Create a definition from its required parts.
    ///
    /// No validation is performed beyond the fields being present;
    /// structural validity of the schemas is the caller's responsibility.
    pub fn new(
        type_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        category: NodeCategory,
        input_schema: Schema,
        output_schema: Schema,
        executor: Arc<dyn NodeExecutor>,
    ) -> Self {
        Self {
            type_id: type_id.into(),
            name: name.into(),
            description: description.into(),
            category,
            estimated_duration_secs: None,
            capabilities: NodeCapabilities::default(),
            input_schema,
            output_schema,
            executor,
        }
    }

    pub fn with_capabilities(mut self, capabilities: NodeCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_estimated_duration_secs(mut self, secs: u64) -> Self {
        self.estimated_duration_secs = Some(secs);
        self
    }

    pub fn executor(&self) -> Arc<dyn NodeExecutor> {
        Arc::clone(&self.executor)
    }

    /// The executor-free view of this definition.
    pub fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            type_id: self.type_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category,
            estimated_duration_secs: self.estimated_duration_secs,
            capabilities: self.capabilities,
            input_fields: self.input_schema.fields().to_vec(),
            output_fields: self.output_schema.fields().to_vec(),
        }
    }
}

impl std::fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
