//! Workflow executor: wave-based parallel DAG execution.
//!
//! `WorkflowRunner` drives the planner's waves in order. Within a wave
//! every non-skipped node runs concurrently on a `JoinSet`; waves are
//! strictly sequential. Node inputs are interpolated at launch, outputs
//! are merged back into the execution context from the single-threaded
//! completion loop, and conditional branches or failures propagate skips
//! to downstream descendants.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use flowtide_types::node::{NodeExecutionResult, NodeStatus};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::context::ExecutionContext;
use crate::dag::{PlanError, build_execution_plan};
use crate::node_executor::{NodeExecutorError, execute_node};
use crate::workflow::{Workflow, WorkflowError, WorkflowNode, validate_workflow};

// ---------------------------------------------------------------------------
// Result and error types
// ---------------------------------------------------------------------------

/// Outcome of a whole workflow run.
///
/// `success` is true exactly when every non-skipped node succeeded.
/// Skipped nodes appear in `statuses` but never in `results`.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub success: bool,
    pub results: HashMap<String, NodeExecutionResult>,
    pub statuses: HashMap<String, NodeStatus>,
    /// First-level failure message, when any node failed or the run
    /// itself was cut short.
    pub error: Option<String>,
}

/// Workflow-level fatals. Per-node failures are recorded in the result
/// map instead and never surface here.
#[derive(Debug, Error)]
pub enum WorkflowRunError {
    #[error(transparent)]
    Invalid(#[from] WorkflowError),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Per-run bookkeeping owned by the completion loop.
struct RunState {
    statuses: HashMap<String, NodeStatus>,
    results: HashMap<String, NodeExecutionResult>,
    skipped: HashSet<String>,
    /// Reverse adjacency: children of each node, for skip propagation.
    children: HashMap<String, Vec<String>>,
    /// Conditioned outgoing edges of each node: `(condition, target)`.
    branch_edges: HashMap<String, Vec<(String, String)>>,
    workflow_error: Option<String>,
}

impl RunState {
    fn new(workflow: &Workflow) -> Self {
        let known: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut branch_edges: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for edge in &workflow.edges {
            if !known.contains(edge.from.as_str()) || !known.contains(edge.to.as_str()) {
                continue;
            }
            children
                .entry(edge.from.clone())
                .or_default()
                .push(edge.to.clone());
            if let Some(condition) = &edge.condition {
                branch_edges
                    .entry(edge.from.clone())
                    .or_default()
                    .push((condition.clone(), edge.to.clone()));
            }
        }

        Self {
            statuses: workflow
                .nodes
                .iter()
                .map(|n| (n.id.clone(), NodeStatus::Idle))
                .collect(),
            results: HashMap::new(),
            skipped: HashSet::new(),
            children,
            branch_edges,
            workflow_error: None,
        }
    }

    /// Transitively mark every descendant of `id` as skipped. Idempotent.
    fn mark_downstream_skipped(&mut self, id: &str) {
        let mut stack: Vec<String> = self.children.get(id).cloned().unwrap_or_default();
        while let Some(next) = stack.pop() {
            if self.skipped.insert(next.clone()) {
                if let Some(grandchildren) = self.children.get(&next) {
                    stack.extend(grandchildren.iter().cloned());
                }
            }
        }
    }

    /// Mark a node and its descendants as skipped (branch deselection).
    fn skip_with_descendants(&mut self, id: &str) {
        if self.skipped.insert(id.to_string()) {
            self.mark_downstream_skipped(id);
        }
    }

    /// Fold one settled node into the run state. Runs only from the
    /// single-threaded completion loop, so context writes are serialized.
    fn integrate(
        &mut self,
        id: String,
        outcome: Result<NodeExecutionResult, NodeExecutorError>,
        context: &ExecutionContext,
        cfg: &ExecutionConfig,
    ) {
        match outcome {
            Ok(result) if result.success => {
                self.results.insert(id.clone(), result.clone());
                self.statuses.insert(id.clone(), NodeStatus::Success);
                cfg.hooks.fire_node_complete(&id, &result);

                if let Some(output) = &result.output {
                    context.store_node_output(&id, output.clone());
                }

                // Conditional branching: every conditioned edge whose
                // condition differs from the chosen branch is deselected.
                if let Some(next) = &result.next_node_id {
                    if let Some(branches) = self.branch_edges.get(&id).cloned() {
                        for (condition, target) in branches {
                            if condition != *next {
                                self.skip_with_descendants(&target);
                            }
                        }
                    }
                }
            }
            Ok(result) => {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "node execution failed".to_string());
                self.record_failure(id, result, &message, context, cfg);
            }
            Err(thrown) => {
                let message = thrown.to_string();
                let result = NodeExecutionResult::failure(message.clone());
                self.record_failure(id, result, &message, context, cfg);
            }
        }
    }

    fn record_failure(
        &mut self,
        id: String,
        result: NodeExecutionResult,
        message: &str,
        _context: &ExecutionContext,
        cfg: &ExecutionConfig,
    ) {
        warn!(node_id = id.as_str(), error = message, "node failed");
        self.results.insert(id.clone(), result);
        self.statuses.insert(id.clone(), NodeStatus::Error);
        cfg.hooks.fire_node_error(&id, message);
        self.workflow_error.get_or_insert_with(|| message.to_string());

        if cfg.stops_on_error() {
            self.mark_downstream_skipped(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Stateless orchestrator for workflow runs.
///
/// All per-run state is local to `run`, so a single runner can drive any
/// number of concurrent runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowRunner;

impl WorkflowRunner {
    pub fn new() -> Self {
        Self
    }

    /// Execute a workflow against the given context and configuration.
    ///
    /// Per-node failures are recorded in the returned maps; the only
    /// fatal errors are structural (duplicate IDs) or a cyclic graph, in
    /// which case no executor ever runs.
    pub async fn run(
        &self,
        workflow: &Workflow,
        context: &ExecutionContext,
        cfg: &ExecutionConfig,
    ) -> Result<WorkflowResult, WorkflowRunError> {
        validate_workflow(workflow)?;
        let waves = build_execution_plan(workflow)?;

        let execution_id = cfg
            .workflow_execution_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let user_id = cfg.user_id.clone().unwrap_or_default();

        let node_map: HashMap<&str, &WorkflowNode> = workflow
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n))
            .collect();

        let semaphore = cfg
            .max_parallel
            .map(|max| Arc::new(Semaphore::new(max.max(1))));

        let mut state = RunState::new(workflow);

        info!(
            execution_id = execution_id.as_str(),
            nodes = workflow.nodes.len(),
            waves = waves.len(),
            "starting workflow run"
        );

        let drive = self.drive_waves(
            &waves,
            &node_map,
            &mut state,
            context,
            cfg,
            &execution_id,
            &user_id,
            semaphore,
        );

        match cfg.workflow_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, drive).await.is_err() {
                    warn!(
                        execution_id = execution_id.as_str(),
                        timeout_ms = limit.as_millis() as u64,
                        "workflow run timed out"
                    );
                    state.workflow_error.get_or_insert_with(|| {
                        format!("workflow timed out after {}ms", limit.as_millis())
                    });
                }
            }
            None => drive.await,
        }

        // Finality: anything still idle or running (timeout cut-off) reads
        // as skipped.
        for status in state.statuses.values_mut() {
            if matches!(*status, NodeStatus::Idle | NodeStatus::Running) {
                *status = NodeStatus::Skipped;
            }
        }

        let success = state.workflow_error.is_none()
            && state
                .statuses
                .values()
                .all(|s| matches!(s, NodeStatus::Success | NodeStatus::Skipped));

        info!(
            execution_id = execution_id.as_str(),
            success,
            completed = state
                .statuses
                .values()
                .filter(|s| matches!(s, NodeStatus::Success))
                .count(),
            "workflow run finished"
        );

        Ok(WorkflowResult {
            success,
            results: state.results,
            statuses: state.statuses,
            error: state.workflow_error,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_waves(
        &self,
        waves: &[Vec<String>],
        node_map: &HashMap<&str, &WorkflowNode>,
        state: &mut RunState,
        context: &ExecutionContext,
        cfg: &ExecutionConfig,
        execution_id: &str,
        user_id: &str,
        semaphore: Option<Arc<Semaphore>>,
    ) {
        for (wave_idx, wave) in waves.iter().enumerate() {
            debug!(
                execution_id,
                wave = wave_idx,
                nodes = wave.len(),
                "processing wave"
            );

            let mut join_set: JoinSet<(String, Result<NodeExecutionResult, NodeExecutorError>)> =
                JoinSet::new();
            let mut launched: Vec<String> = Vec::new();

            for node_id in wave {
                if state.skipped.contains(node_id) {
                    state.statuses.insert(node_id.clone(), NodeStatus::Skipped);
                    continue;
                }
                // No new work is launched after cancellation.
                if cfg.signal.as_ref().is_some_and(|s| s.is_cancelled()) {
                    state.statuses.insert(node_id.clone(), NodeStatus::Skipped);
                    continue;
                }

                let Some(node) = node_map.get(node_id.as_str()) else {
                    continue;
                };

                state.statuses.insert(node_id.clone(), NodeStatus::Running);
                cfg.hooks.fire_node_start(node_id, &node.type_id);

                // Input resolution happens at launch, before any wave
                // member has written its output: a node's resolved input
                // is a function of the context at wave start.
                let resolved_input = context.interpolate_object(&node.input);
                let node_ctx = context.to_node_context(user_id, execution_id);
                let run_cfg = cfg.node_run_config(&node.type_id);
                let definition = Arc::clone(&node.node);
                let id = node_id.clone();

                let permit = match &semaphore {
                    Some(sem) => Arc::clone(sem).acquire_owned().await.ok(),
                    None => None,
                };

                launched.push(id.clone());
                join_set.spawn(async move {
                    let _permit = permit;
                    let outcome = execute_node(&definition, resolved_input, &node_ctx, &run_cfg).await;
                    (id, outcome)
                });
            }

            // Completion loop: the only writer of the context during a
            // wave, so output merging needs no locking beyond the map's.
            while let Some(settled) = join_set.join_next().await {
                match settled {
                    Ok((id, outcome)) => state.integrate(id, outcome, context, cfg),
                    Err(join_error) => {
                        error!(error = %join_error, "node task failed to settle");
                        state
                            .workflow_error
                            .get_or_insert_with(|| format!("node task failed: {join_error}"));
                    }
                }
            }

            // A task that died without settling (panic at the runtime
            // level) must still leave a final status behind.
            for id in launched {
                if state.statuses.get(&id) == Some(&NodeStatus::Running) {
                    state.statuses.insert(id.clone(), NodeStatus::Error);
                    state
                        .results
                        .insert(id, NodeExecutionResult::failure("node task failed to settle"));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    use flowtide_types::node::NodeCategory;
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;

    use crate::config::{ExecutionHooks, NodeOverrides, RetryPolicy};
    use crate::definition::{FnExecutor, NodeDefinition};
    use crate::schema::Schema;
    use crate::workflow::{Edge, WorkflowNode};

    fn passthrough(type_id: &str, output: Value) -> Arc<NodeDefinition> {
        Arc::new(NodeDefinition::new(
            type_id,
            type_id,
            "test node",
            NodeCategory::Action,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(move |_input, _ctx| {
                let output = output.clone();
                async move { Ok(NodeExecutionResult::success(output)) }
            }),
        ))
    }

    fn failing(type_id: &str, message: &str) -> Arc<NodeDefinition> {
        let message = message.to_string();
        Arc::new(NodeDefinition::new(
            type_id,
            type_id,
            "failing test node",
            NodeCategory::Action,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(move |_input, _ctx| {
                let message = message.clone();
                async move { Ok(NodeExecutionResult::failure(message)) }
            }),
        ))
    }

    fn linear(ids: &[&str]) -> Workflow {
        let nodes = ids
            .iter()
            .map(|id| {
                WorkflowNode::new(
                    *id,
                    passthrough(&format!("test.{id}"), json!({ "from": *id })),
                    json!({}),
                )
            })
            .collect();
        let edges = ids
            .windows(2)
            .map(|pair| Edge::new(pair[0], pair[1]))
            .collect();
        Workflow::new(ids.first().copied().unwrap_or(""), nodes, edges)
    }

    async fn run(workflow: &Workflow, cfg: &ExecutionConfig) -> WorkflowResult {
        WorkflowRunner::new()
            .run(workflow, &ExecutionContext::new(), cfg)
            .await
            .expect("run should not fail structurally")
    }

    // -----------------------------------------------------------------------
    // Boundary behaviors
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_empty_workflow_succeeds_with_empty_maps() {
        let wf = Workflow::new("", vec![], vec![]);
        let result = run(&wf, &ExecutionConfig::new()).await;
        assert!(result.success);
        assert!(result.results.is_empty());
        assert!(result.statuses.is_empty());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_single_node_success() {
        let wf = linear(&["only"]);
        let result = run(&wf, &ExecutionConfig::new()).await;
        assert!(result.success);
        assert_eq!(result.statuses["only"], NodeStatus::Success);
        assert_eq!(result.results["only"].output, Some(json!({ "from": "only" })));
    }

    #[tokio::test]
    async fn test_statuses_are_final() {
        let wf = linear(&["a", "b", "c"]);
        let result = run(&wf, &ExecutionConfig::new()).await;
        for status in result.statuses.values() {
            assert!(
                !matches!(status, NodeStatus::Idle | NodeStatus::Running),
                "no idle/running in a completed run"
            );
        }
    }

    #[tokio::test]
    async fn test_disconnected_components_both_execute() {
        let nodes = vec![
            WorkflowNode::new("a", passthrough("t.a", json!({})), json!({})),
            WorkflowNode::new("b", passthrough("t.b", json!({})), json!({})),
            WorkflowNode::new("x", passthrough("t.x", json!({})), json!({})),
            WorkflowNode::new("y", passthrough("t.y", json!({})), json!({})),
        ];
        let edges = vec![Edge::new("a", "b"), Edge::new("x", "y")];
        let wf = Workflow::new("a", nodes, edges);

        let result = run(&wf, &ExecutionConfig::new()).await;
        assert!(result.success);
        assert_eq!(result.statuses.len(), 4);
        assert!(result.statuses.values().all(|s| *s == NodeStatus::Success));
    }

    // -----------------------------------------------------------------------
    // Structural fatals
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_cycle_runs_no_executor() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = Arc::clone(&calls);
        let counting = Arc::new(NodeDefinition::new(
            "test.counting",
            "Counting",
            "",
            NodeCategory::Action,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(move |_input, _ctx| {
                let calls = Arc::clone(&calls_inner);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(NodeExecutionResult::success(json!({})))
                }
            }),
        ));

        let nodes = vec![
            WorkflowNode::new("a", Arc::clone(&counting), json!({})),
            WorkflowNode::new("b", counting, json!({})),
        ];
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "a")];
        let wf = Workflow::new("a", nodes, edges);

        let err = WorkflowRunner::new()
            .run(&wf, &ExecutionContext::new(), &ExecutionConfig::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowRunError::Plan(PlanError::CycleDetected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "no executor ever invoked");
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let nodes = vec![
            WorkflowNode::new("dup", passthrough("t.a", json!({})), json!({})),
            WorkflowNode::new("dup", passthrough("t.b", json!({})), json!({})),
        ];
        let wf = Workflow::new("dup", nodes, vec![]);

        let err = WorkflowRunner::new()
            .run(&wf, &ExecutionContext::new(), &ExecutionConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowRunError::Invalid(WorkflowError::DuplicateNodeId(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Failure propagation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_failure_skips_downstream_by_default() {
        let nodes = vec![
            WorkflowNode::new("a", passthrough("t.a", json!({})), json!({})),
            WorkflowNode::new("fail", failing("t.fail", "midway failure"), json!({})),
            WorkflowNode::new("after", passthrough("t.after", json!({})), json!({})),
        ];
        let edges = vec![Edge::new("a", "fail"), Edge::new("fail", "after")];
        let wf = Workflow::new("a", nodes, edges);

        let result = run(&wf, &ExecutionConfig::new()).await;
        assert!(!result.success);
        assert_eq!(result.statuses["a"], NodeStatus::Success);
        assert_eq!(result.statuses["fail"], NodeStatus::Error);
        assert_eq!(result.statuses["after"], NodeStatus::Skipped);
        assert!(result.error.unwrap().contains("midway failure"));
        assert!(!result.results.contains_key("after"), "skipped nodes have no result");
    }

    #[tokio::test]
    async fn test_skip_propagation_is_transitive() {
        let nodes = vec![
            WorkflowNode::new("fail", failing("t.fail", "boom"), json!({})),
            WorkflowNode::new("v", passthrough("t.v", json!({})), json!({})),
            WorkflowNode::new("w", passthrough("t.w", json!({})), json!({})),
        ];
        let edges = vec![Edge::new("fail", "v"), Edge::new("v", "w")];
        let wf = Workflow::new("fail", nodes, edges);

        let result = run(&wf, &ExecutionConfig::new()).await;
        assert_eq!(result.statuses["v"], NodeStatus::Skipped);
        assert_eq!(result.statuses["w"], NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_stop_on_error_false_keeps_running() {
        let nodes = vec![
            WorkflowNode::new("fail", failing("t.fail", "boom"), json!({})),
            WorkflowNode::new("after", passthrough("t.after", json!({})), json!({})),
        ];
        let edges = vec![Edge::new("fail", "after")];
        let wf = Workflow::new("fail", nodes, edges);

        let cfg = ExecutionConfig::new().with_stop_on_error(false);
        let result = run(&wf, &cfg).await;

        assert!(!result.success, "a failed node still fails the workflow");
        assert_eq!(result.statuses["after"], NodeStatus::Success);
    }

    #[tokio::test]
    async fn test_peer_failure_does_not_skip_unrelated_branch() {
        let nodes = vec![
            WorkflowNode::new("fail", failing("t.fail", "boom"), json!({})),
            WorkflowNode::new("peer", passthrough("t.peer", json!({})), json!({})),
        ];
        let wf = Workflow::new("fail", nodes, vec![]);

        let result = run(&wf, &ExecutionConfig::new()).await;
        assert_eq!(result.statuses["peer"], NodeStatus::Success);
        assert_eq!(result.statuses["fail"], NodeStatus::Error);
    }

    // -----------------------------------------------------------------------
    // Conditional branching
    // -----------------------------------------------------------------------

    fn branching_workflow(chosen: &str) -> Workflow {
        let chosen = chosen.to_string();
        let check = Arc::new(NodeDefinition::new(
            "test.check",
            "Check",
            "Chooses a branch",
            NodeCategory::Logic,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(move |_input, _ctx| {
                let chosen = chosen.clone();
                async move {
                    Ok(NodeExecutionResult::success(json!({ "checked": true }))
                        .with_next_node(chosen))
                }
            }),
        ));

        let nodes = vec![
            WorkflowNode::new("check", check, json!({})),
            WorkflowNode::new("yes-end", passthrough("t.yes", json!({ "took": "yes" })), json!({})),
            WorkflowNode::new("no-end", passthrough("t.no", json!({ "took": "no" })), json!({})),
        ];
        let edges = vec![
            Edge::new("check", "yes-end").with_condition("yes-end"),
            Edge::new("check", "no-end").with_condition("no-end"),
        ];
        Workflow::new("check", nodes, edges)
    }

    #[tokio::test]
    async fn test_branch_selection_skips_other_branch() {
        let result = run(&branching_workflow("yes-end"), &ExecutionConfig::new()).await;
        assert!(result.success);
        assert_eq!(result.statuses["check"], NodeStatus::Success);
        assert_eq!(result.statuses["yes-end"], NodeStatus::Success);
        assert_eq!(result.statuses["no-end"], NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_branch_skip_is_transitive() {
        let mut wf = branching_workflow("yes-end");
        wf.nodes.push(WorkflowNode::new(
            "no-followup",
            passthrough("t.nf", json!({})),
            json!({}),
        ));
        wf.edges.push(Edge::new("no-end", "no-followup"));

        let result = run(&wf, &ExecutionConfig::new()).await;
        assert_eq!(result.statuses["no-end"], NodeStatus::Skipped);
        assert_eq!(result.statuses["no-followup"], NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_unconditioned_edge_always_followed() {
        let mut wf = branching_workflow("yes-end");
        wf.nodes.push(WorkflowNode::new(
            "always",
            passthrough("t.always", json!({})),
            json!({}),
        ));
        // default/else edge without a condition
        wf.edges.push(Edge::new("check", "always"));

        let result = run(&wf, &ExecutionConfig::new()).await;
        assert_eq!(result.statuses["always"], NodeStatus::Success);
    }

    // -----------------------------------------------------------------------
    // Context plumbing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_outputs_visible_to_later_waves() {
        let reader = Arc::new(NodeDefinition::new(
            "test.reader",
            "Reader",
            "Echoes its interpolated input",
            NodeCategory::Transform,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(|input, _ctx| async move {
                Ok(NodeExecutionResult::success(input))
            }),
        ));

        let nodes = vec![
            WorkflowNode::new("a", passthrough("t.a", json!({ "value": "from-A" })), json!({})),
            WorkflowNode::new(
                "b",
                reader,
                json!({ "upstream": "{{ a.value }}", "bare": "{{ value }}" }),
            ),
        ];
        let wf = Workflow::new("a", nodes, vec![Edge::new("a", "b")]);

        let result = run(&wf, &ExecutionConfig::new()).await;
        let output = result.results["b"].output.clone().unwrap();
        assert_eq!(output["upstream"], json!("from-A"));
        assert_eq!(output["bare"], json!("from-A"));
    }

    #[tokio::test]
    async fn test_intra_wave_peers_keep_id_keyed_outputs() {
        let ctx = ExecutionContext::new();
        let nodes = vec![
            WorkflowNode::new("a", passthrough("t.a", json!({ "shared": "from-a" })), json!({})),
            WorkflowNode::new("b", passthrough("t.b", json!({ "shared": "from-b" })), json!({})),
        ];
        let wf = Workflow::new("a", nodes, vec![]);

        let result = WorkflowRunner::new()
            .run(&wf, &ctx, &ExecutionConfig::new())
            .await
            .unwrap();

        assert!(result.success);
        // the top-level merge of "shared" is racey by design; the
        // id-keyed copies are always deterministic
        assert_eq!(ctx.get_node_output("a"), Some(json!({ "shared": "from-a" })));
        assert_eq!(ctx.get_node_output("b"), Some(json!({ "shared": "from-b" })));
        let winner = ctx.get_variable("shared").unwrap();
        assert!(winner == json!("from-a") || winner == json!("from-b"));
    }

    #[tokio::test]
    async fn test_node_context_carries_user_and_execution_ids() {
        let seen: Arc<std::sync::Mutex<Vec<(String, String)>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_inner = Arc::clone(&seen);
        let witness = Arc::new(NodeDefinition::new(
            "test.witness",
            "Witness",
            "",
            NodeCategory::Action,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(move |_input, ctx| {
                let seen = Arc::clone(&seen_inner);
                async move {
                    seen.lock()
                        .unwrap()
                        .push((ctx.user_id.clone(), ctx.workflow_execution_id.clone()));
                    Ok(NodeExecutionResult::success(json!({})))
                }
            }),
        ));

        let wf = Workflow::new(
            "w",
            vec![WorkflowNode::new("w", witness, json!({}))],
            vec![],
        );
        let cfg = ExecutionConfig::new()
            .with_user_id("user-42")
            .with_execution_id("exec-7");
        run(&wf, &cfg).await;

        let calls = seen.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("user-42".to_string(), "exec-7".to_string())]);
    }

    // -----------------------------------------------------------------------
    // Per-type configuration
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_node_config_overrides_retry_for_one_type() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = Arc::clone(&calls);
        let flaky = Arc::new(NodeDefinition::new(
            "test.flaky",
            "Flaky",
            "",
            NodeCategory::Action,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(move |_input, _ctx| {
                let calls = Arc::clone(&calls_inner);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(NodeExecutionResult::failure("always fails"))
                }
            }),
        ));

        let wf = Workflow::new(
            "f",
            vec![WorkflowNode::new("f", flaky, json!({}))],
            vec![],
        );
        // workflow level: no retry; the type override grants 3 attempts
        let cfg = ExecutionConfig::new().with_node_override(
            "test.flaky",
            NodeOverrides {
                retry: Some(RetryPolicy::new(3)),
                ..Default::default()
            },
        );

        let result = run(&wf, &cfg).await;
        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    // -----------------------------------------------------------------------
    // Cancellation and timeouts
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_pre_cancelled_signal_skips_everything() {
        let signal = CancellationToken::new();
        signal.cancel();

        let wf = linear(&["a", "b"]);
        let cfg = ExecutionConfig::new().with_signal(signal);
        let result = run(&wf, &cfg).await;

        assert_eq!(result.statuses["a"], NodeStatus::Skipped);
        assert_eq!(result.statuses["b"], NodeStatus::Skipped);
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_mid_run_skips_later_waves() {
        let signal = CancellationToken::new();
        let signal_inner = signal.clone();
        let canceller = Arc::new(NodeDefinition::new(
            "test.canceller",
            "Canceller",
            "Cancels the run from inside wave one",
            NodeCategory::Action,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(move |_input, _ctx| {
                let signal = signal_inner.clone();
                async move {
                    signal.cancel();
                    Ok(NodeExecutionResult::success(json!({})))
                }
            }),
        ));

        let nodes = vec![
            WorkflowNode::new("first", canceller, json!({})),
            WorkflowNode::new("second", passthrough("t.second", json!({})), json!({})),
        ];
        let wf = Workflow::new("first", nodes, vec![Edge::new("first", "second")]);

        let cfg = ExecutionConfig::new().with_signal(signal);
        let result = run(&wf, &cfg).await;

        assert_eq!(result.statuses["first"], NodeStatus::Success);
        assert_eq!(result.statuses["second"], NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_workflow_timeout_cuts_the_run_short() {
        let slow = Arc::new(NodeDefinition::new(
            "test.slow",
            "Slow",
            "",
            NodeCategory::Action,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(|_input, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(NodeExecutionResult::success(json!({})))
            }),
        ));

        let nodes = vec![
            WorkflowNode::new("slow", slow, json!({})),
            WorkflowNode::new("never", passthrough("t.never", json!({})), json!({})),
        ];
        let wf = Workflow::new("slow", nodes, vec![Edge::new("slow", "never")]);

        let cfg = ExecutionConfig::new().with_workflow_timeout(Duration::from_millis(50));
        let result = run(&wf, &cfg).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(result.statuses["slow"], NodeStatus::Skipped);
        assert_eq!(result.statuses["never"], NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_wave_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let active_inner = Arc::clone(&active);
        let peak_inner = Arc::clone(&peak);

        let gauge = Arc::new(NodeDefinition::new(
            "test.gauge",
            "Gauge",
            "Tracks peak concurrency",
            NodeCategory::Action,
            Schema::any(),
            Schema::any(),
            FnExecutor::shared(move |_input, _ctx| {
                let active = Arc::clone(&active_inner);
                let peak = Arc::clone(&peak_inner);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(NodeExecutionResult::success(json!({})))
                }
            }),
        ));

        let nodes = (0..6)
            .map(|i| WorkflowNode::new(format!("n{i}"), Arc::clone(&gauge), json!({})))
            .collect();
        let wf = Workflow::new("n0", nodes, vec![]);

        let cfg = ExecutionConfig::new().with_max_parallel(2);
        let result = run(&wf, &cfg).await;

        assert!(result.success);
        assert!(
            peak.load(Ordering::SeqCst) <= 2,
            "peak concurrency {} exceeded the configured bound",
            peak.load(Ordering::SeqCst)
        );
    }

    // -----------------------------------------------------------------------
    // Observer hooks
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_hooks_fire_across_the_lifecycle() {
        let events: Arc<std::sync::Mutex<Vec<String>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));

        let starts = Arc::clone(&events);
        let completes = Arc::clone(&events);
        let errors = Arc::clone(&events);
        let hooks = ExecutionHooks {
            on_node_start: Some(Arc::new(move |id, type_id| {
                starts.lock().unwrap().push(format!("start:{id}:{type_id}"));
            })),
            on_node_complete: Some(Arc::new(move |id, _result| {
                completes.lock().unwrap().push(format!("complete:{id}"));
            })),
            on_node_error: Some(Arc::new(move |id, error| {
                errors.lock().unwrap().push(format!("error:{id}:{error}"));
            })),
            on_retry: None,
        };

        let nodes = vec![
            WorkflowNode::new("ok", passthrough("t.ok", json!({})), json!({})),
            WorkflowNode::new("boom", failing("t.boom", "exploded"), json!({})),
        ];
        let wf = Workflow::new("ok", nodes, vec![Edge::new("ok", "boom")]);

        run(&wf, &ExecutionConfig::new().with_hooks(hooks)).await;

        let log = events.lock().unwrap();
        assert!(log.contains(&"start:ok:t.ok".to_string()));
        assert!(log.contains(&"complete:ok".to_string()));
        assert!(log.contains(&"start:boom:t.boom".to_string()));
        assert!(log.contains(&"error:boom:exploded".to_string()));
    }

    #[tokio::test]
    async fn test_panicking_hook_does_not_break_the_run() {
        let hooks = ExecutionHooks {
            on_node_complete: Some(Arc::new(|_, _| panic!("observer bug"))),
            ..Default::default()
        };
        let wf = linear(&["a", "b"]);
        let result = run(&wf, &ExecutionConfig::new().with_hooks(hooks)).await;
        assert!(result.success);
    }

    // -----------------------------------------------------------------------
    // Determinism
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_repeat_runs_agree_on_statuses_and_results() {
        let wf = linear(&["a", "b", "c"]);
        let first = run(&wf, &ExecutionConfig::new()).await;
        let second = run(&wf, &ExecutionConfig::new()).await;
        assert_eq!(first.statuses, second.statuses);
        assert_eq!(first.results, second.results);
    }
}
