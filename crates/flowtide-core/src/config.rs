//! Execution configuration: retry, cache, timeout, cancellation, hooks.
//!
//! `ExecutionConfig` is the workflow-level configuration; per-type entries
//! in `node_config` shallow-override the five per-node knobs (timeout,
//! retry, cache, signal, on_retry). `NodeRunConfig` is the merged view a
//! single node executes under.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use flowtide_types::node::NodeExecutionResult;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Predicate deciding whether a given error message warrants a retry.
pub type RetryPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Per-node retry policy with exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (1 = no retries).
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub backoff: Duration,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on a single delay; `None` means unbounded.
    pub max_backoff: Option<Duration>,
    /// Absent means "retry any error".
    pub retry_on: Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
            backoff_multiplier: 2.0,
            max_backoff: None,
            retry_on: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = Some(max);
        self
    }

    pub fn with_retry_on(mut self, predicate: RetryPredicate) -> Self {
        self.retry_on = Some(predicate);
        self
    }

    /// Delay to sleep after the given failed attempt (1-based):
    /// `min(backoff * multiplier^(attempt-1), max_backoff)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let secs = self.backoff.as_secs_f64() * factor;
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_backoff {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_backoff", &self.max_backoff)
            .field("retry_on", &self.retry_on.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Cache policy
// ---------------------------------------------------------------------------

/// Custom cache key derivation from the validated input.
pub type CacheKeyFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Per-node result caching policy.
#[derive(Clone)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Duration,
    /// Custom key function; defaults to canonical JSON of the validated
    /// input (serde_json object keys are sorted, so the compact encoding
    /// is already stable).
    pub key_fn: Option<CacheKeyFn>,
    pub store: Arc<dyn CacheStore>,
}

impl CachePolicy {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            enabled: true,
            ttl,
            key_fn: None,
            store,
        }
    }

    pub fn with_key_fn(mut self, key_fn: CacheKeyFn) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Derive the cache key for a validated input.
    pub fn key_for(&self, validated_input: &Value) -> String {
        match &self.key_fn {
            Some(key_fn) => key_fn(validated_input),
            None => serde_json::to_string(validated_input).unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePolicy")
            .field("enabled", &self.enabled)
            .field("ttl", &self.ttl)
            .field("key_fn", &self.key_fn.as_ref().map(|_| "<key fn>"))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Observer hooks
// ---------------------------------------------------------------------------

pub type NodeStartHook = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type NodeCompleteHook = Arc<dyn Fn(&str, &NodeExecutionResult) + Send + Sync>;
pub type NodeErrorHook = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type RetryHook = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Optional single-listener lifecycle hooks.
///
/// Hooks must not panic; if one does, the panic is caught and logged and
/// execution continues.
#[derive(Clone, Default)]
pub struct ExecutionHooks {
    /// `(node_id, type_id)` when a node starts running.
    pub on_node_start: Option<NodeStartHook>,
    /// `(node_id, result)` when a node completes successfully.
    pub on_node_complete: Option<NodeCompleteHook>,
    /// `(node_id, error)` when a node fails.
    pub on_node_error: Option<NodeErrorHook>,
    /// `(attempt, error)` before each retry sleep.
    pub on_retry: Option<RetryHook>,
}

impl ExecutionHooks {
    pub(crate) fn fire_node_start(&self, node_id: &str, type_id: &str) {
        if let Some(hook) = &self.on_node_start {
            guard_hook("on_node_start", || hook(node_id, type_id));
        }
    }

    pub(crate) fn fire_node_complete(&self, node_id: &str, result: &NodeExecutionResult) {
        if let Some(hook) = &self.on_node_complete {
            guard_hook("on_node_complete", || hook(node_id, result));
        }
    }

    pub(crate) fn fire_node_error(&self, node_id: &str, error: &str) {
        if let Some(hook) = &self.on_node_error {
            guard_hook("on_node_error", || hook(node_id, error));
        }
    }
}

/// Run a hook, swallowing panics so observers can never break a run.
pub(crate) fn guard_hook(name: &str, hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        tracing::warn!(hook = name, "observer hook panicked, continuing");
    }
}

pub(crate) fn fire_retry_hook(hook: &Option<RetryHook>, attempt: u32, error: &str) {
    if let Some(hook) = hook {
        guard_hook("on_retry", || hook(attempt, error));
    }
}

impl std::fmt::Debug for ExecutionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHooks")
            .field("on_node_start", &self.on_node_start.is_some())
            .field("on_node_complete", &self.on_node_complete.is_some())
            .field("on_node_error", &self.on_node_error.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Per-node run configuration
// ---------------------------------------------------------------------------

/// The merged configuration one node executes under.
#[derive(Clone, Default)]
pub struct NodeRunConfig {
    /// Per-attempt timeout; a retrying node may spend
    /// `max_attempts * timeout` plus backoffs in total.
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub cache: Option<CachePolicy>,
    pub signal: Option<CancellationToken>,
    pub on_retry: Option<RetryHook>,
}

impl std::fmt::Debug for NodeRunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRunConfig")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Per-type overrides of the five per-node knobs. A set field replaces
/// the workflow-level value wholesale.
#[derive(Clone, Default)]
pub struct NodeOverrides {
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub cache: Option<CachePolicy>,
    pub signal: Option<CancellationToken>,
    pub on_retry: Option<RetryHook>,
}

impl std::fmt::Debug for NodeOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeOverrides")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Workflow-level configuration
// ---------------------------------------------------------------------------

/// Configuration for a whole workflow run.
#[derive(Clone, Default)]
pub struct ExecutionConfig {
    /// Propagated into every node context (`""` when unset).
    pub user_id: Option<String>,
    /// Run identifier; minted from a UUIDv7 when unset.
    pub workflow_execution_id: Option<String>,
    /// Skip downstream nodes after a failure. Defaults to true.
    pub stop_on_error: Option<bool>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub cache: Option<CachePolicy>,
    pub signal: Option<CancellationToken>,
    /// Per-type overrides keyed by node `type_id`.
    pub node_config: HashMap<String, NodeOverrides>,
    pub hooks: ExecutionHooks,
    /// Cap on concurrently running nodes within a wave; `None` = one task
    /// per wave member.
    pub max_parallel: Option<usize>,
    /// Overall wall-clock bound for the run; `None` = unbounded.
    pub workflow_timeout: Option<Duration>,
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_execution_id = Some(id.into());
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = Some(stop);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_node_override(mut self, type_id: impl Into<String>, overrides: NodeOverrides) -> Self {
        self.node_config.insert(type_id.into(), overrides);
        self
    }

    pub fn with_hooks(mut self, hooks: ExecutionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = Some(max);
        self
    }

    pub fn with_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = Some(timeout);
        self
    }

    /// Whether a failure skips downstream descendants (default true).
    pub fn stops_on_error(&self) -> bool {
        self.stop_on_error.unwrap_or(true)
    }

    /// Merge the workflow-level knobs with a type's overrides.
    pub fn node_run_config(&self, type_id: &str) -> NodeRunConfig {
        let overrides = self.node_config.get(type_id);
        NodeRunConfig {
            timeout: overrides.and_then(|o| o.timeout).or(self.timeout),
            retry: overrides
                .and_then(|o| o.retry.clone())
                .or_else(|| self.retry.clone()),
            cache: overrides
                .and_then(|o| o.cache.clone())
                .or_else(|| self.cache.clone()),
            signal: overrides
                .and_then(|o| o.signal.clone())
                .or_else(|| self.signal.clone()),
            on_retry: overrides
                .and_then(|o| o.on_retry.clone())
                .or_else(|| self.hooks.on_retry.clone()),
        }
    }
}

impl std::fmt::Debug for ExecutionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionConfig")
            .field("user_id", &self.user_id)
            .field("stop_on_error", &self.stop_on_error)
            .field("timeout", &self.timeout)
            .field("max_parallel", &self.max_parallel)
            .field("workflow_timeout", &self.workflow_timeout)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
