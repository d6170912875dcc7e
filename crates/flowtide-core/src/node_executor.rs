//! Single-node execution: validate, consult the cache, then run the
//! executor under the retry/timeout/cancellation policy.
//!
//! Timeouts and aborts surface as in-band failure results; the only
//! out-of-band error is input validation, which means the executor never
//! ran at all.

use std::panic::AssertUnwindSafe;

use flowtide_types::node::NodeExecutionResult;
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{NodeRunConfig, fire_retry_hook};
use crate::context::NodeContext;
use crate::definition::NodeDefinition;
use crate::schema::SchemaError;

/// Error message for a cancelled execution.
pub const ABORTED_ERROR: &str = "Execution aborted";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Out-of-band failures from `execute_node`.
#[derive(Debug, Error)]
pub enum NodeExecutorError {
    /// The raw input did not validate against the node's input schema.
    #[error("input validation failed for node type '{type_id}': {source}")]
    Validation {
        type_id: String,
        #[source]
        source: SchemaError,
    },
}

// ---------------------------------------------------------------------------
// execute_node
// ---------------------------------------------------------------------------

/// Execute one node under the given configuration.
///
/// Pipeline: validate the raw input, check the cache (hits bypass the
/// executor entirely), then drive the retry loop. Successful results are
/// written back to the cache; failures never are.
pub async fn execute_node(
    definition: &NodeDefinition,
    raw_input: Value,
    ctx: &NodeContext,
    cfg: &NodeRunConfig,
) -> Result<NodeExecutionResult, NodeExecutorError> {
    let validated = definition
        .input_schema
        .validate(&raw_input)
        .map_err(|source| NodeExecutorError::Validation {
            type_id: definition.type_id.clone(),
            source,
        })?;

    let cache = cfg.cache.as_ref().filter(|c| c.enabled);
    let cache_key = cache.map(|c| c.key_for(&validated));

    if let (Some(policy), Some(key)) = (cache, cache_key.as_deref()) {
        if let Some(hit) = policy.store.get(key).await {
            debug!(type_id = definition.type_id.as_str(), "cache hit, skipping execution");
            return Ok(hit);
        }
    }

    let result = run_with_retry(definition, validated, ctx, cfg).await;

    if result.success {
        if let (Some(policy), Some(key)) = (cache, cache_key.as_deref()) {
            policy.store.set(key, result.clone(), policy.ttl).await;
        }
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// Retry loop
// ---------------------------------------------------------------------------

async fn run_with_retry(
    definition: &NodeDefinition,
    input: Value,
    ctx: &NodeContext,
    cfg: &NodeRunConfig,
) -> NodeExecutionResult {
    let policy = cfg.retry.clone().unwrap_or_default();
    let max_attempts = policy.max_attempts.max(1);

    let mut attempt = 1;
    loop {
        if cfg.signal.as_ref().is_some_and(|s| s.is_cancelled()) {
            return NodeExecutionResult::failure(ABORTED_ERROR);
        }

        let result = run_attempt(definition, input.clone(), ctx, cfg).await;
        if result.success || attempt >= max_attempts {
            return result;
        }

        let error = result.error.clone().unwrap_or_default();
        if let Some(predicate) = &policy.retry_on {
            if !predicate(&error) {
                return result;
            }
        }

        fire_retry_hook(&cfg.on_retry, attempt, &error);
        debug!(
            type_id = definition.type_id.as_str(),
            attempt,
            max_attempts,
            error = error.as_str(),
            "node attempt failed, retrying"
        );

        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

/// One attempt: the executor raced against the per-attempt timeout and
/// the cancellation signal. The engine cannot interrupt an executor that
/// ignores the signal; losing the race merely unblocks the caller and the
/// straggler's eventual output is discarded.
async fn run_attempt(
    definition: &NodeDefinition,
    input: Value,
    ctx: &NodeContext,
    cfg: &NodeRunConfig,
) -> NodeExecutionResult {
    let executor = definition.executor();
    let work = async move {
        match AssertUnwindSafe(executor.execute(input, ctx)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => NodeExecutionResult::failure(error.to_string()),
            Err(panic) => NodeExecutionResult::failure(panic_message(&panic)),
        }
    };

    let raced = async {
        match &cfg.signal {
            Some(signal) => {
                tokio::select! {
                    _ = signal.cancelled() => NodeExecutionResult::failure(ABORTED_ERROR),
                    result = work => result,
                }
            }
            None => work.await,
        }
    };

    match cfg.timeout {
        Some(limit) => match tokio::time::timeout(limit, raced).await {
            Ok(result) => result,
            Err(_) => NodeExecutionResult::failure(format!(
                "Execution timed out after {}ms",
                limit.as_millis()
            )),
        },
        None => raced.await,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "executor panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
