use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use crate::dispatch::task::{ActionResult, ExecContext};

/// One node's business logic. Implementations may suspend arbitrarily long;
/// the dispatcher places no timeout on either operation.
#[async_trait]
pub trait NodeHandler: Send + Sync + Debug {
    async fn execute(&self, ctx: &ExecContext) -> Result<ActionResult>;

    /// Continuation of a previously interrupted attempt. `input` is the
    /// externally supplied resume payload. Nodes that never interrupt keep
    /// the default, which fails the branch.
    async fn resume(&self, ctx: &ExecContext, input: Value) -> Result<ActionResult> {
        let _ = input;
        Err(anyhow!("node {} does not support resume", ctx.node_id))
    }
}

/// Resolves node ids to handlers. Owned by the caller together with the graph
/// topology; the dispatcher only consumes it at launch/resume time. Lookup
/// failures settle as branch failures, they never panic the dispatcher.
pub trait NodeProvider: Send + Sync {
    fn node(&self, node_id: &str) -> Result<Arc<dyn NodeHandler>>;
}
