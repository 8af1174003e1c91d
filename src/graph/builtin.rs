use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::dispatch::task::{ActionResult, ExecContext};
use crate::graph::{GraphNode, HandlerKind};
use crate::provider::NodeHandler;

/// `task`: logs its `msg` param (if any) and completes with the node's
/// outgoing edges.
pub struct TaskKind;

impl HandlerKind for TaskKind {
    fn name(&self) -> &str {
        "task"
    }

    fn validate(&self, _node: &GraphNode) -> Result<()> {
        Ok(())
    }

    fn prepare(&self, node: &GraphNode) -> Result<Arc<dyn NodeHandler>> {
        Ok(Arc::new(TaskHandler {
            params: node.params.clone(),
            outgoing: node.outgoing.clone(),
        }))
    }
}

#[derive(Debug)]
struct TaskHandler {
    params: Value,
    outgoing: Vec<String>,
}

#[async_trait]
impl NodeHandler for TaskHandler {
    async fn execute(&self, ctx: &ExecContext) -> Result<ActionResult> {
        if let Some(msg) = self.params.get("msg").and_then(|v| v.as_str()) {
            info!(node_id = %ctx.node_id, "[TASK] {}", msg);
        }
        Ok(ActionResult::completed("task")
            .with_outgoing(self.outgoing.iter().cloned())
            .with_properties(self.params.clone()))
    }
}

/// `wait`: interrupts on first execution, carrying its params as the resume
/// detail; a later resume completes with the resume input as properties.
pub struct WaitKind;

impl HandlerKind for WaitKind {
    fn name(&self) -> &str {
        "wait"
    }

    fn validate(&self, _node: &GraphNode) -> Result<()> {
        Ok(())
    }

    fn prepare(&self, node: &GraphNode) -> Result<Arc<dyn NodeHandler>> {
        Ok(Arc::new(WaitHandler {
            params: node.params.clone(),
            outgoing: node.outgoing.clone(),
        }))
    }
}

#[derive(Debug)]
struct WaitHandler {
    params: Value,
    outgoing: Vec<String>,
}

#[async_trait]
impl NodeHandler for WaitHandler {
    async fn execute(&self, ctx: &ExecContext) -> Result<ActionResult> {
        info!(node_id = %ctx.node_id, "[WAIT] suspending until external resume");
        Ok(ActionResult::interrupted("wait", self.params.clone()))
    }

    async fn resume(&self, ctx: &ExecContext, input: Value) -> Result<ActionResult> {
        info!(node_id = %ctx.node_id, "[WAIT] resumed");
        Ok(ActionResult::completed("wait")
            .with_outgoing(self.outgoing.iter().cloned())
            .with_properties(input))
    }
}
