use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Terminal status of one node attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Completed,
    Interrupted,
    Failed,
    Cancelled,
}

/// Identity handed to a node handler for one attempt.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub execution_id: String,
    pub node_id: String,
    pub task_id: Uuid,
}

/// A launched, not-yet-settled unit of work inside one execution instance.
#[derive(Debug, Clone)]
pub struct RunningTask {
    pub node_id: String,
    pub task_id: Uuid,
    /// Set when this entry is the continuation of an interrupted task.
    pub resumed_from: Option<Uuid>,
}

/// Outcome of one node execution or resume attempt.
///
/// `outgoing` lists downstream node ids in enqueue order; empty for terminal
/// nodes. `detail` carries whatever the node needs to resume after an
/// interruption (opaque to the dispatcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub node_type: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub outgoing: Vec<String>,
    #[serde(default)]
    pub detail: Value,
}

impl ActionResult {
    pub fn completed(node_type: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Completed,
            node_type: node_type.into(),
            properties: Value::Null,
            outgoing: Vec::new(),
            detail: Value::Null,
        }
    }

    pub fn interrupted(node_type: impl Into<String>, detail: Value) -> Self {
        Self {
            status: ActionStatus::Interrupted,
            node_type: node_type.into(),
            properties: Value::Null,
            outgoing: Vec::new(),
            detail,
        }
    }

    pub fn with_outgoing(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outgoing = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}
