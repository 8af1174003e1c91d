pub mod bus;

use serde_json::Value;
use uuid::Uuid;

use crate::dispatch::task::ActionStatus;

pub use bus::EventBus;

/// Instance-level lifecycle events published on the [`EventBus`].
///
/// One bus serves every execution instance; subscribers filter on
/// `execution_id`. Completed/interrupted follow the dispatcher contract;
/// cancelled and branch-failed are the implementation-defined terminal and
/// failure notifications.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    InstanceCompleted {
        execution_id: String,
        /// Node/task that triggered the terminal launch attempt, when known.
        node_id: Option<String>,
        task_id: Option<Uuid>,
    },
    InstanceInterrupted {
        execution_id: String,
        node_id: String,
        task_id: Uuid,
        detail: Value,
    },
    InstanceCancelled {
        execution_id: String,
        reason: String,
    },
    BranchFailed {
        execution_id: String,
        node_id: String,
        task_id: Uuid,
        error: String,
    },
}

impl FlowEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            FlowEvent::InstanceCompleted { execution_id, .. }
            | FlowEvent::InstanceInterrupted { execution_id, .. }
            | FlowEvent::InstanceCancelled { execution_id, .. }
            | FlowEvent::BranchFailed { execution_id, .. } => execution_id,
        }
    }

    pub fn status(&self) -> ActionStatus {
        match self {
            FlowEvent::InstanceCompleted { .. } => ActionStatus::Completed,
            FlowEvent::InstanceInterrupted { .. } => ActionStatus::Interrupted,
            FlowEvent::InstanceCancelled { .. } => ActionStatus::Cancelled,
            FlowEvent::BranchFailed { .. } => ActionStatus::Failed,
        }
    }

    /// True for events that end the instance lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowEvent::InstanceCompleted { .. } | FlowEvent::InstanceCancelled { .. }
        )
    }
}
