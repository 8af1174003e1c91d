use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dispatch::task::{ActionStatus, ExecContext};

/// Status and payload attached to non-completed settlements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordExtra {
    pub status: ActionStatus,
    #[serde(default)]
    pub detail: Value,
}

/// Audit projection of one settled task. Append-only: a resumed branch that
/// later completes produces a second record for the continuation task, never
/// an update to the interrupted one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub execution_id: String,
    pub task_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    /// Settlement time, unix milliseconds.
    pub timestamp_ms: u64,
    #[serde(default)]
    pub properties: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<RecordExtra>,
}

impl TaskRecord {
    pub fn new(ctx: &ExecContext, node_type: String, properties: Value) -> Self {
        Self {
            execution_id: ctx.execution_id.clone(),
            task_id: ctx.task_id,
            node_id: ctx.node_id.clone(),
            node_type,
            timestamp_ms: now_ms(),
            properties,
            extra: None,
        }
    }

    pub fn with_extra(mut self, status: ActionStatus, detail: Value) -> Self {
        self.extra = Some(RecordExtra { status, detail });
        self
    }

    /// Completed unless the extra says otherwise.
    pub fn status(&self) -> ActionStatus {
        self.extra
            .as_ref()
            .map(|e| e.status)
            .unwrap_or(ActionStatus::Completed)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Append-only store of task records: one entry per settlement, listable per
/// execution in insertion order and fetchable by task id.
#[async_trait]
pub trait TaskRecorder: Send + Sync {
    async fn add_task(&self, record: TaskRecord) -> Result<()>;
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>>;
    async fn execution_tasks(&self, execution_id: &str) -> Result<Vec<TaskRecord>>;
    async fn clear(&self) -> Result<()>;
}

/// In-memory recorder keyed per execution instance.
#[derive(Debug, Default)]
pub struct InMemoryTaskRecorder {
    // Map<ExecutionID, insertion-ordered records>
    by_execution: DashMap<String, Vec<TaskRecord>>,
    by_task: DashMap<Uuid, TaskRecord>,
}

impl InMemoryTaskRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRecorder for InMemoryTaskRecorder {
    async fn add_task(&self, record: TaskRecord) -> Result<()> {
        self.by_task.insert(record.task_id, record.clone());
        self.by_execution
            .entry(record.execution_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>> {
        Ok(self.by_task.get(&task_id).map(|r| r.value().clone()))
    }

    async fn execution_tasks(&self, execution_id: &str) -> Result<Vec<TaskRecord>> {
        Ok(self
            .by_execution
            .get(execution_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn clear(&self) -> Result<()> {
        self.by_execution.clear();
        self.by_task.clear();
        Ok(())
    }
}
