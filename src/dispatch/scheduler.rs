use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{TaskRecord, TaskRecorder};
use crate::dispatch::state::{InstanceMap, Phase};
use crate::dispatch::task::{ActionResult, ActionStatus, ExecContext, RunningTask};
use crate::events::FlowEvent;
use crate::events::bus::EventBus;
use crate::provider::NodeProvider;

const DEFAULT_BUS_CAPACITY: usize = 128;

/// What a locked launch attempt decided to do. Resolved outside the lock.
enum LaunchStep {
    Dispatch(ExecContext),
    Complete,
    Cancelled(String),
    Wait,
}

/// Post-settlement action, decided under the instance lock.
enum Settled {
    Continue,
    Dormant { detail: Value },
    BranchFailed { error: String },
    /// Cancel-requested instance; `Some(reason)` when this was the last
    /// running entry and the terminal event is ours to emit.
    CancelDrained(Option<String>),
}

/// The dispatcher: owns the per-instance ready queues and running-task
/// registries and drives node executions to settlement.
///
/// Callers seed work with [`add_task`](Self::add_task) and kick the instance
/// with [`launch`](Self::launch). Every settlement re-invokes `launch`, so one
/// seed is enough to drain a whole branch. `launch` never awaits the node it
/// dispatches; concurrency is bounded only by how many branches are pending
/// settlement.
///
/// Cheap to clone; clones share the same instance map, bus and recorder.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    instances: InstanceMap,
    provider: Arc<dyn NodeProvider>,
    recorder: Arc<dyn TaskRecorder>,
    bus: EventBus,
}

impl Scheduler {
    pub fn new(provider: Arc<dyn NodeProvider>, recorder: Arc<dyn TaskRecorder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                instances: InstanceMap::new(),
                provider,
                recorder,
                bus: EventBus::new(DEFAULT_BUS_CAPACITY),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn recorder(&self) -> &Arc<dyn TaskRecorder> {
        &self.inner.recorder
    }

    /// Enqueues a ready node at the tail of the instance's FIFO queue.
    ///
    /// Node-id validity is not checked here; an unknown id fails at launch
    /// time through the provider and settles as a branch failure.
    pub fn add_task(&self, execution_id: &str, node_id: &str) {
        let state = self.inner.instances.get_or_create(execution_id);
        let mut st = state.lock().expect("instance lock poisoned");
        if st.phase != Phase::Active {
            warn!(execution_id, node_id, "add_task on cancelled instance ignored");
            return;
        }
        st.ready.push_back(node_id.to_string());
        debug!(execution_id, node_id, queued = st.ready.len(), "node enqueued");
    }

    /// Progresses the instance by one step: pops the ready head and dispatches
    /// it, or, if both the queue and the running registry are empty, declares
    /// the instance terminal.
    ///
    /// Returns as soon as the node execution is spawned. `last_node`/`last_task`
    /// only decorate the completion event for traceability.
    pub fn launch(&self, execution_id: &str, last_node: Option<String>, last_task: Option<Uuid>) {
        let Some(state) = self.inner.instances.get(execution_id) else {
            // Already terminal (event emitted on eviction) or never seeded.
            debug!(execution_id, "launch on unknown or finished instance");
            return;
        };

        let step = {
            let mut st = state.lock().expect("instance lock poisoned");
            match st.phase {
                Phase::Finished => LaunchStep::Wait,
                Phase::CancelRequested => {
                    if st.running.is_empty() {
                        st.phase = Phase::Finished;
                        LaunchStep::Cancelled(st.cancel_reason.clone().unwrap_or_default())
                    } else {
                        LaunchStep::Wait
                    }
                }
                Phase::Active => {
                    if let Some(node_id) = st.ready.pop_front() {
                        let task_id = Uuid::new_v4();
                        st.running.insert(
                            task_id,
                            RunningTask {
                                node_id: node_id.clone(),
                                task_id,
                                resumed_from: None,
                            },
                        );
                        LaunchStep::Dispatch(ExecContext {
                            execution_id: execution_id.to_string(),
                            node_id,
                            task_id,
                        })
                    } else if st.is_drained() {
                        // Terminal. Flipping the phase under the lock makes the
                        // emission exactly-once even if settlements race here.
                        st.phase = Phase::Finished;
                        LaunchStep::Complete
                    } else {
                        // In-flight branches will re-drive launch on settlement.
                        LaunchStep::Wait
                    }
                }
            }
        };

        match step {
            LaunchStep::Dispatch(ctx) => {
                debug!(
                    execution_id = %ctx.execution_id,
                    node_id = %ctx.node_id,
                    task_id = %ctx.task_id,
                    "launching node"
                );
                self.dispatch(ctx, None);
            }
            LaunchStep::Complete => {
                self.inner.instances.evict(execution_id);
                info!(execution_id, "execution instance completed");
                self.inner.bus.publish(FlowEvent::InstanceCompleted {
                    execution_id: execution_id.to_string(),
                    node_id: last_node,
                    task_id: last_task,
                });
            }
            LaunchStep::Cancelled(reason) => {
                self.inner.instances.evict(execution_id);
                info!(execution_id, %reason, "execution instance cancelled");
                self.inner.bus.publish(FlowEvent::InstanceCancelled {
                    execution_id: execution_id.to_string(),
                    reason,
                });
            }
            LaunchStep::Wait => {}
        }
    }

    /// Re-enters a dormant interrupted branch, bypassing the ready queue.
    ///
    /// A fresh task id is minted for the continuation; `task_id` is the
    /// interrupted attempt's id and is kept for traceability only. The
    /// continuation settles through the same path as a fresh execution, so a
    /// branch that suspends again emits another interruption event.
    pub fn resume(&self, execution_id: &str, node_id: &str, task_id: Uuid, input: Value) {
        let state = self.inner.instances.get_or_create(execution_id);
        let ctx = {
            let mut st = state.lock().expect("instance lock poisoned");
            if st.phase != Phase::Active {
                warn!(execution_id, node_id, "resume on cancelled instance ignored");
                return;
            }
            let continuation = Uuid::new_v4();
            st.running.insert(
                continuation,
                RunningTask {
                    node_id: node_id.to_string(),
                    task_id: continuation,
                    resumed_from: Some(task_id),
                },
            );
            ExecContext {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
                task_id: continuation,
            }
        };
        info!(
            execution_id,
            node_id,
            resumed_from = %task_id,
            task_id = %ctx.task_id,
            "resuming interrupted branch"
        );
        self.dispatch(ctx, Some(input));
    }

    /// Requests cancellation of an instance: evicts all ready entries and
    /// suppresses in-flight settlements. The instance-cancelled event is
    /// emitted once the last running entry drains (immediately if none).
    ///
    /// Cancellation is cooperative at settlement points; running node
    /// executions are not preempted.
    pub fn stop(&self, execution_id: &str, reason: &str) {
        let Some(state) = self.inner.instances.get(execution_id) else {
            warn!(execution_id, "stop on unknown or finished instance");
            return;
        };
        let emit_now = {
            let mut st = state.lock().expect("instance lock poisoned");
            if st.phase != Phase::Active {
                return;
            }
            st.ready.clear();
            st.cancel_reason = Some(reason.to_string());
            if st.running.is_empty() {
                st.phase = Phase::Finished;
                true
            } else {
                st.phase = Phase::CancelRequested;
                false
            }
        };
        if emit_now {
            self.inner.instances.evict(execution_id);
            info!(execution_id, reason, "execution instance cancelled");
            self.inner.bus.publish(FlowEvent::InstanceCancelled {
                execution_id: execution_id.to_string(),
                reason: reason.to_string(),
            });
        } else {
            info!(execution_id, reason, "cancel requested, draining running tasks");
        }
    }

    /// Fire-and-forget execution of one attempt. The spawned task resolves the
    /// handler, runs execute or resume, and funnels the outcome into `settle`.
    fn dispatch(&self, ctx: ExecContext, resume_input: Option<Value>) {
        let sched = self.clone();
        tokio::spawn(async move {
            let outcome = match sched.inner.provider.node(&ctx.node_id) {
                Ok(handler) => match resume_input {
                    None => handler.execute(&ctx).await,
                    Some(input) => handler.resume(&ctx, input).await,
                },
                Err(e) => Err(e),
            };
            sched.settle(ctx, outcome).await;
        });
    }

    /// The shared continuation for execute, resume and failure outcomes:
    /// enqueue outgoing targets, persist one task record, remove the running
    /// entry, then re-drive or park the branch depending on the status.
    ///
    /// Enqueue and deregistration happen under one instance lock so a racing
    /// launch can never observe an all-settled state while outgoing work is in
    /// transit between branches.
    async fn settle(&self, ctx: ExecContext, outcome: Result<ActionResult>) {
        let Some(state) = self.inner.instances.get(&ctx.execution_id) else {
            warn!(
                execution_id = %ctx.execution_id,
                task_id = %ctx.task_id,
                "settlement for evicted instance dropped"
            );
            return;
        };

        let (record, settled) = {
            let mut st = state.lock().expect("instance lock poisoned");
            st.running.remove(&ctx.task_id);

            if st.phase == Phase::CancelRequested {
                let reason = if st.running.is_empty() {
                    st.phase = Phase::Finished;
                    Some(st.cancel_reason.clone().unwrap_or_default())
                } else {
                    None
                };
                let node_type = match &outcome {
                    Ok(result) => result.node_type.clone(),
                    Err(_) => "unknown".to_string(),
                };
                let record = TaskRecord::new(&ctx, node_type, Value::Null)
                    .with_extra(ActionStatus::Cancelled, Value::Null);
                (record, Settled::CancelDrained(reason))
            } else {
                match outcome {
                    Ok(result) => match result.status {
                        ActionStatus::Completed => {
                            for target in &result.outgoing {
                                st.ready.push_back(target.clone());
                            }
                            let record =
                                TaskRecord::new(&ctx, result.node_type, result.properties);
                            (record, Settled::Continue)
                        }
                        ActionStatus::Interrupted => {
                            let record =
                                TaskRecord::new(&ctx, result.node_type, result.properties)
                                    .with_extra(
                                        ActionStatus::Interrupted,
                                        result.detail.clone(),
                                    );
                            (record, Settled::Dormant { detail: result.detail })
                        }
                        // Handlers settle as Completed or Interrupted; anything
                        // else is a contract violation and fails the branch.
                        other => {
                            let error = format!("handler returned terminal status {other:?}");
                            let record = TaskRecord::new(&ctx, result.node_type, Value::Null)
                                .with_extra(ActionStatus::Failed, json!({ "error": error }));
                            (record, Settled::BranchFailed { error })
                        }
                    },
                    Err(e) => {
                        let error = format!("{e:#}");
                        let record = TaskRecord::new(&ctx, "unknown".to_string(), Value::Null)
                            .with_extra(ActionStatus::Failed, json!({ "error": error }));
                        (record, Settled::BranchFailed { error })
                    }
                }
            }
        };

        if let Err(e) = self.inner.recorder.add_task(record).await {
            error!(
                execution_id = %ctx.execution_id,
                task_id = %ctx.task_id,
                error = ?e,
                "failed to persist task record"
            );
        }

        match settled {
            Settled::Continue => {
                self.launch(&ctx.execution_id, Some(ctx.node_id), Some(ctx.task_id));
            }
            Settled::Dormant { detail } => {
                // No launch: the branch stays dormant until an external resume.
                info!(
                    execution_id = %ctx.execution_id,
                    node_id = %ctx.node_id,
                    task_id = %ctx.task_id,
                    "branch interrupted"
                );
                self.inner.bus.publish(FlowEvent::InstanceInterrupted {
                    execution_id: ctx.execution_id.clone(),
                    node_id: ctx.node_id.clone(),
                    task_id: ctx.task_id,
                    detail,
                });
            }
            Settled::BranchFailed { error } => {
                error!(
                    execution_id = %ctx.execution_id,
                    node_id = %ctx.node_id,
                    task_id = %ctx.task_id,
                    error = %error,
                    "branch failed"
                );
                self.inner.bus.publish(FlowEvent::BranchFailed {
                    execution_id: ctx.execution_id.clone(),
                    node_id: ctx.node_id.clone(),
                    task_id: ctx.task_id,
                    error,
                });
                // Siblings still drive the instance; re-attempt so a lone
                // failing branch cannot wedge termination detection.
                self.launch(&ctx.execution_id, Some(ctx.node_id), Some(ctx.task_id));
            }
            Settled::CancelDrained(Some(reason)) => {
                self.inner.instances.evict(&ctx.execution_id);
                info!(execution_id = %ctx.execution_id, %reason, "execution instance cancelled");
                self.inner.bus.publish(FlowEvent::InstanceCancelled {
                    execution_id: ctx.execution_id.clone(),
                    reason,
                });
            }
            Settled::CancelDrained(None) => {}
        }
    }
}
