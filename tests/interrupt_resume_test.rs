use flowrun::audit::{InMemoryTaskRecorder, TaskRecorder};
use flowrun::dispatch::{ActionResult, ActionStatus, ExecContext, Scheduler};
use flowrun::events::FlowEvent;
use flowrun::provider::{NodeHandler, NodeProvider};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug)]
struct PlainHandler {
    outgoing: Vec<String>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NodeHandler for PlainHandler {
    async fn execute(&self, ctx: &ExecContext) -> Result<ActionResult> {
        self.log.lock().unwrap().push(ctx.node_id.clone());
        Ok(ActionResult::completed("plain").with_outgoing(self.outgoing.iter().cloned()))
    }
}

/// Interrupts on execute; resume completes with the configured outgoing edges
/// unless `interrupt_on_resume` forces a second suspension.
#[derive(Debug)]
struct GateHandler {
    outgoing: Vec<String>,
    detail: Value,
    interrupt_on_resume: bool,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NodeHandler for GateHandler {
    async fn execute(&self, ctx: &ExecContext) -> Result<ActionResult> {
        self.log.lock().unwrap().push(format!("{}:suspend", ctx.node_id));
        Ok(ActionResult::interrupted("gate", self.detail.clone()))
    }

    async fn resume(&self, ctx: &ExecContext, input: Value) -> Result<ActionResult> {
        if self.interrupt_on_resume {
            self.log.lock().unwrap().push(format!("{}:suspend-again", ctx.node_id));
            return Ok(ActionResult::interrupted("gate", self.detail.clone()));
        }
        self.log.lock().unwrap().push(format!("{}:resume", ctx.node_id));
        Ok(ActionResult::completed("gate")
            .with_outgoing(self.outgoing.iter().cloned())
            .with_properties(input))
    }
}

#[derive(Default)]
struct TestProvider {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl TestProvider {
    fn with(mut self, node_id: &str, handler: Arc<dyn NodeHandler>) -> Self {
        self.handlers.insert(node_id.to_string(), handler);
        self
    }
}

impl NodeProvider for TestProvider {
    fn node(&self, node_id: &str) -> Result<Arc<dyn NodeHandler>> {
        self.handlers
            .get(node_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown node: {}", node_id))
    }
}

async fn recv_event(rx: &mut broadcast::Receiver<FlowEvent>) -> Result<FlowEvent> {
    Ok(tokio::time::timeout(Duration::from_secs(2), rx.recv()).await??)
}

async fn recv_interruption(rx: &mut broadcast::Receiver<FlowEvent>) -> Result<(Uuid, Value)> {
    match recv_event(rx).await? {
        FlowEvent::InstanceInterrupted { task_id, detail, .. } => Ok((task_id, detail)),
        other => Err(anyhow!("expected interruption, got {:?}", other)),
    }
}

#[tokio::test]
async fn interruption_parks_branch_without_enqueueing_outgoing() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let provider = TestProvider::default()
        .with("A", Arc::new(PlainHandler { outgoing: vec!["B".into()], log: log.clone() }))
        .with(
            "B",
            Arc::new(GateHandler {
                outgoing: vec!["C".into()],
                detail: json!({"formId": 42}),
                interrupt_on_resume: false,
                log: log.clone(),
            }),
        )
        .with("C", Arc::new(PlainHandler { outgoing: vec![], log: log.clone() }));

    let recorder = Arc::new(InMemoryTaskRecorder::new());
    let scheduler = Scheduler::new(Arc::new(provider), recorder.clone());
    let mut events = scheduler.bus().subscribe();

    scheduler.add_task("ex-gate", "A");
    scheduler.launch("ex-gate", None, None);

    let (task_id, detail) = recv_interruption(&mut events).await?;
    assert_eq!(detail, json!({"formId": 42}));

    // No completion and no C: the branch is dormant, outgoing edges were not
    // enqueued.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert!(!log.lock().unwrap().iter().any(|e| e == "C"));

    let records = recorder.execution_tasks("ex-gate").await?;
    assert_eq!(records.len(), 2);
    let gate = recorder.get_task(task_id).await?.unwrap();
    assert_eq!(gate.status(), ActionStatus::Interrupted);
    assert_eq!(gate.extra.unwrap().detail, json!({"formId": 42}));
    Ok(())
}

#[tokio::test]
async fn resume_reenters_the_completion_pipeline() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let provider = TestProvider::default()
        .with(
            "B",
            Arc::new(GateHandler {
                outgoing: vec!["C".into()],
                detail: json!({"step": "approval"}),
                interrupt_on_resume: false,
                log: log.clone(),
            }),
        )
        .with("C", Arc::new(PlainHandler { outgoing: vec![], log: log.clone() }));

    let recorder = Arc::new(InMemoryTaskRecorder::new());
    let scheduler = Scheduler::new(Arc::new(provider), recorder.clone());
    let mut events = scheduler.bus().subscribe();

    scheduler.add_task("ex-resume", "B");
    scheduler.launch("ex-resume", None, None);
    let (interrupted_task, _) = recv_interruption(&mut events).await?;

    scheduler.resume("ex-resume", "B", interrupted_task, json!({"approved": true}));

    let event = recv_event(&mut events).await?;
    assert!(matches!(event, FlowEvent::InstanceCompleted { .. }));
    assert!(log.lock().unwrap().iter().any(|e| e == "C"));

    // The continuation settles under a fresh task id: a second record, not an
    // update to the interrupted one.
    let records = recorder.execution_tasks("ex-resume").await?;
    assert_eq!(records.len(), 3);
    let continuation = records
        .iter()
        .find(|r| r.node_id == "B" && r.status() == ActionStatus::Completed)
        .expect("continuation record");
    assert_ne!(continuation.task_id, interrupted_task);
    assert_eq!(continuation.properties, json!({"approved": true}));
    assert!(recorder.get_task(interrupted_task).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn resume_that_suspends_again_emits_a_second_interruption() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let provider = TestProvider::default().with(
        "B",
        Arc::new(GateHandler {
            outgoing: vec![],
            detail: json!({"round": "next"}),
            interrupt_on_resume: true,
            log: log.clone(),
        }),
    );

    let recorder = Arc::new(InMemoryTaskRecorder::new());
    let scheduler = Scheduler::new(Arc::new(provider), recorder.clone());
    let mut events = scheduler.bus().subscribe();

    scheduler.add_task("ex-again", "B");
    scheduler.launch("ex-again", None, None);
    let (first_task, _) = recv_interruption(&mut events).await?;

    scheduler.resume("ex-again", "B", first_task, Value::Null);
    let (second_task, detail) = recv_interruption(&mut events).await?;

    assert_ne!(second_task, first_task);
    assert_eq!(detail, json!({"round": "next"}));
    assert_eq!(recorder.execution_tasks("ex-again").await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn sibling_branch_is_unaffected_by_interruption() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let provider = TestProvider::default()
        .with(
            "B",
            Arc::new(GateHandler {
                outgoing: vec![],
                detail: Value::Null,
                interrupt_on_resume: false,
                log: log.clone(),
            }),
        )
        .with("C", Arc::new(PlainHandler { outgoing: vec![], log: log.clone() }));

    let recorder = Arc::new(InMemoryTaskRecorder::new());
    let scheduler = Scheduler::new(Arc::new(provider), recorder.clone());
    let mut events = scheduler.bus().subscribe();

    // Two independently seeded branches in the same instance.
    scheduler.add_task("ex-sib", "B");
    scheduler.launch("ex-sib", None, None);
    scheduler.add_task("ex-sib", "C");
    scheduler.launch("ex-sib", None, None);

    // C still runs to settlement while B sits dormant; with no ready or
    // running work left, the termination rule then declares the instance
    // complete on C's launch re-attempt.
    let mut saw_interruption = false;
    let mut saw_completion = false;
    for _ in 0..2 {
        match recv_event(&mut events).await? {
            FlowEvent::InstanceInterrupted { node_id, .. } => {
                assert_eq!(node_id, "B");
                saw_interruption = true;
            }
            FlowEvent::InstanceCompleted { .. } => saw_completion = true,
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(saw_interruption && saw_completion);
    assert!(log.lock().unwrap().iter().any(|e| e == "C"));
    Ok(())
}
