use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use uuid::Uuid;

use crate::dispatch::task::RunningTask;

/// Lifecycle of one execution instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Active,
    /// `stop` was called; in-flight settlements are suppressed until drained.
    CancelRequested,
    /// Terminal event emitted; the instance entry is gone from the map.
    Finished,
}

/// Mutable state of one execution instance: the FIFO ready queue and the
/// running-task registry. All mutation happens under the owning mutex; the
/// lock is never held across an await.
#[derive(Debug)]
pub(crate) struct InstanceState {
    pub ready: VecDeque<String>,
    pub running: HashMap<Uuid, RunningTask>,
    pub phase: Phase,
    pub cancel_reason: Option<String>,
}

impl InstanceState {
    fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            running: HashMap::new(),
            phase: Phase::Active,
            cancel_reason: None,
        }
    }

    pub fn is_drained(&self) -> bool {
        self.ready.is_empty() && self.running.is_empty()
    }
}

/// Map of live execution instances, one lock per instance. Entries are
/// created on first touch and evicted when the instance reaches a terminal
/// state, so the map only grows with concurrently live instances.
#[derive(Debug, Default)]
pub(crate) struct InstanceMap {
    inner: DashMap<String, Arc<Mutex<InstanceState>>>,
}

impl InstanceMap {
    pub fn new() -> Self {
        Self { inner: DashMap::new() }
    }

    /// Returns the state for `execution_id`, creating a fresh Active entry if
    /// none exists. The Arc is cloned out so callers lock without holding a
    /// map shard.
    pub fn get_or_create(&self, execution_id: &str) -> Arc<Mutex<InstanceState>> {
        self.inner
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(InstanceState::new())))
            .value()
            .clone()
    }

    pub fn get(&self, execution_id: &str) -> Option<Arc<Mutex<InstanceState>>> {
        self.inner.get(execution_id).map(|e| e.value().clone())
    }

    pub fn evict(&self, execution_id: &str) {
        self.inner.remove(execution_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}
