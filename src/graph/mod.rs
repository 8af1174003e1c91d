use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FlowError;
use crate::provider::{NodeHandler, NodeProvider};

pub mod builtin;
pub mod loader;

/// Declarative description of a work graph: nodes with a handler kind,
/// opaque params and outgoing edges. The dispatcher never reads this; it is
/// a convenience [`NodeProvider`] for callers that keep their topology in a
/// file instead of hand-writing a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphSpec {
    pub id: String,
    /// Nodes seeded into the ready queue when an execution begins.
    #[serde(default)]
    pub start: Vec<String>,
    pub nodes: Vec<GraphNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    /// Handler kind name, resolved against the registry at launch time.
    pub kind: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub outgoing: Vec<String>,
}

/// Handler factory, one per kind name. Registered on a [`StaticGraph`] the
/// way node definitions are registered on an engine.
pub trait HandlerKind: Send + Sync {
    fn name(&self) -> &str;
    fn validate(&self, node: &GraphNode) -> Result<()>;
    fn prepare(&self, node: &GraphNode) -> Result<Arc<dyn NodeHandler>>;
}

/// A [`NodeProvider`] over a [`GraphSpec`]. Handlers are prepared lazily on
/// first lookup and cached per node id.
pub struct StaticGraph {
    id: String,
    start: Vec<String>,
    nodes: HashMap<String, GraphNode>,
    registry: HashMap<String, Box<dyn HandlerKind>>,
    prepared: DashMap<String, Arc<dyn NodeHandler>>,
}

impl StaticGraph {
    /// Builds a provider with the builtin `task` and `wait` kinds registered.
    pub fn new(spec: GraphSpec) -> Self {
        let mut graph = Self {
            id: spec.id,
            start: spec.start,
            nodes: spec
                .nodes
                .into_iter()
                .map(|n| (n.id.clone(), n))
                .collect(),
            registry: HashMap::new(),
            prepared: DashMap::new(),
        };
        graph.register_kind(Box::new(builtin::TaskKind));
        graph.register_kind(Box::new(builtin::WaitKind));
        graph
    }

    pub fn register_kind(&mut self, kind: Box<dyn HandlerKind>) {
        self.registry.insert(kind.name().to_string(), kind);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_nodes(&self) -> &[String] {
        &self.start
    }

    /// Checks every node against its kind's `validate` before any execution.
    pub fn validate(&self) -> Result<()> {
        for node in self.nodes.values() {
            let kind = self.registry.get(&node.kind).ok_or_else(|| {
                FlowError::UnknownHandlerKind {
                    kind: node.kind.clone(),
                    node_id: node.id.clone(),
                }
            })?;
            kind.validate(node)?;
        }
        Ok(())
    }
}

impl NodeProvider for StaticGraph {
    fn node(&self, node_id: &str) -> Result<Arc<dyn NodeHandler>> {
        if let Some(handler) = self.prepared.get(node_id) {
            return Ok(handler.value().clone());
        }
        let node = self.nodes.get(node_id).ok_or_else(|| FlowError::UnknownNode {
            node_id: node_id.to_string(),
        })?;
        let kind = self.registry.get(&node.kind).ok_or_else(|| {
            FlowError::UnknownHandlerKind {
                kind: node.kind.clone(),
                node_id: node.id.clone(),
            }
        })?;
        let handler = kind.prepare(node)?;
        self.prepared.insert(node_id.to_string(), handler.clone());
        Ok(handler)
    }
}
