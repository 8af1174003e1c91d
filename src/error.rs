use thiserror::Error;

/// Errors surfaced at the dispatcher's seams. Node handler logic keeps
/// `anyhow::Result`; these cover the contracts the crate itself owns.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("unknown node id: {node_id}")]
    UnknownNode { node_id: String },

    #[error("no handler kind registered for `{kind}` (node {node_id})")]
    UnknownHandlerKind { kind: String, node_id: String },

    #[error("graph `{graph_id}` declares no start nodes")]
    NoStartNodes { graph_id: String },
}
