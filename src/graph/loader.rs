use anyhow::{Context as AnyhowContext, Result};
use std::fs;

use crate::graph::GraphSpec;

pub fn load_graph_from_yaml(file_path: &str) -> Result<GraphSpec> {
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path))?;

    let spec: GraphSpec = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", file_path))?;

    Ok(spec)
}
