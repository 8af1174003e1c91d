use clap::{Parser, Subcommand};
use flowrun::audit::{InMemoryTaskRecorder, TaskRecorder};
use flowrun::dispatch::Scheduler;
use flowrun::events::FlowEvent;
use flowrun::graph::loader::load_graph_from_yaml;
use flowrun::graph::StaticGraph;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use flowrun::error::FlowError;
use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph file to its terminal event
    Run {
        /// Path to the graph YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Execution instance id (random if omitted)
        #[arg(long)]
        execution_id: Option<String>,

        /// Automatically resume interrupted branches with the -D vars as input
        #[arg(long)]
        auto_resume: bool,

        /// Resume input variables (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,
    },

    /// Load and validate a graph file without running it
    Check {
        /// Path to the graph YAML file
        #[arg(long, short)]
        file: PathBuf,
    },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // Try parsing as JSON, otherwise treat as string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| serde_json::Value::String(val_str.to_string()));
    Ok((key, val))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { file } => {
            let spec = load_graph_from_yaml(file.to_str().unwrap())?;
            let graph = StaticGraph::new(spec);
            graph.validate()?;
            info!("Graph ok: {} ({} start nodes)", graph.id(), graph.start_nodes().len());
        }
        Commands::Run { file, execution_id, auto_resume, vars } => {
            let spec = load_graph_from_yaml(file.to_str().unwrap())?;
            let graph = StaticGraph::new(spec);
            graph.validate()?;
            if graph.start_nodes().is_empty() {
                return Err(FlowError::NoStartNodes { graph_id: graph.id().to_string() }.into());
            }

            let execution_id = execution_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let start_nodes = graph.start_nodes().to_vec();

            let scheduler = Scheduler::new(
                Arc::new(graph),
                Arc::new(InMemoryTaskRecorder::new()),
            );
            let mut events = scheduler.bus().subscribe();

            info!("Starting execution: {}", execution_id);
            for node_id in &start_nodes {
                scheduler.add_task(&execution_id, node_id);
                scheduler.launch(&execution_id, None, None);
            }

            let resume_input: HashMap<_, _> = vars.into_iter().collect();
            while let Ok(event) = events.recv().await {
                if event.execution_id() != execution_id {
                    continue;
                }
                match event {
                    FlowEvent::InstanceCompleted { node_id, task_id, .. } => {
                        info!(?node_id, ?task_id, "Execution completed");
                        break;
                    }
                    FlowEvent::InstanceCancelled { reason, .. } => {
                        warn!(%reason, "Execution cancelled");
                        break;
                    }
                    FlowEvent::InstanceInterrupted { node_id, task_id, detail, .. } => {
                        if auto_resume {
                            info!(%node_id, %task_id, "Interrupted, resuming with vars");
                            scheduler.resume(
                                &execution_id,
                                &node_id,
                                task_id,
                                serde_json::to_value(&resume_input)?,
                            );
                        } else {
                            warn!(%node_id, %task_id, ?detail,
                                "Branch dormant; rerun with --auto-resume or resume via API");
                            break;
                        }
                    }
                    FlowEvent::BranchFailed { node_id, error, .. } => {
                        warn!(%node_id, %error, "Branch failed");
                    }
                }
            }

            let records = scheduler.recorder().execution_tasks(&execution_id).await?;
            info!("Settled tasks: {}", records.len());
        }
    }

    Ok(())
}
