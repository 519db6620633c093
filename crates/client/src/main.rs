//! comfy-tasks - inspect and drive a ComfyUI server from the command line.

mod cli;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfyrun_client::{ComfyConfig, PromptId, QueueManager, ServerPool, WorkflowClient};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyrun_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let template = ComfyConfig::from_env();
    let config = match cli.server {
        Some(url) => ComfyConfig {
            base_url: url,
            ..template
        },
        None => ServerPool::from_env().next_config(&template),
    };

    match cli.command {
        Commands::Run {
            workflow,
            output_dir,
            nodes,
        } => {
            tracing::info!(server = %config.base_url(), "Connecting to ComfyUI");
            let client = WorkflowClient::connect(config)
                .await
                .context("connecting to ComfyUI")?;
            let result = run(&client, &workflow, &output_dir, &nodes).await;
            client.close().await;
            result
        }
        // Queue management is plain REST; no event stream
        command => {
            let tasks = QueueManager::connect(&config)?;
            manage(&tasks, command).await
        }
    }
}

async fn manage(tasks: &QueueManager, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::View => {
            let overview = tasks.view_tasks().await?;
            println!("{}", serde_json::to_string_pretty(&overview)?);
        }
        Commands::Interrupt => {
            tasks.interrupt().await?;
            println!("interrupt sent to {}", tasks.base_url());
        }
        Commands::Delete { prompt_ids } => {
            let ids: Vec<PromptId> = prompt_ids.into_iter().map(PromptId::from).collect();
            tasks.delete_queued(&ids).await?;
            println!("deleted {} queued task(s)", ids.len());
        }
        Commands::Run { .. } => anyhow::bail!("run needs an event-stream session"),
    }
    Ok(())
}

async fn run(
    client: &WorkflowClient,
    workflow: &Path,
    output_dir: &Path,
    nodes: &[String],
) -> anyhow::Result<()> {
    let mut document = WorkflowClient::load_workflow(workflow)
        .await
        .with_context(|| format!("loading {}", workflow.display()))?;
    for node in nodes {
        document.request_default(node.as_str());
    }

    let outputs = client.execute(&document, output_dir).await?;
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}
