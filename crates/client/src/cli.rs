//! Command line definitions for comfy-tasks.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inspect and drive a ComfyUI server.
#[derive(Debug, Parser)]
#[command(name = "comfy-tasks")]
#[command(about = "Inspect and drive a ComfyUI server")]
#[command(after_help = "The server defaults to COMFYUI_URLS / COMFYUI_URL (.env is honoured).")]
#[command(version)]
pub(crate) struct Cli {
    /// ComfyUI base URL, overriding the environment
    #[arg(short, long, global = true)]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// List running, queued and finished tasks
    View,

    /// Interrupt the running task
    Interrupt,

    /// Remove queued tasks
    Delete {
        /// Prompt ids to remove
        #[arg(required = true)]
        prompt_ids: Vec<String>,
    },

    /// Run a workflow and download the given nodes' files
    Run {
        /// API-format workflow JSON
        workflow: PathBuf,

        /// Directory the files are written to
        output_dir: PathBuf,

        /// Output nodes to download
        #[arg(required = true)]
        nodes: Vec<String>,
    },
}
