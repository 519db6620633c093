//! comfyrun Client - asynchronous ComfyUI workflow execution
//!
//! Submits workflow documents to a ComfyUI server, follows them over the
//! `/ws` event stream and downloads the requested outputs.
//!
//! ```no_run
//! # async fn demo() -> Result<(), comfyrun_client::ComfyError> {
//! use comfyrun_client::{ComfyConfig, WorkflowClient};
//!
//! let client = WorkflowClient::connect(ComfyConfig::from_env()).await?;
//! let mut workflow = WorkflowClient::load_workflow("txt2img.json").await?;
//! workflow
//!     .set_input("6", "text", "a lighthouse at dusk")
//!     .request_output("9", None::<&str>);
//!
//! let outputs = client.execute(&workflow, "out").await?;
//! println!("{}", serde_json::to_string_pretty(&outputs).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod outputs;
pub mod pool;
pub mod ports;
pub mod registry;
pub mod session;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use client::WorkflowClient;
pub use config::{ComfyConfig, ReconnectPolicy};
pub use error::{ApiError, ComfyError, FetchError};
pub use fetcher::ArtifactFetcher;
pub use http::ComfyHttpApi;
pub use pool::ServerPool;
pub use ports::ComfyApiPort;
pub use session::{ConnectionState, ExecutionSession, JobHandle};
pub use tasks::{QueueManager, TaskOverview, TaskState, TaskSummary};

pub use comfyrun_domain::{
    OutputRequest, PromptId, ResolvedOutput, ResolvedValue, WorkflowDocument,
};
