//! Workflow client
//!
//! Public entry point: submit a [`WorkflowDocument`], wait for it, and get the
//! requested outputs back as local files or values. Queue management is
//! delegated to [`QueueManager`].

use std::path::Path;
use std::sync::Arc;

use comfyrun_domain::{PromptId, ResolvedOutput, WorkflowDocument};
use comfyrun_shared::UploadedFile;

use crate::config::ComfyConfig;
use crate::error::ComfyError;
use crate::fetcher::ArtifactFetcher;
use crate::http::ComfyHttpApi;
use crate::outputs::collect_outputs;
use crate::pool::ServerPool;
use crate::ports::ComfyApiPort;
use crate::session::ExecutionSession;
use crate::tasks::{QueueManager, TaskOverview};

/// Facade over one ComfyUI server
pub struct WorkflowClient {
    api: Arc<dyn ComfyApiPort>,
    session: ExecutionSession,
    fetcher: ArtifactFetcher,
    tasks: QueueManager,
}

impl WorkflowClient {
    /// Connect over HTTP and open the event stream.
    pub async fn connect(config: ComfyConfig) -> Result<Self, ComfyError> {
        let api = ComfyHttpApi::new(&config)?;
        Self::with_api(Arc::new(api), config).await
    }

    /// Connect to the next server of a pool.
    pub async fn connect_pooled(
        pool: &ServerPool,
        template: &ComfyConfig,
    ) -> Result<Self, ComfyError> {
        Self::connect(pool.next_config(template)).await
    }

    /// Build on an existing API port.
    pub async fn with_api(
        api: Arc<dyn ComfyApiPort>,
        config: ComfyConfig,
    ) -> Result<Self, ComfyError> {
        let fetcher = ArtifactFetcher::from_config(Arc::clone(&api), &config);
        let tasks = QueueManager::new(Arc::clone(&api));
        let session = ExecutionSession::open(Arc::clone(&api), config).await?;
        Ok(Self {
            api,
            session,
            fetcher,
            tasks,
        })
    }

    pub fn session(&self) -> &ExecutionSession {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }

    /// Read an API-format workflow file.
    pub async fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowDocument, ComfyError> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(WorkflowDocument::from_json_str(&text)?)
    }

    /// Run a document to completion and collect its requested outputs.
    ///
    /// Files are written below `output_dir`. Selector and download problems
    /// show up as error strings inside the result; only job-level failures
    /// are returned as `Err`.
    pub async fn execute(
        &self,
        document: &WorkflowDocument,
        output_dir: impl AsRef<Path>,
    ) -> Result<ResolvedOutput, ComfyError> {
        let prompt_id = self.session.run(document).await?;

        let mut history = self.api.history(&prompt_id).await?;
        let entry = history
            .remove(prompt_id.as_str())
            .ok_or_else(|| ComfyError::SnapshotUnavailable(prompt_id.clone()))?;

        let resolved =
            collect_outputs(&self.fetcher, document, &entry.outputs, output_dir.as_ref()).await;
        tracing::info!(
            prompt_id = %prompt_id,
            nodes = resolved.len(),
            errors = resolved.error_count(),
            "Workflow outputs collected"
        );
        Ok(resolved)
    }

    /// Upload a local image into the server's input folder, replacing any
    /// file of the same name.
    pub async fn upload_image(&self, path: impl AsRef<Path>) -> Result<UploadedFile, ComfyError> {
        let uploaded = self.api.upload_image(path.as_ref(), true).await?;
        tracing::info!(name = %uploaded.name, "Image uploaded");
        Ok(uploaded)
    }

    /// Queue management over plain HTTP.
    pub fn tasks(&self) -> &QueueManager {
        &self.tasks
    }

    /// Running, queued and finished tasks on the server.
    pub async fn view_tasks(&self) -> Result<TaskOverview, ComfyError> {
        self.tasks.view_tasks().await
    }

    /// Interrupt whatever the server is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyError> {
        self.tasks.interrupt().await
    }

    /// Remove queued (not yet running) prompts.
    pub async fn delete_queued(&self, prompt_ids: &[PromptId]) -> Result<(), ComfyError> {
        self.tasks.delete_queued(prompt_ids).await
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}
