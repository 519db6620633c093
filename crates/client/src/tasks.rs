//! Queue management
//!
//! Inspect, interrupt and prune the server queue. Plain REST calls; no event
//! stream is needed.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use comfyrun_domain::{scan_file_descriptors, PromptId};
use comfyrun_shared::{PromptHistory, QueueEntry};

use crate::config::ComfyConfig;
use crate::error::ComfyError;
use crate::http::ComfyHttpApi;
use crate::ports::ComfyApiPort;

/// Where a task currently is on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Queued,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub prompt_id: PromptId,
    pub number: Option<i64>,
    pub state: TaskState,
    /// Last status timestamp of a finished task
    pub finished_at: Option<DateTime<Utc>>,
    /// Files a finished task produced, as `type/subfolder/name`
    pub outputs: Vec<String>,
}

impl TaskSummary {
    fn from_queue(entry: QueueEntry, state: TaskState) -> Self {
        Self {
            prompt_id: entry.prompt_id,
            number: entry.number,
            state,
            finished_at: None,
            outputs: Vec::new(),
        }
    }

    fn from_history(prompt_id: &str, entry: &PromptHistory) -> Self {
        let state = if entry.is_error() {
            TaskState::Failed
        } else {
            TaskState::Succeeded
        };
        let finished_at = entry
            .status
            .as_ref()
            .and_then(|status| status.last_timestamp())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        let outputs = entry
            .outputs
            .values()
            .flat_map(scan_file_descriptors)
            .map(|(_, descriptor)| descriptor.to_string())
            .collect();

        Self {
            prompt_id: PromptId::from(prompt_id),
            number: None,
            state,
            finished_at,
            outputs,
        }
    }
}

/// Snapshot of the server queue and history
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskOverview {
    pub running: Vec<TaskSummary>,
    pub queued: Vec<TaskSummary>,
    /// Newest first
    pub completed: Vec<TaskSummary>,
}

/// Queue and history operations against one server
pub struct QueueManager {
    api: Arc<dyn ComfyApiPort>,
}

impl QueueManager {
    pub fn new(api: Arc<dyn ComfyApiPort>) -> Self {
        Self { api }
    }

    /// HTTP-only manager for the configured server.
    pub fn connect(config: &ComfyConfig) -> Result<Self, ComfyError> {
        let api = ComfyHttpApi::new(config)?;
        Ok(Self::new(Arc::new(api)))
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }

    /// Running, queued and finished tasks on the server.
    pub async fn view_tasks(&self) -> Result<TaskOverview, ComfyError> {
        let queue = self.api.queue().await?;
        let history = self.api.full_history().await?;

        let mut completed: Vec<TaskSummary> = history
            .iter()
            .map(|(prompt_id, entry)| TaskSummary::from_history(prompt_id, entry))
            .collect();
        completed.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));

        Ok(TaskOverview {
            running: queue
                .running()
                .into_iter()
                .map(|entry| TaskSummary::from_queue(entry, TaskState::Running))
                .collect(),
            queued: queue
                .pending()
                .into_iter()
                .map(|entry| TaskSummary::from_queue(entry, TaskState::Queued))
                .collect(),
            completed,
        })
    }

    /// Interrupt whatever the server is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyError> {
        self.api.interrupt().await?;
        tracing::info!(server = %self.api.base_url(), "Interrupt requested");
        Ok(())
    }

    /// Remove queued (not yet running) prompts.
    pub async fn delete_queued(&self, prompt_ids: &[PromptId]) -> Result<(), ComfyError> {
        if prompt_ids.is_empty() {
            return Ok(());
        }
        self.api.delete_queued(prompt_ids).await?;
        tracing::info!(count = prompt_ids.len(), "Queued prompts deleted");
        Ok(())
    }
}
