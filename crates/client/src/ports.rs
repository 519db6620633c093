//! Port trait for the ComfyUI HTTP API
//!
//! The session, fetcher and client talk to the server only through this
//! trait so tests can swap in a mock.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use comfyrun_domain::{ClientId, FileDescriptor, PromptId};
use comfyrun_shared::{HistoryResponse, QueuePromptResponse, QueueSnapshot, UploadedFile};

use crate::error::ApiError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComfyApiPort: Send + Sync {
    /// Base URL of the server this port talks to.
    fn base_url(&self) -> &str;

    /// `POST /prompt`
    async fn queue_prompt(
        &self,
        prompt: &Value,
        client_id: ClientId,
    ) -> Result<QueuePromptResponse, ApiError>;

    /// `GET /history/<id>`; an unknown id yields an empty map
    async fn history(&self, prompt_id: &PromptId) -> Result<HistoryResponse, ApiError>;

    /// `GET /history`
    async fn full_history(&self) -> Result<HistoryResponse, ApiError>;

    /// `GET /view`
    async fn view(&self, descriptor: &FileDescriptor) -> Result<Vec<u8>, ApiError>;

    /// `POST /upload/image`
    async fn upload_image(&self, path: &Path, overwrite: bool) -> Result<UploadedFile, ApiError>;

    /// `GET /queue`
    async fn queue(&self) -> Result<QueueSnapshot, ApiError>;

    /// `POST /interrupt`
    async fn interrupt(&self) -> Result<(), ApiError>;

    /// `POST /queue {"delete": [...]}`
    async fn delete_queued(&self, prompt_ids: &[PromptId]) -> Result<(), ApiError>;
}
