//! reqwest implementation of [`ComfyApiPort`]

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;

use comfyrun_domain::{ClientId, FileDescriptor, PromptId};
use comfyrun_shared::{
    DeleteQueuedRequest, HistoryResponse, QueuePromptRequest, QueuePromptResponse, QueueSnapshot,
    UploadedFile,
};

use crate::config::ComfyConfig;
use crate::error::ApiError;
use crate::ports::ComfyApiPort;

/// HTTP client for one ComfyUI server
#[derive(Clone)]
pub struct ComfyHttpApi {
    client: Client,
    base_url: String,
}

impl ComfyHttpApi {
    pub fn new(config: &ComfyConfig) -> Result<Self, ApiError> {
        let mut builder = Client::builder().timeout(config.http_timeout);
        if let Some(proxy) = &config.proxy {
            let proxy =
                reqwest::Proxy::http(proxy).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ComfyApiPort for ComfyHttpApi {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn queue_prompt(
        &self,
        prompt: &Value,
        client_id: ClientId,
    ) -> Result<QueuePromptResponse, ApiError> {
        let request = QueuePromptRequest {
            prompt,
            client_id: client_id.to_string(),
        };
        let response = self
            .client
            .post(self.url("/prompt"))
            .json(&request)
            .send()
            .await?;
        Self::json(response).await
    }

    async fn history(&self, prompt_id: &PromptId) -> Result<HistoryResponse, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/history/{}", prompt_id)))
            .send()
            .await?;
        Self::json(response).await
    }

    async fn full_history(&self) -> Result<HistoryResponse, ApiError> {
        let response = self.client.get(self.url("/history")).send().await?;
        Self::json(response).await
    }

    async fn view(&self, descriptor: &FileDescriptor) -> Result<Vec<u8>, ApiError> {
        let response = self
            .client
            .get(self.url("/view"))
            .query(&[
                ("filename", descriptor.filename.as_str()),
                ("subfolder", descriptor.subfolder.as_str()),
                ("type", descriptor.kind.as_str()),
            ])
            .send()
            .await?;
        let response = Self::check(response).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(ApiError::from)
    }

    async fn upload_image(&self, path: &Path, overwrite: bool) -> Result<UploadedFile, ApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::Client(format!("{}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ApiError::Client(format!("{} has no file name", path.display())))?;

        let form = reqwest::multipart::Form::new()
            .part(
                "image",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("overwrite", if overwrite { "true" } else { "false" });

        let response = self
            .client
            .post(self.url("/upload/image"))
            .multipart(form)
            .send()
            .await?;
        Self::json(response).await
    }

    async fn queue(&self) -> Result<QueueSnapshot, ApiError> {
        let response = self.client.get(self.url("/queue")).send().await?;
        Self::json(response).await
    }

    async fn interrupt(&self) -> Result<(), ApiError> {
        let response = self.client.post(self.url("/interrupt")).send().await?;
        Self::check(response).await.map(|_| ())
    }

    async fn delete_queued(&self, prompt_ids: &[PromptId]) -> Result<(), ApiError> {
        let request = DeleteQueuedRequest { delete: prompt_ids };
        let response = self
            .client
            .post(self.url("/queue"))
            .json(&request)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }
}
