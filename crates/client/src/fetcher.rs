//! Artifact downloads
//!
//! Files referenced by output descriptors are pulled through `/view` and
//! written to `<output_dir>/<type>/<file name>`. Transient failures are retried
//! with a fixed delay; client errors fail immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use comfyrun_domain::FileDescriptor;

use crate::config::ComfyConfig;
use crate::error::FetchError;
use crate::ports::ComfyApiPort;

#[derive(Clone)]
pub struct ArtifactFetcher {
    api: Arc<dyn ComfyApiPort>,
    attempts: u32,
    delay: Duration,
}

impl ArtifactFetcher {
    pub fn new(api: Arc<dyn ComfyApiPort>, attempts: u32, delay: Duration) -> Self {
        Self {
            api,
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn from_config(api: Arc<dyn ComfyApiPort>, config: &ComfyConfig) -> Self {
        Self::new(
            api,
            config.download_retry_attempts,
            config.download_retry_delay,
        )
    }

    /// Local destination for a descriptor.
    ///
    /// Only the last component of the server-side filename is used, so a
    /// descriptor can never point outside `<output_dir>/<type>/`.
    pub fn local_path(descriptor: &FileDescriptor, output_dir: &Path) -> Option<PathBuf> {
        let name = descriptor.filename.rsplit(['/', '\\']).next()?;
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }
        Some(output_dir.join(descriptor.kind.as_str()).join(name))
    }

    /// Download one file, overwriting any previous copy.
    pub async fn fetch(
        &self,
        descriptor: &FileDescriptor,
        output_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        let fail = |attempts: u32, reason: String| FetchError {
            descriptor: descriptor.clone(),
            attempts,
            reason,
        };
        let target = Self::local_path(descriptor, output_dir)
            .ok_or_else(|| fail(0, format!("unusable file name '{}'", descriptor.filename)))?;

        let mut attempt = 0;
        let bytes = loop {
            attempt += 1;
            match self.api.view(descriptor).await {
                Ok(bytes) => break bytes,
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    tracing::warn!(
                        file = %descriptor,
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "Download failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    tracing::error!(file = %descriptor, attempt, error = %e, "Download failed");
                    return Err(fail(attempt, e.to_string()));
                }
            }
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(attempt, format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| fail(attempt, format!("{}: {}", target.display(), e)))?;

        tracing::debug!(file = %descriptor, path = %target.display(), bytes = bytes.len(), "Downloaded artifact");
        Ok(target)
    }
}
