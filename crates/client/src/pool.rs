//! Round-robin server selection

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{ComfyConfig, DEFAULT_BASE_URL};

/// Several ComfyUI servers handed out in turn
#[derive(Debug)]
pub struct ServerPool {
    urls: Vec<String>,
    next: AtomicUsize,
}

impl ServerPool {
    /// Blank entries are skipped; an empty pool falls back to the default server.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut urls: Vec<String> = urls
            .into_iter()
            .map(|url| {
                let url: String = url.into();
                url.trim().trim_end_matches('/').to_string()
            })
            .filter(|url| !url.is_empty())
            .collect();
        if urls.is_empty() {
            urls.push(DEFAULT_BASE_URL.to_string());
        }
        Self {
            urls,
            next: AtomicUsize::new(0),
        }
    }

    /// `COMFYUI_URLS` (comma separated), else `COMFYUI_URL`.
    pub fn from_env() -> Self {
        let raw = env::var("COMFYUI_URLS")
            .or_else(|_| env::var("COMFYUI_URL"))
            .unwrap_or_default();
        Self::parse(&raw)
    }

    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Next server in rotation.
    pub fn next_url(&self) -> &str {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    /// `template` pointed at the next server.
    pub fn next_config(&self, template: &ComfyConfig) -> ComfyConfig {
        ComfyConfig {
            base_url: self.next_url().to_string(),
            ..template.clone()
        }
    }
}
