//! Client configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

/// Default ComfyUI address when nothing is configured
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8188";

/// Reconnection budget for the event stream
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Each delay is randomised by up to this fraction in either direction
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Settings for one ComfyUI server
#[derive(Debug, Clone, PartialEq)]
pub struct ComfyConfig {
    /// Server address, e.g. `http://127.0.0.1:8188`
    pub base_url: String,
    /// HTTP proxy for REST calls; the event stream always connects directly
    pub proxy: Option<String>,
    pub http_timeout: Duration,
    pub ws_open_timeout: Duration,
    pub ws_ping_interval: Duration,
    /// Silence on the event stream longer than this counts as a dropped connection
    pub ws_ping_timeout: Duration,
    /// End-to-end budget for one job, from submission to terminal event
    pub workflow_timeout: Duration,
    pub download_retry_attempts: u32,
    pub download_retry_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ComfyConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            proxy: None,
            http_timeout: Duration::from_secs(120),
            ws_open_timeout: Duration::from_secs(20),
            ws_ping_interval: Duration::from_secs(10),
            ws_ping_timeout: Duration::from_secs(30),
            workflow_timeout: Duration::from_secs(1145),
            download_retry_attempts: 3,
            download_retry_delay: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ComfyConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unparsable values fall back to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.as_secs()).map_or(default, Duration::from_secs)
        };

        Self {
            base_url: lookup("COMFYUI_URL")
                .or_else(|| lookup("COMFYUI_BASE_URL"))
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.base_url),
            proxy: lookup("COMFYUI_PROXY")
                .map(|proxy| proxy.trim().to_string())
                .filter(|proxy| !proxy.is_empty()),
            http_timeout: secs("COMFYUI_HTTP_TIMEOUT_SECS", defaults.http_timeout),
            ws_open_timeout: secs("COMFYUI_WS_OPEN_TIMEOUT_SECS", defaults.ws_open_timeout),
            ws_ping_interval: secs("COMFYUI_WS_PING_INTERVAL_SECS", defaults.ws_ping_interval),
            ws_ping_timeout: secs("COMFYUI_WS_PING_TIMEOUT_SECS", defaults.ws_ping_timeout),
            workflow_timeout: secs("COMFYUI_WORKFLOW_TIMEOUT_SECS", defaults.workflow_timeout),
            download_retry_attempts: parse_or(
                &lookup,
                "COMFYUI_DOWNLOAD_RETRY_ATTEMPTS",
                defaults.download_retry_attempts,
            )
            .unwrap_or(defaults.download_retry_attempts),
            download_retry_delay: secs(
                "COMFYUI_DOWNLOAD_RETRY_DELAY_SECS",
                defaults.download_retry_delay,
            ),
            reconnect: ReconnectPolicy {
                max_attempts: parse_or(
                    &lookup,
                    "COMFYUI_RECONNECT_ATTEMPTS",
                    defaults.reconnect.max_attempts,
                )
                .unwrap_or(defaults.reconnect.max_attempts),
                ..defaults.reconnect
            },
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Event-stream URL for a session: `ws(s)://<host>/ws?clientId=<id>`.
    pub fn event_stream_url(&self, client_id: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(self.base_url())?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always an allowed scheme change
        let _ = url.set_scheme(scheme);
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("clientId", client_id);
        Ok(url)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Some(default);
    };
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(
                key,
                value = %raw,
                default = %default,
                "Ignoring unparsable configuration value"
            );
            None
        }
    }
}
