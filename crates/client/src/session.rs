//! Execution session
//!
//! One event-stream connection (`/ws?clientId=<id>`) shared by every job
//! submitted through the session. A single listener task reads the stream and
//! feeds the [`JobRegistry`]; callers await their own [`JobHandle`].
//!
//! When the stream drops, the listener reconnects with the same client id
//! using exponential backoff, then asks `/history` about every job still
//! pending so completions missed while disconnected are not lost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use comfyrun_domain::{ClientId, JobStatus, PromptId, WorkflowDocument};
use comfyrun_shared::{PromptHistory, ServerEvent};

use crate::backoff::BackoffState;
use crate::config::ComfyConfig;
use crate::error::ComfyError;
use crate::ports::ComfyApiPort;
use crate::registry::{JobOutcome, JobRegistry};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First handshake in progress
    Connecting,
    /// Events are flowing
    Connected,
    /// Stream dropped; pending jobs wait while backoff runs
    Reconnecting,
    /// Shut down through `close()`
    Disconnected,
    /// Never opened, or the reconnect budget ran out
    Failed,
}

enum StreamEnd {
    Shutdown,
    Dropped(String),
}

struct SessionInner {
    api: Arc<dyn ComfyApiPort>,
    config: ComfyConfig,
    client_id: ClientId,
    url: Url,
    registry: Arc<JobRegistry>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

/// A live event-stream connection plus the jobs awaited on it
pub struct ExecutionSession {
    inner: Arc<SessionInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionSession {
    /// Connect the event stream and start the listener task.
    pub async fn open(api: Arc<dyn ComfyApiPort>, config: ComfyConfig) -> Result<Self, ComfyError> {
        let client_id = ClientId::new();
        let url = config
            .event_stream_url(&client_id.to_string())
            .map_err(|e| ComfyError::ConnectionFailed(format!("{}: {}", config.base_url(), e)))?;
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let inner = Arc::new(SessionInner {
            api,
            config,
            client_id,
            url,
            registry: Arc::new(JobRegistry::new()),
            state,
            shutdown: CancellationToken::new(),
        });

        let stream = match inner.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(client_id = %client_id, url = %inner.url, error = %e, "Failed to open event stream");
                inner.set_state(ConnectionState::Failed);
                return Err(ComfyError::ConnectionFailed(e));
            }
        };
        inner.set_state(ConnectionState::Connected);
        tracing::info!(client_id = %client_id, url = %inner.url, "Event stream connected");

        let listener = tokio::spawn(Arc::clone(&inner).listen(stream));
        Ok(Self {
            inner,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.client_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Status of a job currently awaited on this session.
    pub fn job_status(&self, prompt_id: &PromptId) -> Option<JobStatus> {
        self.inner.registry.status(prompt_id)
    }

    /// Jobs still waiting for a terminal event.
    pub fn pending_jobs(&self) -> Vec<PromptId> {
        self.inner.registry.pending_ids()
    }

    /// Queue the document's merged graph and start waiting on it.
    pub async fn submit(&self, document: &WorkflowDocument) -> Result<JobHandle, ComfyError> {
        self.ensure_usable()?;

        for unmatched in document.unmatched_replacements() {
            tracing::warn!(
                node_id = %unmatched.node_id,
                input = %unmatched.input_name,
                "Input override targets a node missing from the graph"
            );
        }

        let prompt = document.to_prompt();
        let response = self
            .inner
            .api
            .queue_prompt(&prompt, self.inner.client_id)
            .await
            .map_err(|e| ComfyError::Submission(e.to_string()))?;
        if response.has_node_errors() {
            return Err(ComfyError::Submission(format!(
                "node errors: {}",
                response.node_errors
            )));
        }

        let prompt_id = response.prompt_id;
        let receiver = self.inner.registry.register(prompt_id.clone())?;
        tracing::info!(
            client_id = %self.inner.client_id,
            prompt_id = %prompt_id,
            number = ?response.number,
            "Prompt queued"
        );

        Ok(JobHandle {
            prompt_id: prompt_id.clone(),
            number: response.number,
            receiver,
            registration: Registration {
                registry: Arc::clone(&self.inner.registry),
                prompt_id,
            },
        })
    }

    /// Submit and wait with the configured workflow timeout.
    pub async fn run(&self, document: &WorkflowDocument) -> Result<PromptId, ComfyError> {
        let handle = self.submit(document).await?;
        handle.wait(self.inner.config.workflow_timeout).await
    }

    /// Stop the listener. Outstanding waiters fail with `ConnectionLost`.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let failed = self.inner.registry.fail_all("session closed");
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!(client_id = %self.inner.client_id, failed, "Session closed");
    }

    fn ensure_usable(&self) -> Result<(), ComfyError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ComfyError::ConnectionLost("session closed".to_string()));
        }
        if self.connection_state() == ConnectionState::Failed {
            return Err(ComfyError::ConnectionLost(
                "event stream could not be recovered".to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl SessionInner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    async fn connect(&self) -> Result<WsStream, String> {
        let timeout = self.config.ws_open_timeout;
        match tokio::time::timeout(timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("handshake timed out after {:?}", timeout)),
        }
    }

    async fn listen(self: Arc<Self>, mut stream: WsStream) {
        loop {
            let reason = match self.pump(stream).await {
                StreamEnd::Shutdown => break,
                StreamEnd::Dropped(reason) => reason,
            };
            tracing::warn!(client_id = %self.client_id, reason = %reason, "Event stream dropped");

            match self.reconnect().await {
                Some(next) => {
                    stream = next;
                    self.reconcile().await;
                }
                None if self.shutdown.is_cancelled() => break,
                None => {
                    self.set_state(ConnectionState::Failed);
                    let failed = self
                        .registry
                        .fail_all(&format!("reconnect budget exhausted ({})", reason));
                    tracing::error!(
                        client_id = %self.client_id,
                        failed,
                        "Event stream could not be recovered, giving up"
                    );
                    return;
                }
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Read frames until the stream drops or the session shuts down.
    async fn pump(&self, stream: WsStream) -> StreamEnd {
        let (mut write, mut read) = stream.split();

        let period = self.config.ws_ping_interval.max(Duration::from_millis(1));
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return StreamEnd::Shutdown;
                }
                _ = ping.tick() => {
                    if last_seen.elapsed() > self.config.ws_ping_timeout {
                        return StreamEnd::Dropped(format!(
                            "no frames for {:?}",
                            last_seen.elapsed()
                        ));
                    }
                    if let Err(e) = write.send(Message::Ping(Default::default())).await {
                        return StreamEnd::Dropped(e.to_string());
                    }
                }
                frame = read.next() => {
                    let Some(frame) = frame else {
                        return StreamEnd::Dropped("stream ended".to_string());
                    };
                    match frame {
                        Ok(Message::Text(text)) => {
                            last_seen = Instant::now();
                            self.handle_text(&text);
                        }
                        Ok(Message::Close(frame)) => {
                            return StreamEnd::Dropped(format!("closed by server: {:?}", frame));
                        }
                        // Binary previews, pings and pongs only prove liveness
                        Ok(_) => last_seen = Instant::now(),
                        Err(e) => return StreamEnd::Dropped(e.to_string()),
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match ServerEvent::parse(text) {
            Ok(event) => {
                tracing::trace!(kind = event.kind(), "Event received");
                if let Some((prompt_id, status)) = self.registry.apply(&event) {
                    tracing::debug!(prompt_id = %prompt_id, status = %status, "Job status changed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed event frame"),
        }
    }

    /// Attempt to reconnect with exponential backoff
    async fn reconnect(&self) -> Option<WsStream> {
        let mut backoff = BackoffState::new(self.config.reconnect.clone());
        self.set_state(ConnectionState::Reconnecting);

        while let Some(delay) = backoff.next_delay_and_advance() {
            tracing::info!(
                client_id = %self.client_id,
                attempt = backoff.attempts(),
                max_attempts = backoff.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting event stream"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connect().await {
                Ok(stream) => {
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(
                        client_id = %self.client_id,
                        attempt = backoff.attempts(),
                        "Event stream reconnected"
                    );
                    return Some(stream);
                }
                Err(e) => {
                    tracing::warn!(attempt = backoff.attempts(), error = %e, "Reconnect attempt failed");
                }
            }
        }
        None
    }

    /// Ask the server about jobs whose terminal event may have been missed.
    async fn reconcile(&self) {
        for prompt_id in self.registry.pending_ids() {
            let history = match self.api.history(&prompt_id).await {
                Ok(history) => history,
                Err(e) => {
                    tracing::warn!(prompt_id = %prompt_id, error = %e, "History lookup failed during reconcile");
                    continue;
                }
            };
            let Some(outcome) = history.get(prompt_id.as_str()).and_then(outcome_from_history)
            else {
                continue;
            };
            if self.registry.resolve(&prompt_id, outcome) {
                tracing::info!(prompt_id = %prompt_id, "Resolved job from history after reconnect");
            }
        }
    }
}

/// Terminal outcome recorded in a history entry, if the prompt has finished.
fn outcome_from_history(entry: &PromptHistory) -> Option<JobOutcome> {
    match &entry.status {
        Some(status) if status.is_interrupted() => Some(JobOutcome::Interrupted),
        Some(status) if status.is_error() => {
            Some(JobOutcome::Failed(status.failure().unwrap_or_default()))
        }
        Some(status) if status.is_success() => Some(JobOutcome::Completed),
        Some(_) => None,
        None if !entry.outputs.is_empty() => Some(JobOutcome::Completed),
        None => None,
    }
}

/// Removes the registry entry when the handle goes away.
struct Registration {
    registry: Arc<JobRegistry>,
    prompt_id: PromptId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.prompt_id);
    }
}

/// A submitted job awaiting its terminal event
pub struct JobHandle {
    prompt_id: PromptId,
    number: Option<i64>,
    receiver: oneshot::Receiver<JobOutcome>,
    registration: Registration,
}

impl JobHandle {
    pub fn prompt_id(&self) -> &PromptId {
        &self.prompt_id
    }

    /// Queue position the server assigned
    pub fn number(&self) -> Option<i64> {
        self.number
    }

    /// Wait for the job to finish.
    ///
    /// Whichever comes first of terminal event, timeout or connection loss
    /// decides the result; the job is unregistered either way.
    pub async fn wait(self, timeout: Duration) -> Result<PromptId, ComfyError> {
        let JobHandle {
            prompt_id,
            receiver,
            registration,
            ..
        } = self;

        let outcome = tokio::time::timeout(timeout, receiver).await;
        drop(registration);

        match outcome {
            Err(_) => {
                tracing::warn!(prompt_id = %prompt_id, timeout = ?timeout, "Prompt timed out");
                Err(ComfyError::ExecutionTimeout { prompt_id, timeout })
            }
            Ok(Err(_)) => Err(ComfyError::ConnectionLost("session closed".to_string())),
            Ok(Ok(JobOutcome::Completed)) => Ok(prompt_id),
            Ok(Ok(JobOutcome::Failed(failure))) => {
                Err(ComfyError::RemoteExecution { prompt_id, failure })
            }
            Ok(Ok(JobOutcome::Interrupted)) => Err(ComfyError::Interrupted(prompt_id)),
            Ok(Ok(JobOutcome::ConnectionLost(reason))) => Err(ComfyError::ConnectionLost(reason)),
        }
    }
}
