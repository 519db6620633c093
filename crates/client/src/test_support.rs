//! In-process fake ComfyUI server for session and client tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};

use comfyrun_domain::{PromptId, WorkflowDocument};

use crate::config::{ComfyConfig, ReconnectPolicy};

/// What the fake server does with each submitted prompt
#[derive(Debug, Clone, Default)]
pub(crate) enum Script {
    /// Nothing; the test drives completion
    #[default]
    Manual,
    /// Finish shortly after the response with these outputs
    Complete(Value),
    /// Fail shortly after the response
    Fail(String),
    /// Finish before the `/prompt` response is sent
    CompleteBeforeResponse(Value),
    /// Send completion events but record no history
    CompleteWithoutHistory,
    /// Answer with node errors
    Reject,
    /// Finish with `{"12": {"text": [<seed of node 3>]}}`; later prompts finish first
    EchoSeed,
    /// Hold the `/prompt` response until [`FakeState::release_submissions`]
    HoldResponse,
}

#[derive(Debug, Clone)]
enum WsCommand {
    Frame(String),
    Drop,
}

pub(crate) struct FakeState {
    commands: broadcast::Sender<WsCommand>,
    script: Mutex<Script>,
    counter: AtomicUsize,
    connections: AtomicUsize,
    refuse_ws: AtomicBool,
    submitted: Mutex<Vec<Value>>,
    history: Mutex<HashMap<String, Value>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    view_hits: AtomicUsize,
    failing_views: Mutex<u32>,
    queue: Mutex<Value>,
    interrupts: AtomicUsize,
    deleted: Mutex<Vec<Value>>,
    uploads: Mutex<Vec<Upload>>,
    held: Notify,
}

/// One `/upload/image` request as the server saw it
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Upload {
    pub(crate) filename: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) overwrite: Option<String>,
}

pub(crate) struct FakeComfy {
    state: Arc<FakeState>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl Deref for FakeComfy {
    type Target = FakeState;

    fn deref(&self) -> &FakeState {
        &self.state
    }
}

impl Drop for FakeComfy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl FakeComfy {
    pub(crate) async fn start() -> Self {
        let (commands, _) = broadcast::channel(256);
        let state = Arc::new(FakeState {
            commands,
            script: Mutex::new(Script::Manual),
            counter: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            refuse_ws: AtomicBool::new(false),
            submitted: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            view_hits: AtomicUsize::new(0),
            failing_views: Mutex::new(0),
            queue: Mutex::new(json!({"queue_running": [], "queue_pending": []})),
            interrupts: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            held: Notify::new(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let router = axum::Router::new()
            .route("/ws", get(event_stream))
            .route("/prompt", post(queue_prompt))
            .route("/history", get(full_history))
            .route("/history/{id}", get(history))
            .route("/view", get(view))
            .route("/queue", get(queue).post(delete_queued))
            .route("/interrupt", post(interrupt))
            .route("/upload/image", post(upload_image))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            state,
            addr,
            handle,
        }
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl FakeState {
    pub(crate) fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub(crate) fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) async fn wait_for_submissions(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.submitted().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Let one held `/prompt` response go out.
    pub(crate) fn release_submissions(&self) {
        self.held.notify_one();
    }

    pub(crate) fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    /// Event-stream connections accepted so far.
    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Close every open event stream without a close frame.
    pub(crate) fn drop_sockets(&self) {
        let _ = self.commands.send(WsCommand::Drop);
    }

    pub(crate) fn refuse_event_streams(&self, refuse: bool) {
        self.refuse_ws.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn add_file(&self, filename: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
    }

    /// Answer the next `count` `/view` calls with 503.
    pub(crate) fn fail_next_views(&self, count: u32) {
        *self.failing_views.lock().unwrap() = count;
    }

    pub(crate) fn view_hits(&self) -> usize {
        self.view_hits.load(Ordering::SeqCst)
    }

    pub(crate) fn set_queue(&self, queue: Value) {
        *self.queue.lock().unwrap() = queue;
    }

    pub(crate) fn add_history(&self, prompt_id: &str, entry: Value) {
        self.history
            .lock()
            .unwrap()
            .insert(prompt_id.to_string(), entry);
    }

    pub(crate) fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub(crate) fn deleted(&self) -> Vec<Value> {
        self.deleted.lock().unwrap().clone()
    }

    fn send_frame(&self, kind: &str, data: Value) {
        let frame = json!({"type": kind, "data": data}).to_string();
        let _ = self.commands.send(WsCommand::Frame(frame));
    }

    /// Record a successful history entry, then announce completion.
    pub(crate) fn complete(&self, prompt_id: &PromptId, outputs: Value) {
        self.add_history(
            prompt_id.as_str(),
            json!({
                "prompt": [],
                "outputs": outputs,
                "status": {
                    "status_str": "success",
                    "completed": true,
                    "messages": [
                        ["execution_start", {"prompt_id": prompt_id, "timestamp": 1000}],
                        ["execution_success", {"prompt_id": prompt_id, "timestamp": 2000}]
                    ]
                }
            }),
        );
        self.announce_completion(prompt_id, &outputs);
    }

    fn announce_completion(&self, prompt_id: &PromptId, outputs: &Value) {
        self.send_frame("execution_start", json!({"prompt_id": prompt_id}));
        self.send_frame(
            "executing",
            json!({"node": "3", "display_node": "3", "prompt_id": prompt_id}),
        );
        self.send_frame(
            "progress",
            json!({"value": 10, "max": 20, "prompt_id": prompt_id, "node": "3"}),
        );
        if let Some(nodes) = outputs.as_object() {
            for (node, output) in nodes {
                self.send_frame(
                    "executed",
                    json!({"node": node, "display_node": node, "output": output, "prompt_id": prompt_id}),
                );
            }
        }
        self.send_frame("executing", json!({"node": null, "prompt_id": prompt_id}));
        self.send_frame("execution_success", json!({"prompt_id": prompt_id}));
    }

    pub(crate) fn fail(&self, prompt_id: &PromptId, message: &str) {
        let error = json!({
            "prompt_id": prompt_id,
            "node_id": "3",
            "node_type": "KSampler",
            "exception_message": message,
            "exception_type": "RuntimeError",
            "traceback": [],
            "executed": []
        });
        self.add_history(
            prompt_id.as_str(),
            json!({
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_error", error]]
                }
            }),
        );
        self.send_frame("execution_start", json!({"prompt_id": prompt_id}));
        self.send_frame("execution_error", error);
    }

    pub(crate) fn interrupt_prompt(&self, prompt_id: &PromptId) {
        let data = json!({
            "prompt_id": prompt_id,
            "node_id": "3",
            "node_type": "KSampler",
            "executed": []
        });
        self.add_history(
            prompt_id.as_str(),
            json!({
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_interrupted", data]]
                }
            }),
        );
        self.send_frame("execution_interrupted", data);
    }
}

async fn event_stream(ws: WebSocketUpgrade, State(server): State<Arc<FakeState>>) -> Response {
    if server.refuse_ws.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(socket, server))
}

async fn serve_socket(mut socket: WebSocket, server: Arc<FakeState>) {
    let mut commands = server.commands.subscribe();
    server.connections.fetch_add(1, Ordering::SeqCst);

    let status = json!({
        "type": "status",
        "data": {"status": {"exec_info": {"queue_remaining": 0}}, "sid": "fake"}
    });
    if socket
        .send(AxumMessage::Text(status.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(WsCommand::Frame(text)) => {
                    if socket.send(AxumMessage::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(WsCommand::Drop) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}

async fn queue_prompt(
    State(server): State<Arc<FakeState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let script = server.script.lock().unwrap().clone();
    if let Script::Reject = script {
        return Json(json!({
            "prompt_id": "rejected",
            "number": 0,
            "node_errors": {"3": {"errors": [{"type": "value_not_in_list"}], "class_type": "KSampler"}}
        }));
    }

    let number = server.counter.fetch_add(1, Ordering::SeqCst) + 1;
    let prompt_id = PromptId::from(format!("prompt-{number}"));
    let seed = body["prompt"]["3"]["inputs"]["seed"].clone();
    server.submitted.lock().unwrap().push(body);

    let delayed = |server: Arc<FakeState>, prompt_id: PromptId, script: Script| {
        tokio::spawn(async move {
            let delay = match script {
                Script::EchoSeed => 150u64.saturating_sub(number as u64 * 50).max(20),
                _ => 30,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            match script {
                Script::Complete(outputs) => server.complete(&prompt_id, outputs),
                Script::EchoSeed => {
                    server.complete(&prompt_id, json!({"12": {"text": [seed.to_string()]}}))
                }
                Script::Fail(message) => server.fail(&prompt_id, &message),
                Script::CompleteWithoutHistory => {
                    server.announce_completion(&prompt_id, &json!({}))
                }
                _ => {}
            }
        });
    };

    match script {
        Script::Manual | Script::Reject => {}
        Script::HoldResponse => server.held.notified().await,
        Script::CompleteBeforeResponse(outputs) => {
            server.complete(&prompt_id, outputs);
            // Let the event frames reach the client before the response does
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        other => delayed(Arc::clone(&server), prompt_id.clone(), other),
    }

    Json(json!({"prompt_id": prompt_id, "number": number, "node_errors": {}}))
}

async fn history(
    State(server): State<Arc<FakeState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let history = server.history.lock().unwrap();
    match history.get(&id) {
        Some(entry) => Json(json!({ id.clone(): entry })),
        None => Json(json!({})),
    }
}

async fn full_history(State(server): State<Arc<FakeState>>) -> Json<Value> {
    let history = server.history.lock().unwrap();
    Json(serde_json::to_value(&*history).unwrap())
}

async fn view(
    State(server): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    server.view_hits.fetch_add(1, Ordering::SeqCst);
    {
        let mut failing = server.failing_views.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
        }
    }

    let filename = params.get("filename").cloned().unwrap_or_default();
    match server.files.lock().unwrap().get(&filename) {
        Some(bytes) => bytes.clone().into_response(),
        None => (StatusCode::NOT_FOUND, "no such file").into_response(),
    }
}

async fn queue(State(server): State<Arc<FakeState>>) -> Json<Value> {
    Json(server.queue.lock().unwrap().clone())
}

async fn delete_queued(
    State(server): State<Arc<FakeState>>,
    Json(body): Json<Value>,
) -> StatusCode {
    server.deleted.lock().unwrap().push(body);
    StatusCode::OK
}

async fn interrupt(State(server): State<Arc<FakeState>>) -> StatusCode {
    server.interrupts.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn upload_image(State(server): State<Arc<FakeState>>, mut multipart: Multipart) -> Response {
    let mut image = None;
    let mut overwrite = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("image") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.unwrap().to_vec();
                image = Some((filename, bytes));
            }
            Some("overwrite") => overwrite = Some(field.text().await.unwrap()),
            _ => {}
        }
    }

    let Some((filename, bytes)) = image else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    server.uploads.lock().unwrap().push(Upload {
        filename: filename.clone(),
        bytes,
        overwrite,
    });
    Json(json!({"name": filename, "subfolder": "", "type": "input"})).into_response()
}

/// Fast timings so reconnect and timeout paths finish quickly.
pub(crate) fn test_config(base_url: &str) -> ComfyConfig {
    ComfyConfig {
        ws_open_timeout: Duration::from_secs(2),
        ws_ping_interval: Duration::from_millis(200),
        ws_ping_timeout: Duration::from_secs(2),
        workflow_timeout: Duration::from_secs(5),
        download_retry_attempts: 3,
        download_retry_delay: Duration::from_millis(10),
        reconnect: ReconnectPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
        ..ComfyConfig::new(base_url)
    }
}

/// KSampler -> SaveImage graph with a text node, seed overridden to 42.
pub(crate) fn sample_document() -> WorkflowDocument {
    let mut document = WorkflowDocument::from_value(json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 1, "steps": 20}},
        "9": {"class_type": "SaveImage", "inputs": {"images": ["3", 0]}},
        "12": {"class_type": "ShowText", "inputs": {"text": "hello"}}
    }))
    .unwrap();
    document.set_input("3", "seed", 42);
    document
}
