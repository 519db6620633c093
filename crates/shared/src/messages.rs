//! Event-stream messages
//!
//! ComfyUI pushes JSON text frames shaped `{"type": "...", "data": {...}}` over
//! `/ws?clientId=...`. Binary frames carry previews and are not modelled here.
//! Unknown message types parse to [`ServerEvent::Unknown`] so newer servers do
//! not break older clients.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use comfyrun_domain::{ExecutionFailure, NodeId, PromptId};

/// A message received on the event stream
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Queue status broadcast (not tied to a prompt)
    Status {
        queue_remaining: Option<u64>,
        sid: Option<String>,
    },
    ExecutionStart {
        prompt_id: PromptId,
    },
    /// Nodes skipped because their outputs were cached
    ExecutionCached {
        prompt_id: PromptId,
        nodes: Vec<NodeId>,
    },
    /// A node started executing; `node: None` means the prompt finished
    Executing {
        prompt_id: Option<PromptId>,
        node: Option<NodeId>,
    },
    Progress {
        prompt_id: Option<PromptId>,
        node: Option<NodeId>,
        value: u64,
        max: u64,
    },
    /// A node produced output
    Executed {
        prompt_id: PromptId,
        node: NodeId,
        output: Value,
    },
    ExecutionSuccess {
        prompt_id: PromptId,
    },
    ExecutionError {
        prompt_id: PromptId,
        failure: ExecutionFailure,
    },
    ExecutionInterrupted {
        prompt_id: PromptId,
        node_id: Option<String>,
    },
    /// Unknown message type for forward compatibility
    Unknown {
        kind: String,
    },
}

/// Error when a text frame is not a usable event
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("not a ComfyUI event frame: {0}")]
    Frame(#[source] serde_json::Error),

    #[error("malformed '{kind}' event: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct StatusData {
    #[serde(default)]
    status: Option<StatusInner>,
    #[serde(default)]
    sid: Option<String>,
}

#[derive(Deserialize)]
struct StatusInner {
    #[serde(default)]
    exec_info: Option<ExecInfo>,
}

#[derive(Deserialize)]
struct ExecInfo {
    #[serde(default)]
    queue_remaining: Option<u64>,
}

#[derive(Deserialize)]
struct PromptData {
    prompt_id: PromptId,
}

#[derive(Deserialize)]
struct CachedData {
    prompt_id: PromptId,
    #[serde(default)]
    nodes: Vec<NodeId>,
}

#[derive(Deserialize)]
struct ExecutingData {
    #[serde(default)]
    prompt_id: Option<PromptId>,
    #[serde(default)]
    node: Option<NodeId>,
}

#[derive(Deserialize)]
struct ProgressData {
    #[serde(default)]
    prompt_id: Option<PromptId>,
    #[serde(default)]
    node: Option<NodeId>,
    #[serde(default)]
    value: u64,
    #[serde(default)]
    max: u64,
}

#[derive(Deserialize)]
struct ExecutedData {
    prompt_id: PromptId,
    node: NodeId,
    #[serde(default)]
    output: Value,
}

#[derive(Deserialize)]
struct ErrorData {
    prompt_id: PromptId,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    node_type: Option<String>,
    #[serde(default)]
    exception_type: Option<String>,
    #[serde(default)]
    exception_message: String,
}

#[derive(Deserialize)]
struct InterruptedData {
    prompt_id: PromptId,
    #[serde(default)]
    node_id: Option<String>,
}

impl ServerEvent {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, EventParseError> {
        let frame: RawFrame = serde_json::from_str(text).map_err(EventParseError::Frame)?;
        Self::from_frame(frame.kind, frame.data)
    }

    fn from_frame(kind: String, data: Value) -> Result<Self, EventParseError> {
        fn payload<T: for<'de> Deserialize<'de>>(
            kind: &str,
            data: Value,
        ) -> Result<T, EventParseError> {
            serde_json::from_value(data).map_err(|source| EventParseError::Payload {
                kind: kind.to_string(),
                source,
            })
        }

        let event = match kind.as_str() {
            "status" => {
                let data: StatusData = payload(&kind, data)?;
                Self::Status {
                    queue_remaining: data
                        .status
                        .and_then(|s| s.exec_info)
                        .and_then(|e| e.queue_remaining),
                    sid: data.sid,
                }
            }
            "execution_start" => {
                let data: PromptData = payload(&kind, data)?;
                Self::ExecutionStart {
                    prompt_id: data.prompt_id,
                }
            }
            "execution_cached" => {
                let data: CachedData = payload(&kind, data)?;
                Self::ExecutionCached {
                    prompt_id: data.prompt_id,
                    nodes: data.nodes,
                }
            }
            "executing" => {
                let data: ExecutingData = payload(&kind, data)?;
                Self::Executing {
                    prompt_id: data.prompt_id,
                    node: data.node,
                }
            }
            "progress" => {
                let data: ProgressData = payload(&kind, data)?;
                Self::Progress {
                    prompt_id: data.prompt_id,
                    node: data.node,
                    value: data.value,
                    max: data.max,
                }
            }
            "executed" => {
                let data: ExecutedData = payload(&kind, data)?;
                Self::Executed {
                    prompt_id: data.prompt_id,
                    node: data.node,
                    output: data.output,
                }
            }
            "execution_success" => {
                let data: PromptData = payload(&kind, data)?;
                Self::ExecutionSuccess {
                    prompt_id: data.prompt_id,
                }
            }
            "execution_error" => {
                let data: ErrorData = payload(&kind, data)?;
                Self::ExecutionError {
                    prompt_id: data.prompt_id,
                    failure: ExecutionFailure {
                        node_id: data.node_id,
                        node_type: data.node_type,
                        exception_type: data.exception_type,
                        exception_message: data.exception_message,
                    },
                }
            }
            "execution_interrupted" => {
                let data: InterruptedData = payload(&kind, data)?;
                Self::ExecutionInterrupted {
                    prompt_id: data.prompt_id,
                    node_id: data.node_id,
                }
            }
            _ => Self::Unknown { kind },
        };
        Ok(event)
    }

    /// Prompt this event belongs to, if any.
    pub fn prompt_id(&self) -> Option<&PromptId> {
        match self {
            Self::ExecutionStart { prompt_id }
            | Self::ExecutionCached { prompt_id, .. }
            | Self::Executed { prompt_id, .. }
            | Self::ExecutionSuccess { prompt_id }
            | Self::ExecutionError { prompt_id, .. }
            | Self::ExecutionInterrupted { prompt_id, .. } => Some(prompt_id),
            Self::Executing { prompt_id, .. } | Self::Progress { prompt_id, .. } => {
                prompt_id.as_ref()
            }
            Self::Status { .. } | Self::Unknown { .. } => None,
        }
    }

    /// Message type as it appears on the wire.
    pub fn kind(&self) -> &str {
        match self {
            Self::Status { .. } => "status",
            Self::ExecutionStart { .. } => "execution_start",
            Self::ExecutionCached { .. } => "execution_cached",
            Self::Executing { .. } => "executing",
            Self::Progress { .. } => "progress",
            Self::Executed { .. } => "executed",
            Self::ExecutionSuccess { .. } => "execution_success",
            Self::ExecutionError { .. } => "execution_error",
            Self::ExecutionInterrupted { .. } => "execution_interrupted",
            Self::Unknown { kind } => kind,
        }
    }
}
