//! Response payloads returned by the ComfyUI HTTP API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use comfyrun_domain::{ExecutionFailure, PromptId};

/// Response of `POST /prompt`
#[derive(Debug, Clone, Deserialize)]
pub struct QueuePromptResponse {
    pub prompt_id: PromptId,
    /// Position the server assigned in its queue
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub node_errors: Value,
}

impl QueuePromptResponse {
    pub fn has_node_errors(&self) -> bool {
        match &self.node_errors {
            Value::Object(errors) => !errors.is_empty(),
            Value::Null => false,
            _ => true,
        }
    }
}

/// Response of `GET /history/<id>` and `GET /history`: prompt id -> entry
pub type HistoryResponse = HashMap<String, PromptHistory>;

/// Node id -> arbitrarily nested output tree
pub type OutputSnapshot = Map<String, Value>;

/// One finished (or failed) prompt in the server history
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptHistory {
    #[serde(default)]
    pub outputs: OutputSnapshot,
    #[serde(default)]
    pub status: Option<PromptStatus>,
}

impl PromptHistory {
    pub fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn is_success(&self) -> bool {
        self.status.as_ref().is_some_and(PromptStatus::is_success)
    }

    pub fn is_error(&self) -> bool {
        self.status.as_ref().is_some_and(PromptStatus::is_error)
    }
}

/// `status` block of a history entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[name, data]` pairs, e.g. `["execution_start", {"timestamp": ...}]`
    #[serde(default)]
    pub messages: Vec<(String, Value)>,
}

impl PromptStatus {
    pub fn is_success(&self) -> bool {
        self.completed || self.status_str == "success"
    }

    pub fn is_error(&self) -> bool {
        self.status_str == "error"
    }

    /// The server recorded an `execution_interrupted` message.
    pub fn is_interrupted(&self) -> bool {
        self.messages
            .iter()
            .any(|(name, _)| name == "execution_interrupted")
    }

    /// Latest `timestamp` (ms since epoch) among the status messages.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.messages
            .iter()
            .filter_map(|(_, data)| data.get("timestamp").and_then(Value::as_i64))
            .max()
    }

    /// Failure details from an `execution_error` status message.
    pub fn failure(&self) -> Option<ExecutionFailure> {
        let (_, data) = self
            .messages
            .iter()
            .find(|(name, _)| name == "execution_error")?;
        let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        Some(ExecutionFailure {
            node_id: text("node_id"),
            node_type: text("node_type"),
            exception_type: text("exception_type"),
            exception_message: text("exception_message").unwrap_or_default(),
        })
    }
}

/// Response of `GET /queue`
///
/// Entries are arrays `[number, prompt_id, prompt, extra_data, outputs]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queue_running: Vec<Value>,
    #[serde(default)]
    pub queue_pending: Vec<Value>,
}

/// A prompt sitting in the server queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub number: Option<i64>,
    pub prompt_id: PromptId,
}

impl QueueEntry {
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let prompt_id = items.get(1)?.as_str()?;
        Some(Self {
            number: items.first().and_then(Value::as_i64),
            prompt_id: PromptId::from(prompt_id),
        })
    }
}

impl QueueSnapshot {
    pub fn running(&self) -> Vec<QueueEntry> {
        self.queue_running
            .iter()
            .filter_map(QueueEntry::from_value)
            .collect()
    }

    /// Pending prompts in execution order.
    pub fn pending(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self
            .queue_pending
            .iter()
            .filter_map(QueueEntry::from_value)
            .collect();
        entries.sort_by_key(|entry| entry.number.unwrap_or(i64::MAX));
        entries
    }
}

/// Response of `POST /upload/image`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}
