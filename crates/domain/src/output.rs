//! Output requests, file descriptors and the resolved output mapping.

use std::fmt;
use std::path::PathBuf;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::NodeId;

/// Key under which the default download of a node is reported.
///
/// Kept identical to the marker string older tooling used so serialized
/// results keep their shape.
pub const DEFAULT_DOWNLOAD_KEY: &str = "DEFAULT_DOWNLOAD";

/// What to extract from a node's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputRequest {
    /// Download every file descriptor found under the node's outputs
    Default,
    /// Resolve a selector path such as `images[0].filename`
    Path(String),
}

impl OutputRequest {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    /// Key of this request in the resolved output mapping.
    pub fn key(&self) -> &str {
        match self {
            Self::Default => DEFAULT_DOWNLOAD_KEY,
            Self::Path(path) => path,
        }
    }
}

impl fmt::Display for OutputRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Anything that can be expanded into a list of output requests.
///
/// Lets `WorkflowDocument::request_output` accept `None`, a single path or a
/// list of paths.
pub trait IntoOutputRequests {
    fn into_output_requests(self) -> Vec<OutputRequest>;
}

impl IntoOutputRequests for OutputRequest {
    fn into_output_requests(self) -> Vec<OutputRequest> {
        vec![self]
    }
}

impl IntoOutputRequests for &str {
    fn into_output_requests(self) -> Vec<OutputRequest> {
        vec![OutputRequest::path(self)]
    }
}

impl IntoOutputRequests for String {
    fn into_output_requests(self) -> Vec<OutputRequest> {
        vec![OutputRequest::Path(self)]
    }
}

impl<T: IntoOutputRequests> IntoOutputRequests for Option<T> {
    fn into_output_requests(self) -> Vec<OutputRequest> {
        match self {
            Some(inner) => inner.into_output_requests(),
            None => vec![OutputRequest::Default],
        }
    }
}

impl<T: IntoOutputRequests> IntoOutputRequests for Vec<T> {
    fn into_output_requests(self) -> Vec<OutputRequest> {
        self.into_iter()
            .flat_map(IntoOutputRequests::into_output_requests)
            .collect()
    }
}

impl<T: IntoOutputRequests, const N: usize> IntoOutputRequests for [T; N] {
    fn into_output_requests(self) -> Vec<OutputRequest> {
        self.into_iter()
            .flat_map(IntoOutputRequests::into_output_requests)
            .collect()
    }
}

/// Folder type a server file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Output,
    Temp,
    Input,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Temp => "temp",
            Self::Input => "input",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "output" => Some(Self::Output),
            "temp" => Some(Self::Temp),
            "input" => Some(Self::Input),
            _ => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a file on the server, retrievable through `/view`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

impl FileDescriptor {
    pub fn new(filename: impl Into<String>, subfolder: impl Into<String>, kind: FileKind) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
            kind,
        }
    }

    /// Structural match: an object with a string `filename`.
    ///
    /// A missing `subfolder` is empty and a missing `type` means `output`.
    /// Objects with an unrecognised `type` are not treated as files.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let filename = object.get("filename")?.as_str()?;
        let subfolder = object
            .get("subfolder")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let kind = match object.get("type") {
            None | Some(Value::Null) => FileKind::Output,
            Some(kind) => FileKind::parse(kind.as_str()?)?,
        };
        Some(Self::new(filename, subfolder, kind))
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subfolder.is_empty() {
            write!(f, "{}/{}", self.kind, self.filename)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.subfolder, self.filename)
        }
    }
}

/// Value stored under one request key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    /// A single downloaded file
    File(PathBuf),
    /// Several downloaded files (or none)
    Files(Vec<PathBuf>),
    /// A raw output value, stringified
    Value(String),
    /// Why this request could not be resolved
    Error(String),
}

impl ResolvedValue {
    /// Collapse a list of downloads: one path stays a path, anything else is a list.
    pub fn from_paths(mut paths: Vec<PathBuf>) -> Self {
        if paths.len() == 1 {
            Self::File(paths.remove(0))
        } else {
            Self::Files(paths)
        }
    }

    /// Stringify a raw output value: strings verbatim, everything else as JSON.
    pub fn from_raw(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Value(s.clone()),
            other => Self::Value(other.to_string()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn as_error(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// Results for one output node, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    node_id: NodeId,
    entries: Vec<(String, ResolvedValue)>,
}

impl ResolvedNode {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            entries: Vec::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Insert or replace the value stored under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: ResolvedValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ResolvedValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ResolvedValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ResolvedNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Mapping returned by a workflow execution: node id -> request key -> value.
///
/// Nodes appear in the order they were first requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOutput {
    nodes: Vec<ResolvedNode>,
}

impl ResolvedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: ResolvedNode) {
        match self.nodes.iter_mut().find(|n| n.node_id == node.node_id) {
            Some(existing) => {
                for (key, value) in node.entries {
                    existing.insert(key, value);
                }
            }
            None => self.nodes.push(node),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&ResolvedNode> {
        self.nodes.iter().find(|n| n.node_id.as_str() == node_id)
    }

    /// Shortcut for `node(node_id)?.get(key)`.
    pub fn get(&self, node_id: &str, key: &str) -> Option<&ResolvedValue> {
        self.node(node_id)?.get(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of entries holding an error string.
    pub fn error_count(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.entries.iter())
            .filter(|(_, value)| value.is_error())
            .count()
    }
}

impl Serialize for ResolvedOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for node in &self.nodes {
            map.serialize_entry(node.node_id.as_str(), node)?;
        }
        map.end()
    }
}
