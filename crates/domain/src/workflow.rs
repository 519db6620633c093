//! Workflow Document
//!
//! In-memory job graph in ComfyUI API format (an object keyed by node id, each
//! node carrying `class_type` and `inputs`), plus the input overrides and output
//! requests recorded for one execution.

use serde_json::{Map, Value};

use crate::error::DomainError;
use crate::output::{IntoOutputRequests, OutputRequest};
use crate::NodeId;

/// Output requests recorded for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNode {
    pub node_id: NodeId,
    pub requests: Vec<OutputRequest>,
}

/// A replacement whose node does not exist in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedReplacement {
    pub node_id: NodeId,
    pub input_name: String,
}

/// Job graph plus per-execution overrides and output requests.
#[derive(Debug, Clone)]
pub struct WorkflowDocument {
    graph: Map<String, Value>,
    /// node id -> (input name, value), in first-set order
    replacements: Vec<(NodeId, Vec<(String, Value)>)>,
    outputs: Vec<OutputNode>,
}

impl WorkflowDocument {
    /// Wrap a job graph. The graph must be a JSON object.
    pub fn from_value(graph: Value) -> Result<Self, DomainError> {
        match graph {
            Value::Object(graph) => Ok(Self {
                graph,
                replacements: Vec::new(),
                outputs: Vec::new(),
            }),
            other => Err(DomainError::invalid_graph(format!(
                "expected an object keyed by node id, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse a job graph from API-format JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, DomainError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// The graph as loaded, without replacements.
    pub fn graph(&self) -> &Map<String, Value> {
        &self.graph
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.graph.contains_key(node_id)
    }

    /// Override an input value on a node. Last write wins.
    ///
    /// The value is not checked against the node's schema; the server does that.
    pub fn set_input(
        &mut self,
        node_id: impl Into<NodeId>,
        input_name: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        let node_id = node_id.into();
        let input_name = input_name.into();
        let value = value.into();

        let index = match self.replacements.iter().position(|(id, _)| *id == node_id) {
            Some(index) => index,
            None => {
                self.replacements.push((node_id, Vec::new()));
                self.replacements.len() - 1
            }
        };
        let inputs = &mut self.replacements[index].1;

        match inputs.iter_mut().find(|(name, _)| *name == input_name) {
            Some((_, slot)) => *slot = value,
            None => inputs.push((input_name, value)),
        }
        self
    }

    /// Current override for an input, if any.
    pub fn input_override(&self, node_id: &str, input_name: &str) -> Option<&Value> {
        self.replacements
            .iter()
            .find(|(id, _)| id.as_str() == node_id)?
            .1
            .iter()
            .find(|(name, _)| name == input_name)
            .map(|(_, value)| value)
    }

    /// Declare what to extract from a node once the job finishes.
    ///
    /// Accepts `None::<&str>` (default download), a path, or a list of paths.
    /// Requests already recorded for the node are skipped; first-seen order is kept.
    pub fn request_output(
        &mut self,
        node_id: impl Into<NodeId>,
        selection: impl IntoOutputRequests,
    ) -> &mut Self {
        let node_id = node_id.into();
        let requests = selection.into_output_requests();

        let index = match self.outputs.iter().position(|n| n.node_id == node_id) {
            Some(index) => index,
            None => {
                self.outputs.push(OutputNode {
                    node_id,
                    requests: Vec::new(),
                });
                self.outputs.len() - 1
            }
        };
        let node = &mut self.outputs[index];

        for request in requests {
            if !node.requests.contains(&request) {
                node.requests.push(request);
            }
        }
        self
    }

    /// Request the default download for a node.
    pub fn request_default(&mut self, node_id: impl Into<NodeId>) -> &mut Self {
        self.request_output(node_id, OutputRequest::Default)
    }

    /// Output requests in first-requested node order.
    pub fn output_nodes(&self) -> &[OutputNode] {
        &self.outputs
    }

    pub fn requests_for(&self, node_id: &str) -> Option<&[OutputRequest]> {
        self.outputs
            .iter()
            .find(|n| n.node_id.as_str() == node_id)
            .map(|n| n.requests.as_slice())
    }

    /// Replacements targeting nodes that are not in the graph.
    pub fn unmatched_replacements(&self) -> Vec<UnmatchedReplacement> {
        self.replacements
            .iter()
            .filter(|(node_id, _)| !self.graph.contains_key(node_id.as_str()))
            .flat_map(|(node_id, inputs)| {
                inputs.iter().map(move |(input_name, _)| UnmatchedReplacement {
                    node_id: node_id.clone(),
                    input_name: input_name.clone(),
                })
            })
            .collect()
    }

    /// The graph with all replacements applied, ready for `POST /prompt`.
    ///
    /// Replacements for nodes missing from the graph are skipped. A node
    /// without an `inputs` object gets one.
    pub fn to_prompt(&self) -> Value {
        let mut graph = self.graph.clone();

        for (node_id, inputs) in &self.replacements {
            let Some(Value::Object(node)) = graph.get_mut(node_id.as_str()) else {
                continue;
            };
            let node_inputs = node
                .entry("inputs")
                .or_insert_with(|| Value::Object(Map::new()));
            if !node_inputs.is_object() {
                *node_inputs = Value::Object(Map::new());
            }
            if let Value::Object(node_inputs) = node_inputs {
                for (name, value) in inputs {
                    node_inputs.insert(name.clone(), value.clone());
                }
            }
        }

        Value::Object(graph)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> WorkflowDocument {
        WorkflowDocument::from_value(json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1, "steps": 20}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "old", "clip": ["4", 1]}},
            "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI"}}
        }))
        .unwrap()
    }

    #[test]
    fn rejects_non_object_graph() {
        let err = WorkflowDocument::from_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, DomainError::InvalidGraph(_)));

        let err = WorkflowDocument::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, DomainError::Parse(_)));
    }

    #[test]
    fn set_input_last_write_wins() {
        let mut doc = sample();
        doc.set_input("3", "seed", 42).set_input("3", "seed", 7);

        assert_eq!(doc.input_override("3", "seed"), Some(&json!(7)));
        assert_eq!(doc.to_prompt()["3"]["inputs"]["seed"], json!(7));
    }

    #[test]
    fn to_prompt_merges_without_touching_original() {
        let mut doc = sample();
        doc.set_input("6", "text", "A beautiful cat");

        let prompt = doc.to_prompt();
        assert_eq!(prompt["6"]["inputs"]["text"], json!("A beautiful cat"));
        assert_eq!(prompt["6"]["inputs"]["clip"], json!(["4", 1]));
        assert_eq!(prompt["3"]["inputs"]["steps"], json!(20));
        assert_eq!(doc.graph()["6"]["inputs"]["text"], json!("old"));
    }

    #[test]
    fn to_prompt_creates_missing_inputs_object() {
        let mut doc = WorkflowDocument::from_value(json!({"1": {"class_type": "Noop"}})).unwrap();
        doc.set_input("1", "value", "x");

        assert_eq!(doc.to_prompt()["1"]["inputs"]["value"], json!("x"));
    }

    #[test]
    fn replacements_for_unknown_nodes_are_reported_not_added() {
        let mut doc = sample();
        doc.set_input("404", "text", "ghost");

        assert!(doc.to_prompt().get("404").is_none());
        assert_eq!(
            doc.unmatched_replacements(),
            vec![UnmatchedReplacement {
                node_id: NodeId::from("404"),
                input_name: "text".into(),
            }]
        );
    }

    #[test]
    fn request_output_deduplicates_and_keeps_order() {
        let mut doc = sample();
        doc.request_output("9", "images[0].filename")
            .request_default("9")
            .request_output("9", "images[0].filename")
            .request_output("9", vec!["images", "images[0].filename"])
            .request_output("9", None::<&str>)
            .request_output("6", "text[0]");

        assert_eq!(
            doc.requests_for("9").unwrap(),
            &[
                OutputRequest::path("images[0].filename"),
                OutputRequest::Default,
                OutputRequest::path("images"),
            ]
        );
        let order: Vec<&str> = doc.output_nodes().iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(order, vec!["9", "6"]);
    }

    #[test]
    fn nodes_without_requests_are_not_listed() {
        let doc = sample();
        assert!(doc.output_nodes().is_empty());
        assert!(doc.requests_for("9").is_none());
    }
}
