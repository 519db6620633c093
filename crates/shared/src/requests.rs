//! Request bodies sent to the ComfyUI HTTP API.

use serde::Serialize;
use serde_json::Value;

use comfyrun_domain::PromptId;

/// Body of `POST /prompt`
#[derive(Debug, Serialize)]
pub struct QueuePromptRequest<'a> {
    pub prompt: &'a Value,
    pub client_id: String,
}

/// Body of `POST /queue` removing pending prompts
#[derive(Debug, Serialize)]
pub struct DeleteQueuedRequest<'a> {
    pub delete: &'a [PromptId],
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queue_prompt_body_shape() {
        let graph = json!({"3": {"class_type": "KSampler", "inputs": {}}});
        let body = QueuePromptRequest {
            prompt: &graph,
            client_id: "c1".into(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"prompt": graph, "client_id": "c1"})
        );
    }

    #[test]
    fn delete_body_lists_prompt_ids() {
        let ids = [PromptId::from("a"), PromptId::from("b")];
        let body = DeleteQueuedRequest { delete: &ids };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"delete": ["a", "b"]})
        );
    }
}
