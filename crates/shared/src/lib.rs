//! comfyrun Shared - ComfyUI wire types
//!
//! This crate contains the payloads exchanged with a ComfyUI server:
//! - HTTP request bodies (`/prompt`, `/queue`)
//! - HTTP responses (`/prompt`, `/history`, `/queue`, `/upload/image`)
//! - Event-stream messages received over `/ws`
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde, serde_json and thiserror
//! 2. **No business logic** - Pure data types and serialization
//! 3. **Tolerant parsing** - Unknown fields are ignored, unknown event types kept

pub mod messages;
pub mod requests;
pub mod responses;

pub use messages::{EventParseError, ServerEvent};
pub use requests::{DeleteQueuedRequest, QueuePromptRequest};
pub use responses::{
    HistoryResponse, OutputSnapshot, PromptHistory, PromptStatus, QueueEntry, QueuePromptResponse,
    QueueSnapshot, UploadedFile,
};
