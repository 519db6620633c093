//! comfyrun Domain
//!
//! Pure types for driving a ComfyUI server: workflow documents, output
//! requests and selectors, resolved outputs and the job lifecycle.
//! No I/O and no async runtime live here.

pub mod error;
pub mod ids;
pub mod job;
pub mod output;
pub mod selector;
pub mod workflow;

pub use error::DomainError;
pub use ids::{ClientId, NodeId, PromptId};
pub use job::{ExecutionFailure, JobStatus};
pub use output::{
    FileDescriptor, FileKind, IntoOutputRequests, OutputRequest, ResolvedNode, ResolvedOutput,
    ResolvedValue, DEFAULT_DOWNLOAD_KEY,
};
pub use selector::{
    file_descriptors, resolve, scan_file_descriptors, NotFoundReason, PathSegment,
    SelectorNotFound, SelectorPath,
};
pub use workflow::{OutputNode, UnmatchedReplacement, WorkflowDocument};
