//! Output collection
//!
//! Turns a finished prompt's output snapshot into a [`ResolvedOutput`] by
//! evaluating every requested selector and downloading the files they point
//! at. All downloads for one collection run concurrently.

use std::path::{Path, PathBuf};

use futures_util::future::join_all;
use serde_json::Value;

use comfyrun_domain::{
    file_descriptors, resolve, scan_file_descriptors, FileDescriptor, OutputRequest,
    ResolvedNode, ResolvedOutput, ResolvedValue, WorkflowDocument,
};
use comfyrun_shared::OutputSnapshot;

use crate::fetcher::ArtifactFetcher;

/// Resolve every output request of `document` against `snapshot`.
///
/// Per-request failures become error strings; this never fails as a whole.
pub async fn collect_outputs(
    fetcher: &ArtifactFetcher,
    document: &WorkflowDocument,
    snapshot: &OutputSnapshot,
    output_dir: &Path,
) -> ResolvedOutput {
    let mut tasks = Vec::new();
    for node in document.output_nodes() {
        let node_output = snapshot.get(node.node_id.as_str()).unwrap_or(&Value::Null);
        for request in &node.requests {
            tasks.push(async move {
                let value = resolve_request(fetcher, request, node_output, output_dir).await;
                (node.node_id.clone(), request.key().to_string(), value)
            });
        }
    }

    let mut output = ResolvedOutput::new();
    for (node_id, key, value) in join_all(tasks).await {
        let mut node = ResolvedNode::new(node_id);
        node.insert(key, value);
        output.push(node);
    }
    output
}

async fn resolve_request(
    fetcher: &ArtifactFetcher,
    request: &OutputRequest,
    node_output: &Value,
    output_dir: &Path,
) -> ResolvedValue {
    match request {
        OutputRequest::Default => {
            let descriptors: Vec<FileDescriptor> = scan_file_descriptors(node_output)
                .into_iter()
                .map(|(_, descriptor)| descriptor)
                .collect();
            download_all(fetcher, &descriptors, output_dir).await
        }
        OutputRequest::Path(path) => match resolve(node_output, path) {
            Ok(value) => match file_descriptors(value) {
                Some(descriptors) => download_all(fetcher, &descriptors, output_dir).await,
                None => ResolvedValue::from_raw(value),
            },
            Err(not_found) => ResolvedValue::error(not_found.to_string()),
        },
    }
}

/// Download every descriptor; the first failure becomes the entry's error.
async fn download_all(
    fetcher: &ArtifactFetcher,
    descriptors: &[FileDescriptor],
    output_dir: &Path,
) -> ResolvedValue {
    let results = join_all(
        descriptors
            .iter()
            .map(|descriptor| fetcher.fetch(descriptor, output_dir)),
    )
    .await;

    let mut paths: Vec<PathBuf> = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(path) => paths.push(path),
            Err(e) => return ResolvedValue::error(e.to_string()),
        }
    }
    ResolvedValue::from_paths(paths)
}
