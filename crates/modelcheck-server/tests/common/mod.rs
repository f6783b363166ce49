//! Shared fixtures: an in-test artifact server and archive builders

#![allow(dead_code)]

use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use modelcheck_server::ServiceConfig;
use modelcheck_validators::saved_model::{
    GraphDef, MetaGraphDef, MetaInfoDef, NodeDef, SavedModel, SAVED_MODEL_FILENAME_PB,
};
use modelcheck_validators::GraphConfig;
use prost::Message;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zip::write::SimpleFileOptions;

struct Served {
    files: HashMap<String, Bytes>,
    hits: AtomicUsize,
}

/// HTTP server on 127.0.0.1 serving fixed artifacts
///
/// `/artifacts/<name>` returns the artifact (404 if unknown); `/stall/<name>`
/// never answers in a useful time.
pub struct ArtifactServer {
    base: String,
    served: Arc<Served>,
}

impl ArtifactServer {
    pub async fn start(artifacts: Vec<(&str, Vec<u8>)>) -> Self {
        let served = Arc::new(Served {
            files: artifacts
                .into_iter()
                .map(|(name, data)| (name.to_string(), Bytes::from(data)))
                .collect(),
            hits: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route("/artifacts/:name", get(artifact))
            .route("/stall/:name", get(stall))
            .with_state(served.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            served,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/artifacts/{}", self.base, name)
    }

    pub fn stall_url(&self, name: &str) -> String {
        format!("{}/stall/{}", self.base, name)
    }

    /// Number of requests received so far
    pub fn hits(&self) -> usize {
        self.served.hits.load(Ordering::SeqCst)
    }
}

async fn artifact(
    State(served): State<Arc<Served>>,
    UrlPath(name): UrlPath<String>,
) -> impl IntoResponse {
    served.hits.fetch_add(1, Ordering::SeqCst);
    match served.files.get(&name) {
        Some(data) => (StatusCode::OK, data.clone()),
        None => (StatusCode::NOT_FOUND, Bytes::new()),
    }
}

async fn stall(State(served): State<Arc<Served>>, UrlPath(_name): UrlPath<String>) -> StatusCode {
    served.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(120)).await;
    StatusCode::OK
}

/// Zip archive holding `files` at its root
pub fn zip_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Static-file model with both companion files
pub fn static_model_zip() -> Vec<u8> {
    zip_archive(&[
        ("face-detection.bin", &[0x5a; 2048]),
        ("face-detection.xml", b"<?xml version=\"1.0\"?><net name=\"fd\"/>"),
    ])
}

/// Stateless SavedModel exported under the `serve` tag
pub fn saved_model_zip() -> Vec<u8> {
    let node = |name: &str, op: &str, inputs: &[&str]| NodeDef {
        name: name.to_string(),
        op: op.to_string(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        device: String::new(),
    };

    let model = SavedModel {
        saved_model_schema_version: 1,
        meta_graphs: vec![MetaGraphDef {
            meta_info_def: Some(MetaInfoDef {
                meta_graph_version: String::new(),
                tags: vec!["serve".to_string()],
                tensorflow_version: "1.13.1".to_string(),
            }),
            graph_def: Some(GraphDef {
                node: vec![
                    node("x", "Placeholder", &[]),
                    node("scale", "Const", &[]),
                    node("y", "Mul", &["x", "scale:0"]),
                ],
                library: None,
            }),
            signature_def: HashMap::new(),
            asset_file_def: Vec::new(),
        }],
    };

    zip_archive(&[(SAVED_MODEL_FILENAME_PB, &model.encode_to_vec())])
}

/// Configuration with scratch under `root` and in-process graph loading
pub fn test_config(root: &Path) -> ServiceConfig {
    ServiceConfig {
        scratch_root: root.to_path_buf(),
        graph: GraphConfig::in_process(),
        ..Default::default()
    }
}

/// Configuration with scratch under `root` and graph loading in `worker`
pub fn worker_config(root: &Path, worker: &Path) -> ServiceConfig {
    ServiceConfig {
        scratch_root: root.to_path_buf(),
        graph: GraphConfig::with_worker(worker),
        ..Default::default()
    }
}

/// Entries currently under the scratch root
pub fn scratch_entries(root: &Path) -> Vec<String> {
    match std::fs::read_dir(root) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
