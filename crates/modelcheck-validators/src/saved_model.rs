//! SavedModel decoding and graph session loading
//!
//! A graph-runtime artifact is a SavedModel export directory:
//!
//! ```text
//! saved_model.pb            serialized SavedModel protobuf
//! variables/variables.index checkpoint index
//! variables/variables.data-00000-of-00001
//! assets/...                files referenced by AssetFileDef
//! ```
//!
//! Loading a session selects the meta graph whose tag set equals the requested
//! tags, imports its graph, restores its variables and resolves its assets. A
//! failure at any step is reported as [`Error::ModelStructure`] carrying a
//! runtime-style load message.

use modelcheck_core::{Error, Result};
use prost::Message;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Binary SavedModel file name
pub const SAVED_MODEL_FILENAME_PB: &str = "saved_model.pb";

/// Text SavedModel file name
pub const SAVED_MODEL_FILENAME_PBTXT: &str = "saved_model.pbtxt";

/// Directory holding the variables checkpoint
pub const VARIABLES_DIRECTORY: &str = "variables";

/// Checkpoint index file inside [`VARIABLES_DIRECTORY`]
pub const VARIABLES_INDEX: &str = "variables.index";

/// Prefix of checkpoint data shards inside [`VARIABLES_DIRECTORY`]
pub const VARIABLES_DATA_PREFIX: &str = "variables.data-";

/// Directory holding asset files
pub const ASSETS_DIRECTORY: &str = "assets";

/// Tag of the serving meta graph
pub const SERVE_TAG: &str = "serve";

/// Ops that declare checkpointed state
const VARIABLE_OPS: &[&str] = &["Variable", "VariableV2", "VarHandleOp", "AutoReloadVariable"];

// Subset of the SavedModel protobuf schema needed to select and import a meta
// graph. Field tags follow the upstream .proto definitions; unknown fields are
// skipped by the decoder.

#[derive(Clone, PartialEq, Message)]
pub struct SavedModel {
    #[prost(int64, tag = "1")]
    pub saved_model_schema_version: i64,
    #[prost(message, repeated, tag = "2")]
    pub meta_graphs: Vec<MetaGraphDef>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetaGraphDef {
    #[prost(message, optional, tag = "1")]
    pub meta_info_def: Option<MetaInfoDef>,
    #[prost(message, optional, tag = "2")]
    pub graph_def: Option<GraphDef>,
    #[prost(map = "string, message", tag = "5")]
    pub signature_def: HashMap<String, SignatureDef>,
    #[prost(message, repeated, tag = "6")]
    pub asset_file_def: Vec<AssetFileDef>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetaInfoDef {
    #[prost(string, tag = "1")]
    pub meta_graph_version: String,
    #[prost(string, repeated, tag = "4")]
    pub tags: Vec<String>,
    #[prost(string, tag = "5")]
    pub tensorflow_version: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct GraphDef {
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeDef>,
    #[prost(message, optional, tag = "2")]
    pub library: Option<FunctionDefLibrary>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NodeDef {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub op: String,
    #[prost(string, repeated, tag = "3")]
    pub input: Vec<String>,
    #[prost(string, tag = "4")]
    pub device: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct FunctionDefLibrary {
    #[prost(message, repeated, tag = "1")]
    pub function: Vec<FunctionDef>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FunctionDef {
    #[prost(message, optional, tag = "1")]
    pub signature: Option<OpDef>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OpDef {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct SignatureDef {
    #[prost(map = "string, message", tag = "1")]
    pub inputs: HashMap<String, TensorInfo>,
    #[prost(map = "string, message", tag = "2")]
    pub outputs: HashMap<String, TensorInfo>,
    #[prost(string, tag = "3")]
    pub method_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorInfo {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct AssetFileDef {
    #[prost(message, optional, tag = "1")]
    pub tensor_info: Option<TensorInfo>,
    #[prost(string, tag = "2")]
    pub filename: String,
}

/// Facts about a loaded session, for logging
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    /// Tags of the selected meta graph
    pub tags: Vec<String>,

    /// Producer version recorded in the export, if any
    pub tensorflow_version: Option<String>,

    /// Number of graph nodes
    pub node_count: usize,

    /// Number of variable-declaring nodes
    pub variable_count: usize,

    /// Signature keys, sorted
    pub signatures: Vec<String>,

    /// Number of resolved asset files
    pub asset_count: usize,
}

/// A SavedModel meta graph loaded from disk
///
/// The session owns the decoded graph for as long as it lives; dropping it
/// releases everything it loaded.
pub struct GraphSession {
    export_dir: PathBuf,
    meta_graph: MetaGraphDef,
    metadata: SessionMetadata,
}

impl GraphSession {
    /// Load the meta graph tagged with exactly `tags` from `export_dir`
    pub fn load(export_dir: impl AsRef<Path>, tags: &[String]) -> Result<Self> {
        let export_dir = export_dir.as_ref().to_path_buf();
        let saved_model = read_saved_model(&export_dir)?;

        let meta_graph = find_meta_graph(saved_model, tags)?;
        let graph = meta_graph.graph_def.as_ref().ok_or_else(|| {
            Error::model_structure(format!(
                "MetaGraphDef associated with tags {} has no GraphDef",
                quote_tags(tags)
            ))
        })?;

        let variable_count = import_graph(graph)?;
        if variable_count > 0 {
            restore_variables(&export_dir)?;
        }
        let asset_count = resolve_assets(&export_dir, &meta_graph.asset_file_def)?;

        let mut signatures: Vec<String> = meta_graph.signature_def.keys().cloned().collect();
        signatures.sort();

        let info_def = meta_graph.meta_info_def.as_ref();
        let metadata = SessionMetadata {
            tags: info_def.map(|m| m.tags.clone()).unwrap_or_default(),
            tensorflow_version: info_def
                .map(|m| m.tensorflow_version.clone())
                .filter(|v| !v.is_empty()),
            node_count: graph.node.len(),
            variable_count,
            signatures,
            asset_count,
        };

        info!(
            "Loaded SavedModel from {:?}: {} nodes, {} variables, {} signatures",
            export_dir,
            metadata.node_count,
            metadata.variable_count,
            metadata.signatures.len()
        );

        Ok(Self {
            export_dir,
            meta_graph,
            metadata,
        })
    }

    /// Get session metadata
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    /// Get the selected meta graph
    pub fn meta_graph(&self) -> &MetaGraphDef {
        &self.meta_graph
    }

    /// Get the export directory
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }
}

impl Drop for GraphSession {
    fn drop(&mut self) {
        debug!("Closing graph session for {:?}", self.export_dir);
    }
}

/// Load and immediately close a session, mapping the outcome to a report
pub fn probe(export_dir: &Path, tags: &[String]) -> std::result::Result<(), String> {
    let session = GraphSession::load(export_dir, tags).map_err(|e| e.to_string())?;
    drop(session);
    Ok(())
}

fn read_saved_model(export_dir: &Path) -> Result<SavedModel> {
    let pb_path = export_dir.join(SAVED_MODEL_FILENAME_PB);
    if !pb_path.is_file() {
        if export_dir.join(SAVED_MODEL_FILENAME_PBTXT).is_file() {
            return Err(Error::model_structure(format!(
                "Text-format SavedModel at {} is not supported; export {}",
                export_dir.join(SAVED_MODEL_FILENAME_PBTXT).display(),
                SAVED_MODEL_FILENAME_PB
            )));
        }
        return Err(Error::model_structure(format!(
            "SavedModel file does not exist at: {}/{{{}|{}}}",
            export_dir.display(),
            SAVED_MODEL_FILENAME_PBTXT,
            SAVED_MODEL_FILENAME_PB
        )));
    }

    let bytes = std::fs::read(&pb_path).map_err(|e| {
        Error::model_structure(format!("Failed to read {}: {}", pb_path.display(), e))
    })?;

    let saved_model = SavedModel::decode(bytes.as_slice()).map_err(|e| {
        Error::model_structure(format!(
            "Error parsing SavedModel protocol buffer at {}: {}",
            pb_path.display(),
            e
        ))
    })?;

    if saved_model.meta_graphs.is_empty() {
        return Err(Error::model_structure(format!(
            "SavedModel at {} contains no MetaGraphDef",
            pb_path.display()
        )));
    }

    Ok(saved_model)
}

fn find_meta_graph(saved_model: SavedModel, tags: &[String]) -> Result<MetaGraphDef> {
    let wanted: BTreeSet<String> = tags.iter().cloned().collect();
    let mut available = Vec::new();

    for meta_graph in saved_model.meta_graphs {
        let graph_tags: BTreeSet<String> = meta_graph
            .meta_info_def
            .as_ref()
            .map(|m| m.tags.iter().cloned().collect())
            .unwrap_or_default();

        if graph_tags == wanted {
            return Ok(meta_graph);
        }

        available.push(format!(
            "[{}]",
            graph_tags.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    Err(Error::model_structure(format!(
        "MetaGraphDef associated with tags {} could not be found in SavedModel. Available tag-sets: {}",
        quote_tags(tags),
        available.join(", ")
    )))
}

/// Check node names, ops and input edges; returns the variable count
fn import_graph(graph: &GraphDef) -> Result<usize> {
    if graph.node.is_empty() {
        return Err(Error::model_structure("GraphDef contains no nodes"));
    }

    let mut names: HashSet<&str> = HashSet::with_capacity(graph.node.len());
    for (index, node) in graph.node.iter().enumerate() {
        if node.name.is_empty() {
            return Err(Error::model_structure(format!(
                "Node at index {} has an empty name",
                index
            )));
        }
        if node.op.is_empty() {
            return Err(Error::model_structure(format!(
                "Node '{}' has an empty op",
                node.name
            )));
        }
        if !names.insert(node.name.as_str()) {
            return Err(Error::model_structure(format!(
                "Duplicate node name in graph: '{}'",
                node.name
            )));
        }
    }

    for node in &graph.node {
        for input in &node.input {
            let source = input_node_name(input);
            if !names.contains(source) {
                return Err(Error::model_structure(format!(
                    "Node '{}': Unknown input node '{}'",
                    node.name, input
                )));
            }
        }
    }

    Ok(graph
        .node
        .iter()
        .filter(|n| VARIABLE_OPS.contains(&n.op.as_str()))
        .count())
}

/// `^ctrl`, `name:1` and `name` all refer to node `name`
fn input_node_name(input: &str) -> &str {
    let input = input.strip_prefix('^').unwrap_or(input);
    match input.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => input,
    }
}

fn restore_variables(export_dir: &Path) -> Result<()> {
    let variables_dir = export_dir.join(VARIABLES_DIRECTORY);
    let index = variables_dir.join(VARIABLES_INDEX);

    let index_len = std::fs::metadata(&index).map(|m| m.len()).map_err(|_| {
        Error::model_structure(format!(
            "Failed to restore variables: checkpoint index {} not found",
            index.display()
        ))
    })?;
    if index_len == 0 {
        return Err(Error::model_structure(format!(
            "Failed to restore variables: checkpoint index {} is empty",
            index.display()
        )));
    }

    let has_shard = std::fs::read_dir(&variables_dir)
        .map_err(|e| {
            Error::model_structure(format!(
                "Failed to restore variables: cannot list {}: {}",
                variables_dir.display(),
                e
            ))
        })?
        .filter_map(|entry| entry.ok())
        .any(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(VARIABLES_DATA_PREFIX)
        });

    if !has_shard {
        return Err(Error::model_structure(format!(
            "Failed to restore variables: no data shards found in {}",
            variables_dir.display()
        )));
    }

    Ok(())
}

fn resolve_assets(export_dir: &Path, assets: &[AssetFileDef]) -> Result<usize> {
    let assets_dir = export_dir.join(ASSETS_DIRECTORY);

    for asset in assets {
        let name = asset.filename.as_str();
        let plain = !name.is_empty()
            && Path::new(name).components().count() == 1
            && Path::new(name).file_name().is_some();
        if !plain {
            return Err(Error::model_structure(format!(
                "Asset file name '{}' is not a plain file name",
                name
            )));
        }

        let path = assets_dir.join(name);
        if !path.is_file() {
            return Err(Error::model_structure(format!(
                "Asset file not found: {}",
                path.display()
            )));
        }
    }

    Ok(assets.len())
}

fn quote_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| format!("'{}'", t))
        .collect::<Vec<_>>()
        .join(", ")
}
