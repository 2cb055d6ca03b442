//! Request and response records of the control server
//!
//! Payloads are plain language-neutral records; enumerations travel as
//! lower-snake-case tokens.

use planflow_core::{Entry, NodeDetails, NodeRecord, StopMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load-and-run request for `POST /workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub workflow_file: PathBuf,
    #[serde(default)]
    pub inventory: String,
    #[serde(default)]
    pub extra_vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub vault_ids: Vec<String>,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    #[serde(default)]
    pub check_mode: bool,
    #[serde(default)]
    pub diff_mode: bool,
    #[serde(default)]
    pub verbosity: u8,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub start_from_node: Option<String>,
    #[serde(default)]
    pub end_to_node: Option<String>,
    #[serde(default)]
    pub skip_nodes: Vec<String>,
    #[serde(default)]
    pub filter_nodes: Vec<String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub log_dir_no_info: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub verify_only: bool,
}

impl StartRequest {
    pub fn new(workflow_file: impl Into<PathBuf>) -> Self {
        Self {
            workflow_file: workflow_file.into(),
            inventory: String::new(),
            extra_vars: BTreeMap::new(),
            vault_ids: Vec::new(),
            project_path: None,
            check_mode: false,
            diff_mode: false,
            verbosity: 0,
            limit: None,
            start_from_node: None,
            end_to_node: None,
            skip_nodes: Vec::new(),
            filter_nodes: Vec::new(),
            log_dir: default_log_dir(),
            log_dir_no_info: false,
            log_level: default_log_level(),
            verify_only: false,
        }
    }
}

/// Reply to a load-and-run request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    /// `running`, or `reconnected` when an instance was already loaded
    pub status: String,
    /// The file of the owning instance
    pub workflow_file: String,
}

/// Workflow-level status reply; `no_workflow_loaded` when nothing is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

/// Original-graph edges for UI tree building.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphResponse {
    pub edges: Vec<(String, String)>,
}

/// The nested declaration as loaded, ids filled in.
pub type InputResponse = Vec<Entry>;

/// Per-node records, in graph order.
pub type NodesResponse = Vec<NodeRecord>;

/// Per-node details reply.
pub type NodeResponse = NodeDetails;

/// Query string of the stdout tail endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailQuery {
    #[serde(default)]
    pub offset: u64,
}

/// Stdout tail reply: bytes from the requested offset and the new EOF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailResponse {
    pub content: String,
    pub offset: u64,
}

/// Body of the stop request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub mode: Option<StopMode>,
}

/// Generic acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_fills_defaults() {
        let request: StartRequest =
            serde_json::from_str(r#"{"workflow_file": "wf.yml"}"#).unwrap();
        assert_eq!(request.log_dir, PathBuf::from("logs"));
        assert_eq!(request.log_level, "info");
        assert!(!request.verify_only);
        assert!(request.filter_nodes.is_empty());
    }

    #[test]
    fn stop_request_mode_is_optional() {
        let request: StopRequest = serde_json::from_str("{}").unwrap();
        assert!(request.mode.is_none());
        let request: StopRequest = serde_json::from_str(r#"{"mode": "hard"}"#).unwrap();
        assert_eq!(request.mode, Some(StopMode::Hard));
    }
}
