//! Node model: statuses, node variants and the plain records handed to clients
//!
//! Nodes are a closed sum of two variants: a [`NodeKind::Block`] groups
//! children under an execution strategy, a [`NodeKind::Playbook`] launches one
//! external job. Block status is derived by the engine, never stored by the
//! declaration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Reserved id of the synthetic source node injected by the compiler
pub const START_NODE: &str = "_s";

/// Reserved id of the synthetic sink node injected by the compiler
pub const END_NODE: &str = "_e";

/// Reserved id of the root grouping node of the original (hierarchy) graph
pub const ROOT_NODE: &str = "_root";

/// Lifecycle status of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    NotStarted,
    PreRunning,
    Running,
    Ended,
    Failed,
    Skipped,
}

impl NodeStatus {
    /// True once the node no longer blocks its successors.
    pub fn is_settled(&self) -> bool {
        matches!(self, NodeStatus::Ended | NodeStatus::Skipped)
    }

    /// Rendering order used by status displays.
    pub fn order(&self) -> u8 {
        match self {
            NodeStatus::NotStarted => 0,
            NodeStatus::PreRunning => 1,
            NodeStatus::Running => 2,
            NodeStatus::Ended => 3,
            NodeStatus::Failed => 4,
            NodeStatus::Skipped => 5,
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            NodeStatus::NotStarted => "not_started",
            NodeStatus::PreRunning => "pre_running",
            NodeStatus::Running => "running",
            NodeStatus::Ended => "ended",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        };
        write!(f, "{}", token)
    }
}

/// Top-level status of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    NotStarted,
    Running,
    Ended,
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            WorkflowStatus::NotStarted => "not_started",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Ended => "ended",
            WorkflowStatus::Failed => "failed",
        };
        write!(f, "{}", token)
    }
}

/// Child scheduling strategy of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Serial,
    Parallel,
}

/// Everything needed to launch one playbook job
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybookSpec {
    /// Absolute path of the playbook to run
    pub playbook: PathBuf,
    /// Inventory path or comma separated host list
    pub inventory: String,
    /// Extra variables passed to the job, global `-e` merged over node vars
    pub extra_vars: BTreeMap<String, serde_json::Value>,
    /// Vault ids of the form `label@script`
    pub vault_ids: Vec<String>,
    /// Working directory for the job, when set
    pub project_path: Option<PathBuf>,
    pub check_mode: bool,
    pub diff_mode: bool,
    pub verbosity: u8,
    /// Host pattern limit
    pub limit: Option<String>,
}

/// The closed node sum
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Container node grouping children under a strategy
    Block { strategy: Strategy },
    /// Leaf node launching one external job
    Playbook(Box<PlaybookSpec>),
}

impl NodeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Block { .. } => "block",
            NodeKind::Playbook(_) => "playbook",
        }
    }
}

/// Static definition of a node, produced by the graph compiler
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique id; `_root`, `_s` and `_e` are reserved, commas are forbidden
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Swimlane tag, display only
    pub reference: Option<String>,
    pub kind: NodeKind,
}

impl Node {
    pub fn block(id: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            reference: None,
            kind: NodeKind::Block { strategy },
        }
    }

    pub fn is_playbook(&self) -> bool {
        matches!(self.kind, NodeKind::Playbook(_))
    }

    pub fn playbook_spec(&self) -> Option<&PlaybookSpec> {
        match &self.kind {
            NodeKind::Playbook(spec) => Some(spec),
            NodeKind::Block { .. } => None,
        }
    }
}

/// Plain per-node record handed to clients; UIs never see node objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    /// `block` or `playbook`
    #[serde(rename = "type")]
    pub kind: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// True when `id` is usable as a user supplied node id.
pub fn is_valid_user_id(id: &str) -> bool {
    !id.is_empty()
        && !id.contains(',')
        && id != START_NODE
        && id != END_NODE
        && id != ROOT_NODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tokens_are_lower_snake() {
        assert_eq!(NodeStatus::PreRunning.to_string(), "pre_running");
        assert_eq!(NodeStatus::NotStarted.to_string(), "not_started");
        assert_eq!(WorkflowStatus::Ended.to_string(), "ended");
        let json = serde_json::to_string(&NodeStatus::PreRunning).unwrap();
        assert_eq!(json, "\"pre_running\"");
    }

    #[test]
    fn settled_statuses() {
        assert!(NodeStatus::Ended.is_settled());
        assert!(NodeStatus::Skipped.is_settled());
        assert!(!NodeStatus::Failed.is_settled());
        assert!(!NodeStatus::Running.is_settled());
    }

    #[test]
    fn reserved_ids_are_rejected() {
        assert!(!is_valid_user_id("_s"));
        assert!(!is_valid_user_id("_e"));
        assert!(!is_valid_user_id("_root"));
        assert!(!is_valid_user_id("a,b"));
        assert!(!is_valid_user_id(""));
        assert!(is_valid_user_id("deploy_db"));
    }
}
