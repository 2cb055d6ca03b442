//! Error types for workflow loading, compilation and execution
//!
//! All errors implement `std::error::Error` via the `thiserror` crate. Load
//! errors reject the document before anything runs; runtime failures stay
//! node-local and are reported through events instead.

use thiserror::Error;

/// Errors that can occur while loading, compiling or driving a workflow
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The workflow document could not be parsed as YAML
    #[error("workflow YAML is not valid: {0}")]
    YamlNotValid(String),

    /// The workflow document parsed but violates the schema or graph rules
    #[error("workflow is not valid: {0}")]
    WorkflowNotValid(String),

    /// A node id is duplicated, reserved or contains forbidden characters
    #[error("invalid node id: {0}")]
    DuplicateNodeId(String),

    /// The workflow file extension is not a supported document type
    #[error("unsupported workflow file type: {0}")]
    UnsupportedFileType(String),

    /// A vault id references a script that does not exist on disk
    #[error("vault script not found: {0}")]
    VaultScriptNotFound(String),

    /// Pre-run validation of playbook inputs failed
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested start node is not part of the graph
    #[error("start node not found: {0}")]
    StartNodeNotFound(String),

    /// A node id referenced by an operation does not exist
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// A playbook was invoked with a parameter the runner rejects
    #[error("wrong playbook parameter: {0}")]
    PlaybookParameter(String),

    /// Launching a job for a node failed
    #[error("failed to launch job for node {node}: {reason}")]
    Launch { node: String, reason: String },

    /// The workflow reached a terminal failed state
    #[error("workflow failed")]
    WorkflowFailed,

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

impl WorkflowError {
    /// Stable process exit code for the CLI front-end.
    pub fn exit_code(&self) -> i32 {
        exit_code_for_kind(self.kind())
    }

    /// Machine-readable error kind token, as carried in RPC replies.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::YamlNotValid(_) => "yaml_not_valid",
            WorkflowError::WorkflowNotValid(_) => "workflow_not_valid",
            WorkflowError::DuplicateNodeId(_) => "duplicate_node_id",
            WorkflowError::UnsupportedFileType(_) => "unsupported_file_type",
            WorkflowError::VaultScriptNotFound(_) => "vault_script_not_found",
            WorkflowError::Validation(_) => "validation_error",
            WorkflowError::StartNodeNotFound(_) => "start_node_not_found",
            WorkflowError::NodeNotFound(_) => "node_not_found",
            WorkflowError::PlaybookParameter(_) => "playbook_wrong_parameter",
            WorkflowError::Launch { .. } => "launch_failed",
            WorkflowError::WorkflowFailed => "workflow_failed",
            WorkflowError::Io(_) => "io_error",
            WorkflowError::Serialization(_) => "serialization_error",
        }
    }
}

/// Map an error kind token back to its process exit code.
pub fn exit_code_for_kind(kind: &str) -> i32 {
    match kind {
        "yaml_not_valid" => 2,
        "workflow_not_valid" | "duplicate_node_id" => 3,
        "vault_script_not_found" => 4,
        "validation_error" => 5,
        "unsupported_file_type" => 6,
        "start_node_not_found" => 7,
        "playbook_wrong_parameter" => 8,
        "workflow_failed" => 9,
        _ => 1,
    }
}
