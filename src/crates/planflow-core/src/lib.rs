//! Core engine for playbook workflows
//!
//! A workflow is declared as a nested YAML list of playbook invocations
//! grouped into blocks with serial or parallel strategies. This crate
//! compiles that declaration into a DAG with `_s`/`_e` sentinels, then
//! drives the DAG concurrently: playbook jobs launch as their predecessors
//! settle, failures stay node-local, and the operator can restart or skip
//! failed nodes while the rest of the graph drains.
//!
//! The playbook backend is abstract: the engine only talks to a
//! [`runner::JobRunner`], and UIs only consume plain records and the typed
//! event stream.

pub mod compiler;
pub mod declaration;
pub mod draw;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod loader;
pub mod node;
pub mod runner;

pub use compiler::{compile, CompileOptions, CompiledGraphs};
pub use declaration::{parse_document, Entry};
pub use draw::{DotDrawer, GraphDrawer};
pub use engine::{NodeDetails, RunOptions, StopMode, Workflow};
pub use error::{exit_code_for_kind, Result, WorkflowError};
pub use events::{EventBus, WorkflowEvent};
pub use graph::DiGraph;
pub use loader::{load_workflow, LoadOptions};
pub use node::{
    Node, NodeKind, NodeRecord, NodeStatus, PlaybookSpec, Strategy, WorkflowStatus, END_NODE,
    ROOT_NODE, START_NODE,
};
pub use runner::{JobHandle, JobOutcome, JobRunner, LaunchSpec, ProcessRunner};
