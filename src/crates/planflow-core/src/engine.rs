//! Execution engine: drives the compiled DAG from `_s` to `_e`
//!
//! One engine task owns all mutable workflow state. It wakes on a short
//! cadence and performs a step: settled nodes leave the runnable set and
//! their successors are launched once every predecessor has settled. Failures
//! stay node-local; the engine keeps draining concurrent peers and then waits
//! for the operator (restart or skip) instead of exiting. External commands
//! and queries serialize through the workflow guard.

use crate::compiler::CompiledGraphs;
use crate::declaration::Entry;
use crate::error::{Result, WorkflowError};
use crate::events::{EventBus, WorkflowEvent};
use crate::graph::DiGraph;
use crate::node::{
    Node, NodeKind, NodeRecord, NodeStatus, Strategy, WorkflowStatus, END_NODE, START_NODE,
};
use crate::runner::{next_free_ident, stdout_path, JobHandle, JobOutcome, JobRunner, LaunchSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

/// Engine step cadence.
const STEP_INTERVAL: Duration = Duration::from_millis(200);

/// Bounded wait on the resume signal while failed and awaiting the operator.
const RESUME_WAIT: Duration = Duration::from_secs(1);

/// Stop flavor requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// No new launches; in-flight jobs run to completion
    Graceful,
    /// Graceful, plus best-effort termination of live jobs
    Hard,
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub start_node: String,
    pub end_node: String,
    /// Stop after the validation pass
    pub verify_only: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_node: START_NODE.to_string(),
            end_node: END_NODE.to_string(),
            verify_only: false,
        }
    }
}

/// Per-node details returned by the node query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetails {
    #[serde(flatten)]
    pub record: NodeRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_vars: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,
}

/// Mutable runtime state of one node.
struct NodeState {
    node: Node,
    status: NodeStatus,
    skipped: bool,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    handle: Option<Box<dyn JobHandle>>,
    ident: Option<String>,
}

impl NodeState {
    fn new(node: Node) -> Self {
        Self {
            node,
            status: NodeStatus::NotStarted,
            skipped: false,
            started_at: None,
            ended_at: None,
            handle: None,
            ident: None,
        }
    }

    /// Current status, derived from the job handle for playbooks.
    fn live_status(&self) -> NodeStatus {
        if self.skipped {
            return NodeStatus::Skipped;
        }
        match (&self.node.kind, &self.handle) {
            (NodeKind::Playbook(_), Some(handle)) => {
                if handle.is_alive() {
                    NodeStatus::Running
                } else {
                    match handle.final_status() {
                        JobOutcome::Ok => NodeStatus::Ended,
                        JobOutcome::Failed | JobOutcome::WrongParameter => NodeStatus::Failed,
                    }
                }
            }
            _ => self.status,
        }
    }

    fn record(&self) -> NodeRecord {
        NodeRecord {
            id: self.node.id.clone(),
            kind: self.node.kind.tag().to_string(),
            status: self.live_status(),
            name: self.node.name.clone(),
            description: self.node.description.clone(),
            reference: self.node.reference.clone(),
            playbook: self
                .node
                .playbook_spec()
                .map(|s| s.playbook.display().to_string()),
            skipped: self.skipped,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

struct EngineState {
    execution: DiGraph,
    original: DiGraph,
    input: Vec<Entry>,
    nodes: HashMap<String, NodeState>,
    runnable: Vec<String>,
    status: WorkflowStatus,
    stop: Option<StopMode>,
    filter_nodes: Vec<String>,
    skip_nodes: Vec<String>,
    validation_errors: Vec<String>,
}

/// One workflow instance: compiled graphs, per-node state and the engine
/// entry points. The server owns exactly one at a time behind an `Arc`.
pub struct Workflow {
    state: Mutex<EngineState>,
    resume: Notify,
    events: EventBus,
    runner: Arc<dyn JobRunner>,
    workflow_file: PathBuf,
    artifact_dir: PathBuf,
}

impl Workflow {
    pub fn new(
        compiled: CompiledGraphs,
        runner: Arc<dyn JobRunner>,
        workflow_file: impl Into<PathBuf>,
        artifact_dir: impl Into<PathBuf>,
    ) -> Self {
        let nodes = compiled
            .nodes
            .into_iter()
            .map(|(id, node)| (id, NodeState::new(node)))
            .collect();
        Self {
            state: Mutex::new(EngineState {
                execution: compiled.execution,
                original: compiled.original,
                input: compiled.input,
                nodes,
                runnable: Vec::new(),
                status: WorkflowStatus::NotStarted,
                stop: None,
                filter_nodes: Vec::new(),
                skip_nodes: Vec::new(),
                validation_errors: Vec::new(),
            }),
            resume: Notify::new(),
            events: EventBus::default(),
            runner,
            workflow_file: workflow_file.into(),
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn workflow_file(&self) -> &Path {
        &self.workflow_file
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Register an event listener.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Restrict the run to the given nodes; everything else is skipped.
    pub async fn set_filter_nodes(&self, ids: Vec<String>) {
        self.state.lock().await.filter_nodes = ids;
    }

    /// Mark the given nodes as skipped before the run.
    pub async fn set_skip_nodes(&self, ids: Vec<String>) {
        self.state.lock().await.skip_nodes = ids;
    }

    pub async fn status(&self) -> WorkflowStatus {
        self.state.lock().await.status
    }

    pub async fn validation_errors(&self) -> Vec<String> {
        self.state.lock().await.validation_errors.clone()
    }

    pub async fn contains_node(&self, id: &str) -> bool {
        self.state.lock().await.nodes.contains_key(id)
    }

    /// Per-node records, in graph insertion order.
    pub async fn node_records(&self) -> Vec<NodeRecord> {
        let state = self.state.lock().await;
        state
            .execution
            .nodes()
            .filter_map(|id| state.nodes.get(id).map(NodeState::record))
            .collect()
    }

    pub async fn node_details(&self, id: &str) -> Result<NodeDetails> {
        let state = self.state.lock().await;
        let node_state = state
            .nodes
            .get(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        let record = node_state.record();
        let (inventory, extra_vars) = match node_state.node.playbook_spec() {
            Some(spec) => (Some(spec.inventory.clone()), spec.extra_vars.clone()),
            None => (None, BTreeMap::new()),
        };
        let strategy = match node_state.node.kind {
            NodeKind::Block { strategy } => Some(strategy),
            NodeKind::Playbook(_) => None,
        };
        Ok(NodeDetails {
            record,
            inventory,
            extra_vars,
            strategy,
            ident: node_state.ident.clone(),
        })
    }

    /// Edges of the original (hierarchy) graph, for UI tree building.
    pub async fn original_edges(&self) -> Vec<(String, String)> {
        self.state.lock().await.original.edges()
    }

    /// The declaration as loaded, every id filled in.
    pub async fn input_data(&self) -> Vec<Entry> {
        self.state.lock().await.input.clone()
    }

    /// Tail the stdout file of a playbook node.
    ///
    /// Returns the bytes from `offset` to EOF and the new EOF position; an
    /// absent file yields empty content at offset zero.
    pub async fn tail_stdout(&self, id: &str, offset: u64) -> Result<(String, u64)> {
        let path = {
            let state = self.state.lock().await;
            let node_state = state
                .nodes
                .get(id)
                .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
            if !node_state.node.is_playbook() {
                return Err(WorkflowError::Validation(format!(
                    "node '{}' is not a playbook node",
                    id
                )));
            }
            let ident = node_state.ident.clone().unwrap_or_else(|| id.to_string());
            stdout_path(&self.artifact_dir, &ident)
        };

        if !path.exists() {
            return Ok((String::new(), 0));
        }
        let mut file = std::fs::File::open(&path)?;
        let size = file.seek(SeekFrom::End(0))?;
        if offset >= size {
            return Ok((String::new(), size));
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = Vec::with_capacity((size - offset) as usize);
        file.read_to_end(&mut buffer)?;
        Ok((String::from_utf8_lossy(&buffer).into_owned(), size))
    }

    /// Request a stop. Graceful prevents new launches; hard additionally
    /// tries to terminate live jobs.
    pub async fn stop(&self, mode: StopMode) {
        let mut state = self.state.lock().await;
        info!(?mode, "stop requested");
        state.stop = Some(mode);
        if mode == StopMode::Hard {
            for id in state.runnable.clone() {
                if let Some(node_state) = state.nodes.get(&id) {
                    if let Some(handle) = &node_state.handle {
                        if handle.is_alive() && !handle.terminate() {
                            warn!(node = %id, "job did not accept termination");
                        }
                    }
                }
            }
        }
        self.resume.notify_one();
    }

    /// Re-launch a failed playbook node under a fresh ident.
    pub async fn restart_node(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let node_state = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        if !node_state.node.is_playbook() || node_state.live_status() != NodeStatus::Failed {
            return Err(WorkflowError::Validation(format!(
                "node '{}' is not in a failed state and cannot be restarted",
                id
            )));
        }
        info!(node = %id, "restarting failed node");
        node_state.handle = None;
        node_state.status = NodeStatus::NotStarted;
        node_state.ended_at = None;

        state.status = WorkflowStatus::Running;
        self.emit_workflow(
            WorkflowStatus::Running,
            format!("workflow resuming from node {}", id),
        );
        self.launch_node(&mut state, id);
        if !state.runnable.iter().any(|n| n == id) {
            state.runnable.push(id.to_string());
        }
        self.resume.notify_one();
        Ok(())
    }

    /// Mark a node skipped and let the scheduler flow through it.
    pub async fn skip_node(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let node_state = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        info!(node = %id, "skipping node");
        node_state.skipped = true;
        node_state.status = NodeStatus::Skipped;
        node_state.handle = None;
        let record = node_state.record();
        self.emit_node(NodeStatus::Skipped, record);

        if matches!(state.status, WorkflowStatus::Running | WorkflowStatus::Failed)
            && !state.runnable.iter().any(|n| n == id)
        {
            state.runnable.push(id.to_string());
        }
        if state.status == WorkflowStatus::Failed {
            state.status = WorkflowStatus::Running;
            self.emit_workflow(
                WorkflowStatus::Running,
                format!("workflow resuming after skipping node {}", id),
            );
        }
        self.resume.notify_one();
        Ok(())
    }

    /// Drive the workflow. Validation runs first; the loop then steps the
    /// runnable set until everything settles, the operator never resumes a
    /// failure, or a stop drains the in-flight jobs.
    pub async fn run(&self, options: RunOptions) {
        {
            let mut state = self.state.lock().await;
            match state.status {
                WorkflowStatus::Running => {
                    debug!("run requested while already running");
                    return;
                }
                WorkflowStatus::Ended | WorkflowStatus::Failed => {
                    warn!(status = %state.status, "run requested on a settled workflow");
                    return;
                }
                WorkflowStatus::NotStarted => {}
            }

            let errors = self.validate(&state);
            if !errors.is_empty() {
                for err in &errors {
                    error!("{}", err);
                }
                state.validation_errors = errors;
                state.status = WorkflowStatus::Failed;
                self.emit_workflow(
                    WorkflowStatus::Failed,
                    format!(
                        "workflow is not valid, see the logs at {}",
                        self.artifact_dir.display()
                    ),
                );
                return;
            }
            if options.verify_only {
                state.status = WorkflowStatus::Ended;
                self.emit_workflow(WorkflowStatus::Ended, "verification passed".to_string());
                return;
            }
            if !state.nodes.contains_key(&options.start_node) {
                error!(start = %options.start_node, "start node does not exist");
                state.status = WorkflowStatus::Failed;
                self.emit_workflow(
                    WorkflowStatus::Failed,
                    format!("start node not found: {}", options.start_node),
                );
                return;
            }

            self.apply_pruning(&mut state, &options);
            state.status = WorkflowStatus::Running;
            state.runnable.push(options.start_node.clone());
            info!(start = %options.start_node, end = %options.end_node, "workflow started");
            self.emit_workflow(WorkflowStatus::Running, options.start_node.clone());

            self.enter_node(&mut state, &options.start_node);
        }

        loop {
            let awaiting_operator = {
                let mut state = self.state.lock().await;
                if state.stop.is_some() && state.runnable.is_empty() {
                    break;
                }
                self.step(&mut state);

                if state.runnable.is_empty() && state.stop.is_none() {
                    if self.has_unsettled_playbook(&state) {
                        if state.status != WorkflowStatus::Failed {
                            state.status = WorkflowStatus::Failed;
                            self.emit_workflow(
                                WorkflowStatus::Failed,
                                "workflow failed, waiting for operator".to_string(),
                            );
                        }
                        true
                    } else {
                        state.status = WorkflowStatus::Ended;
                        info!("workflow ended");
                        self.emit_workflow(WorkflowStatus::Ended, options.end_node.clone());
                        return;
                    }
                } else {
                    false
                }
            };

            if awaiting_operator {
                let _ = tokio::time::timeout(RESUME_WAIT, self.resume.notified()).await;
            } else {
                tokio::time::sleep(STEP_INTERVAL).await;
            }
        }

        let mut state = self.state.lock().await;
        if state.status != WorkflowStatus::Ended {
            state.status = WorkflowStatus::Failed;
            info!("workflow stopped");
            self.emit_workflow(WorkflowStatus::Failed, "workflow stopped".to_string());
        }
    }

    /// One scheduler step over a snapshot of the runnable set.
    fn step(&self, state: &mut EngineState) {
        let snapshot = state.runnable.clone();
        for node_id in snapshot {
            let live = match state.nodes.get_mut(&node_id) {
                Some(node_state) => {
                    let live = node_state.live_status();
                    node_state.status = live;
                    live
                }
                None => continue,
            };

            match live {
                NodeStatus::Ended | NodeStatus::Skipped => {
                    state.runnable.retain(|n| n != &node_id);
                    if let Some(node_state) = state.nodes.get_mut(&node_id) {
                        if !node_state.skipped {
                            if node_state.ended_at.is_none() {
                                node_state.ended_at = Some(Utc::now());
                            }
                            let record = node_state.record();
                            info!(node = %node_id, status = %live, "node settled");
                            self.emit_node(NodeStatus::Ended, record);
                        }
                    }

                    let successors = state.execution.successors(&node_id).to_vec();
                    for next in successors {
                        if next == END_NODE
                            || state.stop.is_some()
                            || state.runnable.iter().any(|n| n == &next)
                            || !self.is_runnable(state, &next)
                        {
                            continue;
                        }
                        state.runnable.push(next.clone());
                        self.enter_node(state, &next);
                    }
                }
                NodeStatus::Failed => {
                    state.runnable.retain(|n| n != &node_id);
                    if let Some(node_state) = state.nodes.get_mut(&node_id) {
                        if node_state.ended_at.is_none() {
                            node_state.ended_at = Some(Utc::now());
                        }
                        let rejected = node_state
                            .handle
                            .as_ref()
                            .map(|h| h.final_status() == JobOutcome::WrongParameter)
                            .unwrap_or(false);
                        if rejected {
                            let err = WorkflowError::PlaybookParameter(node_id.clone());
                            error!(node = %node_id, "{}", err);
                        }
                        let record = node_state.record();
                        warn!(node = %node_id, "node failed");
                        self.emit_node(NodeStatus::Failed, record);
                    }
                    // successors stay not_started so the operator can restart
                }
                _ => {}
            }
        }
    }

    /// A node becomes runnable once every predecessor has settled.
    fn is_runnable(&self, state: &EngineState, id: &str) -> bool {
        state
            .execution
            .predecessors(id)
            .iter()
            .all(|prev| match state.nodes.get(prev) {
                Some(node_state) => node_state.live_status().is_settled(),
                None => false,
            })
    }

    /// Bring a node into the runnable set: blocks settle immediately,
    /// playbooks launch unless marked skipped.
    fn enter_node(&self, state: &mut EngineState, id: &str) {
        let launch = {
            let Some(node_state) = state.nodes.get_mut(id) else {
                return;
            };
            match &node_state.node.kind {
                NodeKind::Block { .. } => {
                    if node_state.skipped {
                        node_state.status = NodeStatus::Skipped;
                        let record = node_state.record();
                        info!(node = %id, "node skipped");
                        self.emit_node(NodeStatus::Skipped, record);
                    } else {
                        node_state.status = NodeStatus::Ended;
                    }
                    false
                }
                NodeKind::Playbook(_) => {
                    if node_state.skipped {
                        node_state.status = NodeStatus::Skipped;
                        let record = node_state.record();
                        info!(node = %id, "node skipped");
                        self.emit_node(NodeStatus::Skipped, record);
                        false
                    } else {
                        true
                    }
                }
            }
        };
        if launch {
            self.launch_node(state, id);
        }
    }

    /// Launch the playbook job of `id` and track its handle.
    fn launch_node(&self, state: &mut EngineState, id: &str) {
        let Some(node_state) = state.nodes.get_mut(id) else {
            return;
        };
        let Some(spec) = node_state.node.playbook_spec().cloned() else {
            return;
        };

        node_state.status = NodeStatus::PreRunning;
        let record = node_state.record();
        self.emit_node(NodeStatus::PreRunning, record);

        let ident = next_free_ident(&self.artifact_dir, id);
        node_state.ident = Some(ident.clone());
        node_state.started_at = Some(Utc::now());

        let launch = LaunchSpec {
            spec: &spec,
            artifact_dir: &self.artifact_dir,
            ident: &ident,
        };
        match self.runner.launch(&launch) {
            Ok(handle) => {
                node_state.handle = Some(handle);
                node_state.status = NodeStatus::Running;
                let record = node_state.record();
                info!(node = %id, ident = %ident, "node running");
                self.emit_node(NodeStatus::Running, record);
            }
            Err(e) => {
                error!(node = %id, error = %e, "job launch failed");
                node_state.status = NodeStatus::Failed;
                node_state.ended_at = Some(Utc::now());
                let record = node_state.record();
                self.emit_node(NodeStatus::Failed, record);
                state.runnable.retain(|n| n != id);
            }
        }
    }

    /// Skip pre-marking: filter set, skip set, everything before the start
    /// node and everything after the end node.
    fn apply_pruning(&self, state: &mut EngineState, options: &RunOptions) {
        if !state.filter_nodes.is_empty() {
            let keep: Vec<String> = state.filter_nodes.clone();
            for node_state in state.nodes.values_mut() {
                if !keep.iter().any(|k| k == &node_state.node.id) {
                    node_state.skipped = true;
                }
            }
        }
        for id in state.skip_nodes.clone() {
            if let Some(node_state) = state.nodes.get_mut(&id) {
                node_state.skipped = true;
            }
        }
        for id in state.execution.ancestors(&options.start_node) {
            if let Some(node_state) = state.nodes.get_mut(&id) {
                node_state.skipped = true;
            }
        }
        for id in state.execution.descendants(&options.end_node) {
            if let Some(node_state) = state.nodes.get_mut(&id) {
                node_state.skipped = true;
            }
        }
    }

    /// Pre-run validation of playbook inputs and graph shape.
    fn validate(&self, state: &EngineState) -> Vec<String> {
        let mut errors = Vec::new();
        for node_state in state.nodes.values() {
            let Some(spec) = node_state.node.playbook_spec() else {
                continue;
            };
            if !spec.playbook.is_file() {
                errors.push(format!(
                    "playbook '{}' of node '{}' does not exist",
                    spec.playbook.display(),
                    node_state.node.id
                ));
            }
            // a comma marks an inline host list, not a path
            if !spec.inventory.contains(',') && !Path::new(&spec.inventory).exists() {
                errors.push(format!(
                    "inventory '{}' of node '{}' does not exist",
                    spec.inventory, node_state.node.id
                ));
            }
            if let Some(project) = &spec.project_path {
                if !project.is_dir() {
                    errors.push(format!(
                        "project path '{}' of node '{}' does not exist",
                        project.display(),
                        node_state.node.id
                    ));
                }
            }
        }
        if let Some(node) = state.execution.find_cycle() {
            errors.push(format!("the workflow graph is cyclic at node '{}'", node));
        }
        errors
    }

    fn has_unsettled_playbook(&self, state: &EngineState) -> bool {
        state
            .nodes
            .values()
            .any(|ns| ns.node.is_playbook() && !ns.live_status().is_settled())
    }

    fn emit_node(&self, status: NodeStatus, node: NodeRecord) {
        debug!(node = %node.id, status = %status, "node event");
        self.events.emit(WorkflowEvent::Node { status, node });
    }

    fn emit_workflow(&self, status: WorkflowStatus, content: String) {
        debug!(status = %status, content = %content, "workflow event");
        self.events.emit(WorkflowEvent::Workflow { status, content });
    }
}
