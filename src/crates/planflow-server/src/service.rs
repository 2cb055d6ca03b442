//! Singleton workflow service
//!
//! The server owns at most one workflow instance at a time. Loading compiles
//! the document, wires the per-workflow log files and spawns the engine
//! task; a second load against the same file reconnects instead of
//! reloading. Shutdown is only honored once the instance is in a terminal
//! state.
//!
//! Two log files live in the artifact directory: `workflow.log` receives the
//! engine task's tracing output, `main.log` records the operator-facing
//! operations (load, stop, restart, skip, shutdown).

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{StartRequest, StartResponse, StatusResponse};
use planflow_core::{
    load_workflow, JobRunner, LoadOptions, RunOptions, StopMode, Workflow, WorkflowError,
    WorkflowStatus, END_NODE, START_NODE,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::instrument::WithSubscriber;
use tracing::{dispatcher, info, warn, Dispatch};
use tracing_subscriber::EnvFilter;

/// Workflow-level status token used when nothing is loaded.
pub const NO_WORKFLOW_LOADED: &str = "no_workflow_loaded";

pub struct WorkflowService {
    workflow: Mutex<Option<Arc<Workflow>>>,
    /// Dispatch of the per-instance `main.log`, set at load time
    ops_log: Mutex<Option<Dispatch>>,
    runner: Arc<dyn JobRunner>,
    shutdown: Notify,
}

impl WorkflowService {
    pub fn new(runner: Arc<dyn JobRunner>) -> Arc<Self> {
        Arc::new(Self {
            workflow: Mutex::new(None),
            ops_log: Mutex::new(None),
            runner,
            shutdown: Notify::new(),
        })
    }

    /// The current instance, if one is loaded.
    pub async fn current(&self) -> Option<Arc<Workflow>> {
        self.workflow.lock().await.clone()
    }

    /// The current instance or a not-found error for the RPC surface.
    pub async fn require(&self) -> ApiResult<Arc<Workflow>> {
        self.current()
            .await
            .ok_or_else(|| ApiError::NotFound("no workflow is loaded".to_string()))
    }

    /// Load a workflow and launch the engine task.
    ///
    /// If an instance is already loaded for the same file the existing one is
    /// kept and `reconnected` is returned; a different file is a conflict.
    pub async fn start(&self, request: StartRequest) -> ApiResult<StartResponse> {
        let mut slot = self.workflow.lock().await;

        if let Some(existing) = slot.as_ref() {
            if existing.workflow_file() == request.workflow_file {
                info!(file = %request.workflow_file.display(), "client reconnected");
                self.log_op(format!("client reconnected to {}", request.workflow_file.display()))
                    .await;
                return Ok(StartResponse {
                    status: "reconnected".to_string(),
                    workflow_file: existing.workflow_file().display().to_string(),
                });
            }
            return Err(ApiError::Conflict(format!(
                "a different workflow is already loaded: {}",
                existing.workflow_file().display()
            )));
        }

        let load_options = LoadOptions {
            inventory: request.inventory.clone(),
            extra_vars: request.extra_vars.clone(),
            vault_ids: request.vault_ids.clone(),
            project_path: request.project_path.clone(),
            check_mode: request.check_mode,
            diff_mode: request.diff_mode,
            verbosity: request.verbosity,
            limit: request.limit.clone(),
            log_dir: request.log_dir.clone(),
            log_dir_no_info: request.log_dir_no_info,
        };
        let workflow = Arc::new(load_workflow(
            &request.workflow_file,
            &load_options,
            self.runner.clone(),
        )?);

        let start_node = request
            .start_from_node
            .clone()
            .unwrap_or_else(|| START_NODE.to_string());
        let end_node = request
            .end_to_node
            .clone()
            .unwrap_or_else(|| END_NODE.to_string());
        if !workflow.contains_node(&start_node).await {
            return Err(ApiError::Workflow(WorkflowError::StartNodeNotFound(
                start_node,
            )));
        }

        if !request.filter_nodes.is_empty() {
            workflow.set_filter_nodes(request.filter_nodes.clone()).await;
        }
        if !request.skip_nodes.is_empty() {
            workflow.set_skip_nodes(request.skip_nodes.clone()).await;
        }

        *self.ops_log.lock().await =
            Some(ops_dispatch(workflow.artifact_dir(), &request.log_level)?);
        self.log_op(format!(
            "workflow {} loaded, artifacts at {}",
            workflow.workflow_file().display(),
            workflow.artifact_dir().display()
        ))
        .await;

        self.spawn_engine(&workflow, &request, start_node, end_node)?;
        *slot = Some(workflow.clone());

        Ok(StartResponse {
            status: WorkflowStatus::Running.to_string(),
            workflow_file: workflow.workflow_file().display().to_string(),
        })
    }

    /// Spawn the engine task with its own `workflow.log` subscriber.
    fn spawn_engine(
        &self,
        workflow: &Arc<Workflow>,
        request: &StartRequest,
        start_node: String,
        end_node: String,
    ) -> ApiResult<()> {
        let log_path = workflow.artifact_dir().join("workflow.log");
        let log_file = std::fs::File::create(&log_path).map_err(WorkflowError::Io)?;
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(level_filter(&request.log_level))
            .with_writer(std::sync::Mutex::new(log_file))
            .with_ansi(false)
            .finish();

        let options = RunOptions {
            start_node,
            end_node,
            verify_only: request.verify_only,
        };
        let engine = workflow.clone();
        tokio::spawn(async move { engine.run(options).await }.with_subscriber(subscriber));
        Ok(())
    }

    /// Workflow status reply, including validation errors on failure.
    pub async fn status(&self) -> StatusResponse {
        match self.current().await {
            None => StatusResponse {
                status: NO_WORKFLOW_LOADED.to_string(),
                validation_errors: Vec::new(),
            },
            Some(workflow) => {
                let status = workflow.status().await;
                let validation_errors = if status == WorkflowStatus::Failed {
                    workflow.validation_errors().await
                } else {
                    Vec::new()
                };
                StatusResponse {
                    status: status.to_string(),
                    validation_errors,
                }
            }
        }
    }

    /// Signal cancellation; only valid while the workflow runs.
    pub async fn stop(&self, mode: StopMode) -> ApiResult<()> {
        let workflow = self.require().await?;
        if workflow.status().await != WorkflowStatus::Running {
            return Err(ApiError::NotFound(
                "no running workflow to stop".to_string(),
            ));
        }
        self.log_op(format!("stop requested ({:?})", mode)).await;
        workflow.stop(mode).await;
        Ok(())
    }

    /// Re-launch a failed node.
    pub async fn restart_node(&self, id: &str) -> ApiResult<()> {
        let workflow = self.require().await?;
        workflow.restart_node(id).await?;
        self.log_op(format!("node {} restarted", id)).await;
        Ok(())
    }

    /// Mark a node skipped and resume the drain.
    pub async fn skip_node(&self, id: &str) -> ApiResult<()> {
        let workflow = self.require().await?;
        workflow.skip_node(id).await?;
        self.log_op(format!("node {} skipped", id)).await;
        Ok(())
    }

    /// One-way shutdown request: honored only in a terminal state.
    pub async fn request_shutdown(&self) -> bool {
        let accept = match self.current().await {
            None => true,
            Some(workflow) => matches!(
                workflow.status().await,
                WorkflowStatus::Ended | WorkflowStatus::Failed | WorkflowStatus::NotStarted
            ),
        };
        if accept {
            info!("shutdown scheduled");
            self.log_op("shutdown scheduled".to_string()).await;
            self.shutdown.notify_one();
        } else {
            warn!("shutdown ignored while the workflow is running");
        }
        accept
    }

    /// Resolves once a shutdown request was accepted.
    pub async fn shutdown_signal(&self) {
        self.shutdown.notified().await;
    }

    /// Append one operator-facing line to the instance's `main.log`.
    async fn log_op(&self, message: String) {
        if let Some(dispatch) = self.ops_log.lock().await.as_ref() {
            dispatcher::with_default(dispatch, || info!("{}", message));
        }
    }
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Build the `main.log` dispatch for a freshly loaded instance.
fn ops_dispatch(artifact_dir: &Path, log_level: &str) -> ApiResult<Dispatch> {
    let ops_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(artifact_dir.join("main.log"))
        .map_err(WorkflowError::Io)?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(level_filter(log_level))
        .with_writer(std::sync::Mutex::new(ops_file))
        .with_ansi(false)
        .finish();
    Ok(Dispatch::new(subscriber))
}
