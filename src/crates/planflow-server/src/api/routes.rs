//! Route definitions of the control server

use crate::api::handlers;
use crate::service::WorkflowService;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
}

/// Build the complete router over the workflow service.
pub fn create_router(service: Arc<WorkflowService>) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/workflow",
            post(handlers::start_workflow).get(handlers::workflow_status),
        )
        .route("/workflow/nodes", get(handlers::workflow_nodes))
        .route("/workflow/graph", get(handlers::workflow_graph))
        .route("/workflow/input", get(handlers::workflow_input))
        .route("/workflow/node/:id", get(handlers::node_details))
        .route("/workflow/node/:id/stdout", get(handlers::node_stdout))
        .route("/workflow/stop", post(handlers::stop_workflow))
        .route("/workflow/node/:id/restart", post(handlers::restart_node))
        .route("/workflow/node/:id/skip", post(handlers::skip_node))
        .route("/shutdown", post(handlers::request_shutdown))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
