//! Handler functions for the control server routes

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    GraphResponse, InputResponse, MessageResponse, NodeResponse, NodesResponse, StartRequest,
    StartResponse, StatusResponse, StopRequest, TailQuery, TailResponse,
};
use crate::api::routes::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use planflow_core::StopMode;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn start_workflow(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<StartResponse>> {
    Ok(Json(state.service.start(request).await?))
}

pub async fn workflow_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.service.status().await)
}

pub async fn workflow_nodes(State(state): State<AppState>) -> ApiResult<Json<NodesResponse>> {
    let workflow = state.service.require().await?;
    Ok(Json(workflow.node_records().await))
}

pub async fn workflow_graph(State(state): State<AppState>) -> ApiResult<Json<GraphResponse>> {
    let workflow = state.service.require().await?;
    Ok(Json(GraphResponse {
        edges: workflow.original_edges().await,
    }))
}

pub async fn workflow_input(State(state): State<AppState>) -> ApiResult<Json<InputResponse>> {
    let workflow = state.service.require().await?;
    Ok(Json(workflow.input_data().await))
}

pub async fn node_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NodeResponse>> {
    let workflow = state.service.require().await?;
    Ok(Json(workflow.node_details(&id).await?))
}

pub async fn node_stdout(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TailQuery>,
) -> ApiResult<Json<TailResponse>> {
    let workflow = state.service.require().await?;
    let (content, offset) = workflow.tail_stdout(&id, query.offset).await?;
    Ok(Json(TailResponse { content, offset }))
}

pub async fn stop_workflow(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let mode = request.mode.unwrap_or(StopMode::Graceful);
    state.service.stop(mode).await?;
    Ok(Json(MessageResponse {
        message: "workflow stopping".to_string(),
    }))
}

pub async fn restart_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.service.restart_node(&id).await?;
    Ok(Json(MessageResponse {
        message: format!("node {} restarting", id),
    }))
}

pub async fn skip_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.service.skip_node(&id).await?;
    Ok(Json(MessageResponse {
        message: format!("node {} skipped", id),
    }))
}

pub async fn request_shutdown(
    State(state): State<AppState>,
) -> ApiResult<Json<MessageResponse>> {
    if state.service.request_shutdown().await {
        Ok(Json(MessageResponse {
            message: "shutting down".to_string(),
        }))
    } else {
        Err(ApiError::Conflict(
            "cannot shut down while a workflow is running".to_string(),
        ))
    }
}
