//! Control server and client protocol for planflow
//!
//! A long-lived daemon owning one workflow instance at a time, exposing
//! load/run, stop, status, graph, stdout tail and per-node retry/skip over
//! HTTP. The client side mirrors the surface and can auto-launch a detached
//! server when none is reachable.

pub mod api;
pub mod client;
pub mod service;

pub use api::{create_router, AppState, StartRequest, StartResponse, StatusResponse};
pub use client::{ClientError, ClientResult, WorkflowClient};
pub use service::{WorkflowService, NO_WORKFLOW_LOADED};
