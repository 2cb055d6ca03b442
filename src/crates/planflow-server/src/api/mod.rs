//! HTTP RPC surface of the control server

pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;

pub use error::{ApiError, ApiErrorBody, ApiResult};
pub use models::{
    GraphResponse, MessageResponse, StartRequest, StartResponse, StatusResponse, StopRequest,
    TailQuery, TailResponse,
};
pub use routes::{create_router, AppState};
