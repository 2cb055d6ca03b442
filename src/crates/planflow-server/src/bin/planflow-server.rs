//! Control server binary
//!
//! Owns the singleton workflow instance and serves the RPC surface until a
//! shutdown is requested or the process receives Ctrl-C.

use planflow_core::ProcessRunner;
use planflow_server::{create_router, WorkflowService};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8440".to_string())
        .parse::<u16>()?;
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    let service = WorkflowService::new(Arc::new(ProcessRunner::new()));
    let router = create_router(service.clone());

    tracing::info!("control server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(service))
        .await?;
    tracing::info!("control server stopped");
    Ok(())
}

async fn shutdown_signal(service: Arc<WorkflowService>) {
    tokio::select! {
        _ = service.shutdown_signal() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }
}
