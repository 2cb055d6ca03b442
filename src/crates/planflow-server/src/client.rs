//! Typed HTTP client for the control server
//!
//! Mirrors the RPC surface and adds the auto-launch handshake: when no
//! server answers, a detached `planflow-server` process is spawned and the
//! client waits a small budget for it to come up.

use crate::api::models::{
    GraphResponse, MessageResponse, StartRequest, StartResponse, StatusResponse, StopRequest,
    TailResponse,
};
use crate::api::ApiErrorBody;
use planflow_core::{Entry, NodeDetails, NodeRecord, StopMode};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// How long the client waits for an auto-launched server to register.
const LAUNCH_BUDGET: Duration = Duration::from_secs(3);
const LAUNCH_POLL: Duration = Duration::from_millis(200);

/// Client-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure: connection lost, refused, decode error
    #[error("connection error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server replied with an error body
    #[error("server error [{code}]: {message}")]
    Api { code: String, message: String },

    /// The server never became reachable
    #[error("the control server did not come up at {0}")]
    ServerUnavailable(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// HTTP client over the control server surface.
#[derive(Debug, Clone)]
pub struct WorkflowClient {
    base_url: String,
    http: reqwest::Client,
}

impl WorkflowClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when a server answers the health check.
    pub async fn is_server_up(&self) -> bool {
        self.http
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Make sure a server is reachable, spawning a detached one if needed.
    pub async fn ensure_server(&self, server_program: &str) -> ClientResult<()> {
        if self.is_server_up().await {
            return Ok(());
        }
        info!(program = server_program, "control server not found, starting it");
        Command::new(server_program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|_| ClientError::ServerUnavailable(self.base_url.clone()))?;

        let deadline = tokio::time::Instant::now() + LAUNCH_BUDGET;
        while tokio::time::Instant::now() < deadline {
            if self.is_server_up().await {
                return Ok(());
            }
            tokio::time::sleep(LAUNCH_POLL).await;
        }
        Err(ClientError::ServerUnavailable(self.base_url.clone()))
    }

    pub async fn start(&self, request: &StartRequest) -> ClientResult<StartResponse> {
        let response = self
            .http
            .post(format!("{}/workflow", self.base_url))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn status(&self) -> ClientResult<StatusResponse> {
        let response = self
            .http
            .get(format!("{}/workflow", self.base_url))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn nodes(&self) -> ClientResult<Vec<NodeRecord>> {
        let response = self
            .http
            .get(format!("{}/workflow/nodes", self.base_url))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn graph(&self) -> ClientResult<GraphResponse> {
        let response = self
            .http
            .get(format!("{}/workflow/graph", self.base_url))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn input_data(&self) -> ClientResult<Vec<Entry>> {
        let response = self
            .http
            .get(format!("{}/workflow/input", self.base_url))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn node_details(&self, id: &str) -> ClientResult<NodeDetails> {
        let response = self
            .http
            .get(format!("{}/workflow/node/{}", self.base_url, id))
            .send()
            .await?;
        decode(response).await
    }

    /// Tail a node's stdout from `offset`; poll on a ≥500 ms cadence.
    pub async fn tail_stdout(&self, id: &str, offset: u64) -> ClientResult<TailResponse> {
        let response = self
            .http
            .get(format!("{}/workflow/node/{}/stdout", self.base_url, id))
            .query(&[("offset", offset)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn stop(&self, mode: StopMode) -> ClientResult<MessageResponse> {
        let response = self
            .http
            .post(format!("{}/workflow/stop", self.base_url))
            .json(&StopRequest { mode: Some(mode) })
            .send()
            .await?;
        decode(response).await
    }

    pub async fn restart_node(&self, id: &str) -> ClientResult<MessageResponse> {
        let response = self
            .http
            .post(format!("{}/workflow/node/{}/restart", self.base_url, id))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn skip_node(&self, id: &str) -> ClientResult<MessageResponse> {
        let response = self
            .http
            .post(format!("{}/workflow/node/{}/skip", self.base_url, id))
            .send()
            .await?;
        decode(response).await
    }

    /// One-way: the server shuts itself down once terminal.
    pub async fn request_shutdown(&self) -> ClientResult<MessageResponse> {
        let response = self
            .http
            .post(format!("{}/shutdown", self.base_url))
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    debug!(status = %status, "server replied with an error");
    match response.json::<ApiErrorBody>().await {
        Ok(body) => Err(ClientError::Api {
            code: body.code,
            message: body.message,
        }),
        Err(_) => Err(ClientError::Api {
            code: status_code_token(status),
            message: format!("unexpected reply with status {}", status),
        }),
    }
}

fn status_code_token(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("unknown")
        .to_lowercase()
        .replace(' ', "_")
}
