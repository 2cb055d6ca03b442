//! Round-trip tests of the control server: one ephemeral server per test,
//! driven through the typed client.

use planflow_core::ProcessRunner;
use planflow_server::{
    create_router, ClientError, StartRequest, WorkflowClient, WorkflowService,
    NO_WORKFLOW_LOADED,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct TestServer {
    base_url: String,
    service: Arc<WorkflowService>,
    handle: tokio::task::JoinHandle<()>,
}

async fn serve() -> TestServer {
    let service = WorkflowService::new(Arc::new(ProcessRunner::with_program("true")));
    let router = create_router(service.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = service.clone();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.shutdown_signal().await })
            .await
            .unwrap();
    });
    TestServer {
        base_url,
        service,
        handle,
    }
}

fn write_fixture(dir: &Path) -> PathBuf {
    std::fs::write(dir.join("site.yml"), "- hosts: all\n").unwrap();
    std::fs::write(dir.join("hosts"), "[all]\nlocalhost\n").unwrap();
    let workflow = dir.join("deploy.yml");
    std::fs::write(
        &workflow,
        "- import_playbook: site.yml\n  id: p1\n- import_playbook: site.yml\n  id: p2\n",
    )
    .unwrap();
    workflow
}

fn request_for(dir: &Path, workflow: &Path) -> StartRequest {
    let mut request = StartRequest::new(workflow);
    request.inventory = dir.join("hosts").display().to_string();
    request.log_dir = dir.join("logs");
    request
}

async fn wait_status(client: &WorkflowClient, expected: &str) {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if client.status().await.unwrap().status == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("workflow never reached status {}", expected));
}

#[tokio::test]
async fn status_without_a_workflow_is_no_workflow_loaded() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    assert!(client.is_server_up().await);
    assert_eq!(client.status().await.unwrap().status, NO_WORKFLOW_LOADED);
}

#[tokio::test]
async fn load_run_and_query_a_workflow() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    let dir = TempDir::new().unwrap();
    let workflow = write_fixture(dir.path());

    let reply = client.start(&request_for(dir.path(), &workflow)).await.unwrap();
    assert_eq!(reply.status, "running");

    wait_status(&client, "ended").await;

    let nodes = client.nodes().await.unwrap();
    let p1 = nodes.iter().find(|n| n.id == "p1").unwrap();
    assert_eq!(p1.kind, "playbook");
    assert_eq!(p1.status.to_string(), "ended");
    assert!(p1.started_at.is_some() && p1.ended_at.is_some());

    let graph = client.graph().await.unwrap();
    assert!(graph
        .edges
        .contains(&("_root".to_string(), "p1".to_string())));

    let input = client.input_data().await.unwrap();
    assert_eq!(input.len(), 2);
    assert_eq!(input[0].id.as_deref(), Some("p1"));

    let details = client.node_details("p1").await.unwrap();
    assert_eq!(details.record.id, "p1");

    // `true` writes nothing, the stdout file is present but empty
    let tail = client.tail_stdout("p1", 0).await.unwrap();
    assert!(tail.content.is_empty());
    assert_eq!(tail.offset, 0);
}

#[tokio::test]
async fn second_load_reconnects_to_the_same_instance() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    let dir = TempDir::new().unwrap();
    let workflow = write_fixture(dir.path());
    let request = request_for(dir.path(), &workflow);

    assert_eq!(client.start(&request).await.unwrap().status, "running");
    let reply = client.start(&request).await.unwrap();
    assert_eq!(reply.status, "reconnected");
    assert_eq!(reply.workflow_file, workflow.display().to_string());
}

#[tokio::test]
async fn loading_a_different_file_conflicts() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    let dir = TempDir::new().unwrap();
    let workflow = write_fixture(dir.path());
    client.start(&request_for(dir.path(), &workflow)).await.unwrap();

    let other = dir.path().join("other.yml");
    std::fs::write(&other, "- import_playbook: site.yml\n").unwrap();
    match client.start(&request_for(dir.path(), &other)).await {
        Err(ClientError::Api { code, .. }) => assert_eq!(code, "conflict"),
        other => panic!("expected a conflict, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn broken_yaml_is_rejected_with_its_kind() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    let dir = TempDir::new().unwrap();
    let workflow = dir.path().join("broken.yml");
    std::fs::write(&workflow, "- import_playbook: [unclosed\n").unwrap();

    match client.start(&request_for(dir.path(), &workflow)).await {
        Err(ClientError::Api { code, .. }) => assert_eq!(code, "yaml_not_valid"),
        other => panic!("expected a yaml error, got {:?}", other.map(|_| ())),
    }
    // the failed load leaves the server empty
    assert_eq!(client.status().await.unwrap().status, NO_WORKFLOW_LOADED);
}

#[tokio::test]
async fn unknown_declaration_keys_are_rejected() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    let dir = TempDir::new().unwrap();
    let workflow = dir.path().join("bad.yml");
    std::fs::write(&workflow, "- import_playbook: site.yml\n  retries: 3\n").unwrap();

    match client.start(&request_for(dir.path(), &workflow)).await {
        Err(ClientError::Api { code, .. }) => assert_eq!(code, "workflow_not_valid"),
        other => panic!("expected a schema error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn missing_vault_script_is_rejected() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    let dir = TempDir::new().unwrap();
    let workflow = write_fixture(dir.path());
    let mut request = request_for(dir.path(), &workflow);
    request.vault_ids = vec!["prod@/missing/vault.sh".to_string()];

    match client.start(&request).await {
        Err(ClientError::Api { code, .. }) => assert_eq!(code, "vault_script_not_found"),
        other => panic!("expected a vault error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn unknown_start_node_is_rejected() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    let dir = TempDir::new().unwrap();
    let workflow = write_fixture(dir.path());
    let mut request = request_for(dir.path(), &workflow);
    request.start_from_node = Some("ghost".to_string());

    match client.start(&request).await {
        Err(ClientError::Api { code, .. }) => assert_eq!(code, "start_node_not_found"),
        other => panic!("expected a start node error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn stop_without_a_running_workflow_is_not_found() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    let dir = TempDir::new().unwrap();
    let workflow = write_fixture(dir.path());
    client.start(&request_for(dir.path(), &workflow)).await.unwrap();
    wait_status(&client, "ended").await;

    match client.stop(planflow_core::StopMode::Graceful).await {
        Err(ClientError::Api { code, .. }) => assert_eq!(code, "not_found"),
        other => panic!("expected not found, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn shutdown_is_honored_once_terminal() {
    let server = serve().await;
    let client = WorkflowClient::new(&server.base_url);
    let dir = TempDir::new().unwrap();
    let workflow = write_fixture(dir.path());
    client.start(&request_for(dir.path(), &workflow)).await.unwrap();
    wait_status(&client, "ended").await;

    client.request_shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), server.handle)
        .await
        .expect("server did not shut down")
        .unwrap();
    let _ = server.service;
}
