//! planflow command line front-end
//!
//! Validates the input files, makes sure a control server is reachable
//! (starting a detached one if needed), submits the workflow and follows the
//! run on stdout until it settles, mapping the outcome to a stable exit
//! code.

mod report;

use clap::Parser;
use planflow_core::{
    compile, exit_code_for_kind, parse_document, CompileOptions, DotDrawer, GraphDrawer,
    WorkflowError,
};
use planflow_server::{ClientError, StartRequest, WorkflowClient};
use report::StdoutReporter;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Run a playbook workflow against a control server.
#[derive(Debug, Parser)]
#[command(name = "planflow", version, about)]
struct Args {
    /// Workflow file to load and run
    workflow: PathBuf,

    /// Inventory host path or comma separated host list
    #[arg(short = 'i', long)]
    inventory: String,

    /// Extra variables as key=value, highest precedence
    #[arg(short = 'e', long = "extra-vars", value_name = "KEY=VALUE")]
    extra_vars: Vec<String>,

    /// Don't make any changes, predict them instead
    #[arg(long)]
    check: bool,

    /// Show the differences of changed files
    #[arg(long)]
    diff: bool,

    /// Verbosity, repeatable
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Limit the run to a host pattern
    #[arg(long)]
    limit: Option<String>,

    /// Vault identity, label@script
    #[arg(long = "vault-id")]
    vault_ids: Vec<String>,

    /// Node ids to skip, comma separated
    #[arg(long, value_delimiter = ',')]
    skip_nodes: Vec<String>,

    /// Run only these node ids, comma separated
    #[arg(long, value_delimiter = ',')]
    filter_nodes: Vec<String>,

    /// Start the graph from this node
    #[arg(long)]
    start_from: Option<String>,

    /// Stop the graph at this node
    #[arg(long)]
    end_to: Option<String>,

    /// Base directory for run artifacts and logs
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Log level of the workflow log file
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the workflow without running anything
    #[arg(long)]
    verify_only: bool,

    /// Render the workflow graph to a DOT file and exit
    #[arg(long, value_name = "FILE")]
    draw: Option<PathBuf>,

    /// Control server address
    #[arg(long, default_value = "http://127.0.0.1:8440", env = "PLANFLOW_SERVER_URL")]
    server_url: String,

    /// Server program spawned when none is reachable
    #[arg(long, default_value = "planflow-server", env = "PLANFLOW_SERVER_BIN")]
    server_program: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "planflow=warn".to_string()),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    if let Some(code) = check_input_files(&args) {
        return Ok(code);
    }

    if let Some(output) = &args.draw {
        return draw_graph(&args, output);
    }

    let client = WorkflowClient::new(&args.server_url);
    if let Err(e) = client.ensure_server(&args.server_program).await {
        eprintln!("error: {}", e);
        return Ok(ExitCode::from(1));
    }

    let request = match build_request(&args) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(ExitCode::from(e.exit_code() as u8));
        }
    };
    let reply = match client.start(&request).await {
        Ok(reply) => reply,
        Err(ClientError::Api { code, message }) => {
            eprintln!("error [{}]: {}", code, message);
            return Ok(exit_from_kind(&code));
        }
        Err(e) => return Err(e.into()),
    };
    if reply.status == "reconnected" {
        println!("reconnected to the running workflow {}", reply.workflow_file);
    } else {
        println!("workflow {} submitted", reply.workflow_file);
    }

    follow_run(&client).await
}

/// Poll the server and mirror node transitions on stdout until the
/// workflow settles.
async fn follow_run(client: &WorkflowClient) -> anyhow::Result<ExitCode> {
    let mut reporter = StdoutReporter::new();
    loop {
        let status = client.status().await?;
        if let Ok(nodes) = client.nodes().await {
            reporter.report(&nodes);
        }
        match status.status.as_str() {
            "ended" => {
                println!("workflow ended");
                return Ok(ExitCode::SUCCESS);
            }
            "failed" => {
                if status.validation_errors.is_empty() {
                    println!("workflow failed");
                    return Ok(exit_from_kind("workflow_failed"));
                }
                for error in &status.validation_errors {
                    eprintln!("error: {}", error);
                }
                return Ok(exit_from_kind("validation_error"));
            }
            _ => tokio::time::sleep(Duration::from_secs(1)).await,
        }
    }
}

/// The workflow file and every inventory path must exist up front.
fn check_input_files(args: &Args) -> Option<ExitCode> {
    let mut bad = false;
    if !args.workflow.exists() {
        eprintln!(
            "the workflow file {} doesn't exist",
            args.workflow.display()
        );
        bad = true;
    }
    if !args.inventory.contains(',') && !Path::new(&args.inventory).exists() {
        eprintln!("the inventory {} doesn't exist", args.inventory);
        bad = true;
    }
    bad.then(|| ExitCode::from(1))
}

fn draw_graph(args: &Args, output: &Path) -> anyhow::Result<ExitCode> {
    let text = std::fs::read_to_string(&args.workflow)?;
    let entries = match parse_document(&text) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(ExitCode::from(e.exit_code() as u8));
        }
    };
    let options = CompileOptions {
        inventory: args.inventory.clone(),
        base_dir: args
            .workflow
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
        ..Default::default()
    };
    let compiled = match compile(entries, &options) {
        Ok(compiled) => compiled,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(ExitCode::from(e.exit_code() as u8));
        }
    };
    DotDrawer.draw(&compiled.original, &compiled.nodes, output)?;
    println!("graph written to {}", output.display());
    Ok(ExitCode::SUCCESS)
}

fn build_request(args: &Args) -> Result<StartRequest, WorkflowError> {
    let mut request = StartRequest::new(&args.workflow);
    request.inventory = args.inventory.clone();
    request.extra_vars = parse_extra_vars(&args.extra_vars)?;
    request.vault_ids = args.vault_ids.clone();
    request.check_mode = args.check;
    request.diff_mode = args.diff;
    request.verbosity = args.verbosity;
    request.limit = args.limit.clone();
    request.start_from_node = args.start_from.clone();
    request.end_to_node = args.end_to.clone();
    request.skip_nodes = args.skip_nodes.clone();
    request.filter_nodes = args.filter_nodes.clone();
    request.log_dir = args.log_dir.clone();
    request.log_level = args.log_level.clone();
    request.verify_only = args.verify_only;
    Ok(request)
}

fn parse_extra_vars(pairs: &[String]) -> Result<BTreeMap<String, Value>, WorkflowError> {
    let mut vars = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            WorkflowError::PlaybookParameter(format!(
                "extra var '{}' is not of the form key=value",
                pair
            ))
        })?;
        vars.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(vars)
}

fn exit_from_kind(kind: &str) -> ExitCode {
    ExitCode::from(exit_code_for_kind(kind) as u8)
}
