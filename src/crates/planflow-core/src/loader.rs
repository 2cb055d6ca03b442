//! Workflow document loader
//!
//! Reads the YAML declaration, applies the global run options, compiles the
//! graphs and prepares the artifact directory
//! (`<log_dir>/<workflow_basename>_<YYYYMMDD_HHMMSS>/`). Vault scripts are
//! checked here so a missing script rejects the load before anything runs.

use crate::compiler::{compile, CompileOptions};
use crate::declaration::parse_document;
use crate::engine::Workflow;
use crate::error::{Result, WorkflowError};
use crate::runner::JobRunner;
use chrono::Local;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Options gathered from the CLI / RPC request and applied at load time.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Fallback inventory for entries without their own
    pub inventory: String,
    /// Global extra variables, highest precedence
    pub extra_vars: BTreeMap<String, Value>,
    pub vault_ids: Vec<String>,
    pub project_path: Option<PathBuf>,
    pub check_mode: bool,
    pub diff_mode: bool,
    pub verbosity: u8,
    pub limit: Option<String>,
    /// Base directory for per-run artifact directories
    pub log_dir: PathBuf,
    /// Use `log_dir` as-is instead of a timestamped subdirectory
    pub log_dir_no_info: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            inventory: String::new(),
            extra_vars: BTreeMap::new(),
            vault_ids: Vec::new(),
            project_path: None,
            check_mode: false,
            diff_mode: false,
            verbosity: 0,
            limit: None,
            log_dir: PathBuf::from("logs"),
            log_dir_no_info: false,
        }
    }
}

/// Load a workflow file into a ready-to-run [`Workflow`].
pub fn load_workflow(
    workflow_file: &Path,
    options: &LoadOptions,
    runner: Arc<dyn JobRunner>,
) -> Result<Workflow> {
    match workflow_file.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => {}
        _ => {
            return Err(WorkflowError::UnsupportedFileType(
                workflow_file.display().to_string(),
            ))
        }
    }

    let text = fs::read_to_string(workflow_file)?;
    let entries = parse_document(&text)?;

    check_vault_scripts(&options.vault_ids)?;

    let base_dir = workflow_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let compile_options = CompileOptions {
        inventory: options.inventory.clone(),
        extra_vars: options.extra_vars.clone(),
        vault_ids: options.vault_ids.clone(),
        project_path: options.project_path.clone(),
        check_mode: options.check_mode,
        diff_mode: options.diff_mode,
        verbosity: options.verbosity,
        limit: options.limit.clone(),
        base_dir,
    };
    let compiled = compile(entries, &compile_options)?;

    let artifact_dir = artifact_dir_for(workflow_file, options);
    fs::create_dir_all(&artifact_dir)?;
    info!(
        workflow = %workflow_file.display(),
        artifacts = %artifact_dir.display(),
        nodes = compiled.nodes.len(),
        "workflow loaded"
    );

    Ok(Workflow::new(compiled, runner, workflow_file, artifact_dir))
}

/// Per-run artifact directory, `<log_dir>/<basename>_<stamp>` by default.
pub fn artifact_dir_for(workflow_file: &Path, options: &LoadOptions) -> PathBuf {
    if options.log_dir_no_info {
        return options.log_dir.clone();
    }
    let basename = workflow_file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workflow");
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    options.log_dir.join(format!("{}_{}", basename, stamp))
}

/// Every `label@script` vault id must point at an existing script.
fn check_vault_scripts(vault_ids: &[String]) -> Result<()> {
    for vault_id in vault_ids {
        let script = match vault_id.split_once('@') {
            Some((_, script)) => script,
            None => vault_id.as_str(),
        };
        if !Path::new(script).exists() {
            return Err(WorkflowError::VaultScriptNotFound(script.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ProcessRunner;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_workflow(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn options(dir: &Path) -> LoadOptions {
        LoadOptions {
            log_dir: dir.join("logs"),
            ..Default::default()
        }
    }

    #[test]
    fn loads_a_simple_workflow() {
        let dir = tempdir().unwrap();
        let path = write_workflow(
            dir.path(),
            "deploy.yml",
            "- import_playbook: site.yml\n  id: site\n",
        );
        let workflow =
            load_workflow(&path, &options(dir.path()), Arc::new(ProcessRunner::new())).unwrap();
        assert!(workflow.artifact_dir().starts_with(dir.path().join("logs")));
        assert!(workflow.artifact_dir().exists());
    }

    #[test]
    fn rejects_non_yaml_extensions() {
        let dir = tempdir().unwrap();
        let path = write_workflow(dir.path(), "deploy.json", "[]");
        assert!(matches!(
            load_workflow(&path, &options(dir.path()), Arc::new(ProcessRunner::new())),
            Err(WorkflowError::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn rejects_missing_vault_script() {
        let dir = tempdir().unwrap();
        let path = write_workflow(dir.path(), "deploy.yml", "- import_playbook: site.yml\n");
        let mut opts = options(dir.path());
        opts.vault_ids = vec!["prod@/nonexistent/vault.sh".to_string()];
        assert!(matches!(
            load_workflow(&path, &opts, Arc::new(ProcessRunner::new())),
            Err(WorkflowError::VaultScriptNotFound(_))
        ));
    }

    #[test]
    fn artifact_dir_carries_basename_and_stamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.yml");
        let artifact = artifact_dir_for(&path, &options(dir.path()));
        let name = artifact.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("deploy.yml_"));
        assert_eq!(name.len(), "deploy.yml_".len() + 15);
    }

    #[test]
    fn no_info_mode_uses_log_dir_directly() {
        let dir = tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.log_dir_no_info = true;
        let artifact = artifact_dir_for(&dir.path().join("deploy.yml"), &opts);
        assert_eq!(artifact, dir.path().join("logs"));
    }
}
