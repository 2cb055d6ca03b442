//! Declaration document model
//!
//! The workflow input is a nested YAML list. Every element is either a
//! playbook invocation (`import_playbook`) or a block (`block`) holding a
//! nested list and an optional strategy. Unknown keys are rejected.

use crate::error::{Result, WorkflowError};
use crate::node::{is_valid_user_id, Strategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One element of the declaration list.
///
/// Exactly one of `block` / `import_playbook` must be present. The allowed
/// keys are fixed; anything else fails the load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<Vec<Entry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_playbook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, serde_json::Value>,
}

impl Entry {
    /// Build a block entry, used by the compiler for the sentinel wrapping.
    pub(crate) fn sentinel(id: &str) -> Self {
        Entry {
            id: Some(id.to_string()),
            block: Some(Vec::new()),
            ..Default::default()
        }
    }

    pub fn is_block(&self) -> bool {
        self.block.is_some()
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        match (&self.block, &self.import_playbook) {
            (Some(_), Some(_)) => {
                return Err(WorkflowError::WorkflowNotValid(
                    "an entry cannot carry both 'block' and 'import_playbook'".to_string(),
                ))
            }
            (None, None) => {
                return Err(WorkflowError::WorkflowNotValid(
                    "an entry needs either 'block' or 'import_playbook'".to_string(),
                ))
            }
            _ => {}
        }
        if self.strategy.is_some() && self.block.is_none() {
            return Err(WorkflowError::WorkflowNotValid(
                "'strategy' is only allowed on a block".to_string(),
            ));
        }
        if let Some(id) = &self.id {
            if !is_valid_user_id(id) {
                return Err(WorkflowError::DuplicateNodeId(format!(
                    "node id '{}' is reserved or contains forbidden characters",
                    id
                )));
            }
        }
        if let Some(children) = &self.block {
            for child in children {
                child.validate()?;
            }
        }
        Ok(())
    }

    /// Strategy of this block's children; inside blocks the default is parallel.
    pub fn block_strategy(&self) -> Strategy {
        self.strategy.unwrap_or(Strategy::Parallel)
    }
}

/// Parse a YAML document into declaration entries.
///
/// Syntax errors map to [`WorkflowError::YamlNotValid`], schema errors
/// (unknown keys, wrong shapes) to [`WorkflowError::WorkflowNotValid`].
pub fn parse_document(text: &str) -> Result<Vec<Entry>> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| WorkflowError::YamlNotValid(e.to_string()))?;
    let entries: Vec<Entry> = serde_yaml::from_value(value)
        .map_err(|e| WorkflowError::WorkflowNotValid(e.to_string()))?;
    for entry in &entries {
        entry.validate()?;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_playbook_and_block_entries() {
        let doc = r#"
- import_playbook: site.yml
  id: site
  vars:
    env: prod
- block:
    - import_playbook: db.yml
    - import_playbook: web.yml
  strategy: serial
  name: backends
"#;
        let entries = parse_document(doc).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].import_playbook.as_deref(), Some("site.yml"));
        assert_eq!(entries[0].vars["env"], serde_json::json!("prod"));
        assert!(entries[1].is_block());
        assert_eq!(entries[1].block_strategy(), Strategy::Serial);
    }

    #[test]
    fn default_block_strategy_is_parallel() {
        let doc = "- block:\n    - import_playbook: a.yml\n";
        let entries = parse_document(doc).unwrap();
        assert_eq!(entries[0].block_strategy(), Strategy::Parallel);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let doc = "- import_playbook: a.yml\n  retries: 3\n";
        match parse_document(doc) {
            Err(WorkflowError::WorkflowNotValid(msg)) => assert!(msg.contains("retries")),
            other => panic!("expected schema rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn broken_yaml_is_a_yaml_error() {
        let doc = "- import_playbook: [unclosed\n";
        assert!(matches!(
            parse_document(doc),
            Err(WorkflowError::YamlNotValid(_))
        ));
    }

    #[test]
    fn entry_needs_block_or_playbook() {
        let doc = "- id: lonely\n";
        assert!(matches!(
            parse_document(doc),
            Err(WorkflowError::WorkflowNotValid(_))
        ));
    }

    #[test]
    fn reserved_id_is_rejected() {
        let doc = "- import_playbook: a.yml\n  id: _s\n";
        assert!(matches!(
            parse_document(doc),
            Err(WorkflowError::DuplicateNodeId(_))
        ));
    }
}
