//! Graph compiler: nested declaration → execution DAG + original hierarchy
//!
//! The compiler walks the declaration recursively. The top-level list is
//! wrapped with the `_s` / `_e` sentinels and always runs serial between
//! them. Each recursion level returns its **frontier**, the interior nodes
//! with zero out-degree within the subtree, so the enclosing level can
//! attach edges to them:
//!
//! - under a *serial* strategy every accumulated frontier node gets an edge
//!   to the next sibling, and the frontier is reset;
//! - under a *parallel* strategy siblings only attach to the common parent
//!   and the frontier accumulates for export upward.
//!
//! An empty block exports itself as its own frontier, so downstream siblings
//! still chain through it.

use crate::declaration::Entry;
use crate::error::{Result, WorkflowError};
use crate::graph::DiGraph;
use crate::node::{Node, NodeKind, PlaybookSpec, Strategy, END_NODE, ROOT_NODE, START_NODE};
use rand::Rng;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Auto-generated ids are 5 characters from this alphabet.
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_LEN: usize = 5;

/// Global options applied to every playbook node at compile time.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Fallback inventory for entries without their own
    pub inventory: String,
    /// Extra variables merged over per-node `vars` (highest precedence)
    pub extra_vars: BTreeMap<String, Value>,
    pub vault_ids: Vec<String>,
    pub project_path: Option<PathBuf>,
    pub check_mode: bool,
    pub diff_mode: bool,
    pub verbosity: u8,
    pub limit: Option<String>,
    /// Directory relative playbook paths are resolved against
    pub base_dir: PathBuf,
}

/// Result of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledGraphs {
    /// The DAG driven by the engine, `_s` source to `_e` sink
    pub execution: DiGraph,
    /// The authored hierarchy rooted at `_root`, for display
    pub original: DiGraph,
    /// Static node definitions keyed by id
    pub nodes: HashMap<String, Node>,
    /// The declaration with every id filled in, as clients receive it
    pub input: Vec<Entry>,
}

/// Compile a declaration into the two graphs.
pub fn compile(entries: Vec<Entry>, options: &CompileOptions) -> Result<CompiledGraphs> {
    for entry in &entries {
        entry.validate()?;
    }

    let mut level = Vec::with_capacity(entries.len() + 2);
    level.push(Entry::sentinel(START_NODE));
    level.extend(entries);
    level.push(Entry::sentinel(END_NODE));

    let mut compiler = Compiler {
        options,
        execution: DiGraph::new(),
        original: DiGraph::new(),
        nodes: HashMap::new(),
    };
    compiler.original.add_node(ROOT_NODE);
    compiler.import_level(&mut level, Vec::new(), Strategy::Serial, ROOT_NODE)?;

    if let Some(node) = compiler.execution.find_cycle() {
        return Err(WorkflowError::WorkflowNotValid(format!(
            "the workflow graph is cyclic at node '{}'",
            node
        )));
    }

    // strip the sentinel wrapper from the declaration returned to clients
    let input = level[1..level.len() - 1].to_vec();

    Ok(CompiledGraphs {
        execution: compiler.execution,
        original: compiler.original,
        nodes: compiler.nodes,
        input,
    })
}

struct Compiler<'a> {
    options: &'a CompileOptions,
    execution: DiGraph,
    original: DiGraph,
    nodes: HashMap<String, Node>,
}

impl Compiler<'_> {
    /// Import one declaration level; returns its frontier.
    fn import_level(
        &mut self,
        level: &mut [Entry],
        parent_ids: Vec<String>,
        strategy: Strategy,
        original_parent: &str,
    ) -> Result<Vec<String>> {
        let mut parents = parent_ids;
        let mut frontier: Vec<String> = Vec::new();
        let last_index = level.len().saturating_sub(1);

        for index in 0..level.len() {
            let id = match &level[index].id {
                Some(id) => id.clone(),
                None => self.fresh_id(),
            };
            level[index].id = Some(id.clone());

            for parent in &parents {
                self.execution.add_edge(parent, &id);
            }
            if strategy == Strategy::Serial {
                parents.clear();
                for settled in &frontier {
                    self.execution.add_edge(settled, &id);
                }
                frontier.clear();
            }

            let node = self.build_node(&level[index], &id);
            self.insert_node(node)?;
            if !is_sentinel(&id) {
                self.original.add_edge(original_parent, &id);
            }

            let sub_frontier = if level[index].is_block() {
                let inner_strategy = level[index].block_strategy();
                // take the children out so the recursion can re-id them
                let mut children = level[index].block.take().unwrap_or_default();
                let result =
                    self.import_level(&mut children, vec![id.clone()], inner_strategy, &id);
                level[index].block = Some(children);
                let mut sub = result?;
                if sub.is_empty() {
                    sub.push(id.clone());
                }
                Some(sub)
            } else {
                None
            };

            match &sub_frontier {
                Some(sub) => frontier.extend(sub.iter().cloned()),
                None => {
                    if strategy == Strategy::Parallel
                        || (strategy == Strategy::Serial && index == last_index)
                    {
                        frontier.push(id.clone());
                    }
                }
            }

            if strategy == Strategy::Serial {
                parents = match sub_frontier {
                    Some(sub) => sub,
                    None => vec![id.clone()],
                };
            }
        }
        Ok(frontier)
    }

    fn build_node(&self, entry: &Entry, id: &str) -> Node {
        let kind = match (&entry.block, &entry.import_playbook) {
            (Some(_), _) => NodeKind::Block {
                strategy: entry.block_strategy(),
            },
            (None, Some(playbook)) => {
                let mut extra_vars = entry.vars.clone();
                for (key, value) in &self.options.extra_vars {
                    extra_vars.insert(key.clone(), value.clone());
                }
                NodeKind::Playbook(Box::new(PlaybookSpec {
                    playbook: resolve_path(&self.options.base_dir, playbook),
                    inventory: entry
                        .inventory
                        .clone()
                        .unwrap_or_else(|| self.options.inventory.clone()),
                    extra_vars,
                    vault_ids: self.options.vault_ids.clone(),
                    project_path: self.options.project_path.clone(),
                    check_mode: self.options.check_mode,
                    diff_mode: self.options.diff_mode,
                    verbosity: self.options.verbosity,
                    limit: self.options.limit.clone(),
                }))
            }
            // unreachable after Entry::validate, treated as an empty block
            (None, None) => NodeKind::Block {
                strategy: Strategy::Parallel,
            },
        };
        Node {
            id: id.to_string(),
            name: entry.name.clone(),
            description: entry.description.clone(),
            reference: entry.reference.clone(),
            kind,
        }
    }

    fn insert_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(WorkflowError::DuplicateNodeId(format!(
                "node id '{}' is already present",
                node.id
            )));
        }
        self.execution.add_node(&node.id);
        if !is_sentinel(&node.id) {
            self.original.add_node(&node.id);
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    fn fresh_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (0..ID_LEN)
                .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
                .collect();
            if !self.nodes.contains_key(&id) {
                return id;
            }
        }
    }
}

fn is_sentinel(id: &str) -> bool {
    id == START_NODE || id == END_NODE
}

fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        candidate
    } else {
        base.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playbook(id: &str) -> Entry {
        Entry {
            id: Some(id.to_string()),
            import_playbook: Some(format!("{}.yml", id)),
            ..Default::default()
        }
    }

    fn block(id: &str, strategy: Strategy, children: Vec<Entry>) -> Entry {
        Entry {
            id: Some(id.to_string()),
            block: Some(children),
            strategy: Some(strategy),
            ..Default::default()
        }
    }

    fn compile_ids(entries: Vec<Entry>) -> CompiledGraphs {
        compile(entries, &CompileOptions::default()).unwrap()
    }

    fn has_edge(g: &DiGraph, from: &str, to: &str) -> bool {
        g.successors(from).iter().any(|s| s == to)
    }

    #[test]
    fn serial_pair_forms_a_chain() {
        let compiled = compile_ids(vec![playbook("p1"), playbook("p2")]);
        let g = &compiled.execution;
        assert!(has_edge(g, START_NODE, "p1"));
        assert!(has_edge(g, "p1", "p2"));
        assert!(has_edge(g, "p2", END_NODE));
        assert!(!has_edge(g, START_NODE, "p2"));
    }

    #[test]
    fn parallel_block_fans_out() {
        let compiled = compile_ids(vec![block(
            "b",
            Strategy::Parallel,
            vec![playbook("p1"), playbook("p2"), playbook("p3")],
        )]);
        let g = &compiled.execution;
        assert!(has_edge(g, START_NODE, "b"));
        for p in ["p1", "p2", "p3"] {
            assert!(has_edge(g, "b", p));
            assert!(has_edge(g, p, END_NODE));
        }
        assert!(!has_edge(g, "p1", "p2"));
    }

    #[test]
    fn mixed_declaration_joins_after_the_block() {
        let compiled = compile_ids(vec![
            playbook("p0"),
            block("b", Strategy::Parallel, vec![playbook("p1"), playbook("p2")]),
            playbook("p3"),
        ]);
        let g = &compiled.execution;
        assert!(has_edge(g, START_NODE, "p0"));
        assert!(has_edge(g, "p0", "b"));
        assert!(has_edge(g, "b", "p1"));
        assert!(has_edge(g, "b", "p2"));
        assert!(has_edge(g, "p1", "p3"));
        assert!(has_edge(g, "p2", "p3"));
        assert!(has_edge(g, "p3", END_NODE));
        assert!(!has_edge(g, "b", "p3"));
    }

    #[test]
    fn empty_block_chains_through_itself() {
        let compiled = compile_ids(vec![
            playbook("p0"),
            block("b", Strategy::Parallel, vec![]),
            playbook("p1"),
        ]);
        let g = &compiled.execution;
        assert!(has_edge(g, "p0", "b"));
        assert!(has_edge(g, "b", "p1"));
    }

    #[test]
    fn duplicate_id_fails_the_load() {
        let result = compile(
            vec![playbook("dup"), playbook("dup")],
            &CompileOptions::default(),
        );
        assert!(matches!(result, Err(WorkflowError::DuplicateNodeId(_))));
    }

    #[test]
    fn missing_ids_are_assigned_five_char_tokens() {
        let entry = Entry {
            import_playbook: Some("a.yml".to_string()),
            ..Default::default()
        };
        let compiled = compile_ids(vec![entry]);
        let id = compiled.input[0].id.as_ref().unwrap();
        assert_eq!(id.len(), 5);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn original_graph_is_rooted_hierarchy() {
        let compiled = compile_ids(vec![
            playbook("p0"),
            block("b", Strategy::Serial, vec![playbook("p1")]),
        ]);
        let g = &compiled.original;
        assert!(has_edge(g, ROOT_NODE, "p0"));
        assert!(has_edge(g, ROOT_NODE, "b"));
        assert!(has_edge(g, "b", "p1"));
        assert!(!g.contains(START_NODE));
    }

    #[test]
    fn global_extra_vars_override_node_vars() {
        let mut entry = playbook("p");
        entry
            .vars
            .insert("env".to_string(), serde_json::json!("staging"));
        let mut options = CompileOptions::default();
        options
            .extra_vars
            .insert("env".to_string(), serde_json::json!("prod"));
        let compiled = compile(vec![entry], &options).unwrap();
        let spec = compiled.nodes["p"].playbook_spec().unwrap();
        assert_eq!(spec.extra_vars["env"], serde_json::json!("prod"));
    }
}
