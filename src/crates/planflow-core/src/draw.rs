//! Drawing adapter: static graph → image file
//!
//! Rendering is a collaborator concern; the core only fixes the interface.
//! The shipped implementation emits Graphviz DOT text, which downstream
//! tooling turns into PNG/SVG.

use crate::error::Result;
use crate::graph::DiGraph;
use crate::node::{Node, NodeKind, ROOT_NODE};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

/// Renders the original (hierarchy) graph to an image file.
pub trait GraphDrawer {
    fn draw(&self, graph: &DiGraph, nodes: &HashMap<String, Node>, output: &Path) -> Result<()>;
}

/// Graphviz DOT renderer.
#[derive(Debug, Default, Clone)]
pub struct DotDrawer;

impl DotDrawer {
    fn render(&self, graph: &DiGraph, nodes: &HashMap<String, Node>) -> String {
        let mut out = String::from("digraph workflow {\n  rankdir=TB;\n");
        for id in graph.nodes() {
            let (shape, label) = match nodes.get(id).map(|n| &n.kind) {
                Some(NodeKind::Playbook(spec)) => {
                    let file = spec
                        .playbook
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or(id);
                    ("ellipse", format!("{}\\n{}", id, file))
                }
                Some(NodeKind::Block { strategy }) => {
                    let token = match strategy {
                        crate::node::Strategy::Serial => "serial",
                        crate::node::Strategy::Parallel => "parallel",
                    };
                    ("box", format!("{}\\n{}", id, token))
                }
                None if id == ROOT_NODE => ("doublecircle", id.to_string()),
                None => ("ellipse", id.to_string()),
            };
            let _ = writeln!(out, "  \"{}\" [shape={}, label=\"{}\"];", id, shape, label);
        }
        for (from, to) in graph.edges() {
            let _ = writeln!(out, "  \"{}\" -> \"{}\";", from, to);
        }
        out.push_str("}\n");
        out
    }
}

impl GraphDrawer for DotDrawer {
    fn draw(&self, graph: &DiGraph, nodes: &HashMap<String, Node>, output: &Path) -> Result<()> {
        std::fs::write(output, self.render(graph, nodes))?;
        Ok(())
    }
}
