//! Structural properties of the graph compiler over generated declarations.

use planflow_core::Strategy as BlockStrategy;
use planflow_core::{
    compile, CompileOptions, CompiledGraphs, Entry, WorkflowError, END_NODE, START_NODE,
};
use proptest::prelude::*;

/// Declaration shape used to generate random workflows.
#[derive(Debug, Clone)]
enum Shape {
    Playbook,
    Block(BlockStrategy, Vec<Shape>),
}

fn shape_strategy() -> impl proptest::strategy::Strategy<Value = Shape> {
    let leaf = Just(Shape::Playbook);
    leaf.prop_recursive(3, 24, 4, |inner| {
        (
            prop_oneof![Just(BlockStrategy::Serial), Just(BlockStrategy::Parallel)],
            prop::collection::vec(inner, 0..4),
        )
            .prop_map(|(strategy, children)| Shape::Block(strategy, children))
    })
}

fn declaration_strategy() -> impl proptest::strategy::Strategy<Value = Vec<Shape>> {
    prop::collection::vec(shape_strategy(), 1..5)
}

/// Convert shapes to entries with sequential, unique ids.
fn to_entries(shapes: &[Shape], counter: &mut usize) -> Vec<Entry> {
    shapes
        .iter()
        .map(|shape| {
            *counter += 1;
            let id = format!("n{}", counter);
            match shape {
                Shape::Playbook => Entry {
                    id: Some(id),
                    import_playbook: Some("site.yml".to_string()),
                    ..Default::default()
                },
                Shape::Block(strategy, children) => Entry {
                    id: Some(id),
                    block: Some(to_entries(children, counter)),
                    strategy: Some(*strategy),
                    ..Default::default()
                },
            }
        })
        .collect()
}

fn compile_shapes(shapes: &[Shape]) -> CompiledGraphs {
    let mut counter = 0;
    let entries = to_entries(shapes, &mut counter);
    compile(entries, &CompileOptions::default()).expect("generated declaration must compile")
}

/// Ids of every node inside one entry's subtree, the entry included.
fn subtree_ids(entry: &Entry) -> Vec<String> {
    let mut ids = vec![entry.id.clone().unwrap()];
    if let Some(children) = &entry.block {
        for child in children {
            ids.extend(subtree_ids(child));
        }
    }
    ids
}

proptest! {
    /// Exactly one source `_s` and one sink `_e`.
    #[test]
    fn single_source_and_sink(shapes in declaration_strategy()) {
        let compiled = compile_shapes(&shapes);
        let g = &compiled.execution;
        for id in g.nodes() {
            prop_assert_eq!(g.in_degree(id) == 0, id == START_NODE, "source: {}", id);
            prop_assert_eq!(g.out_degree(id) == 0, id == END_NODE, "sink: {}", id);
        }
    }

    /// Every node is reachable from `_s` and reaches `_e`.
    #[test]
    fn all_nodes_between_the_sentinels(shapes in declaration_strategy()) {
        let compiled = compile_shapes(&shapes);
        let g = &compiled.execution;
        let from_start = g.descendants(START_NODE);
        let to_end = g.ancestors(END_NODE);
        for id in g.nodes() {
            if id != START_NODE {
                prop_assert!(from_start.contains(id), "{} unreachable from _s", id);
            }
            if id != END_NODE {
                prop_assert!(to_end.contains(id), "{} cannot reach _e", id);
            }
        }
        prop_assert!(g.find_cycle().is_none());
    }

    /// Serial top-level siblings stay ordered: each one reaches the next.
    #[test]
    fn serial_composition_preserves_ordering(shapes in declaration_strategy()) {
        let compiled = compile_shapes(&shapes);
        let g = &compiled.execution;
        for pair in compiled.input.windows(2) {
            let before = pair[0].id.as_ref().unwrap();
            let after = pair[1].id.as_ref().unwrap();
            prop_assert!(
                g.descendants(before).contains(after.as_str()),
                "no path {} -> {}",
                before,
                after
            );
        }
    }

    /// Parallel siblings compile to edge-disjoint subgraphs.
    #[test]
    fn parallel_composition_adds_no_cross_edges(children in prop::collection::vec(shape_strategy(), 2..4)) {
        let block = Shape::Block(BlockStrategy::Parallel, children);
        let compiled = compile_shapes(&[block]);
        let siblings: Vec<Vec<String>> = compiled.input[0]
            .block
            .as_ref()
            .unwrap()
            .iter()
            .map(subtree_ids)
            .collect();
        for (from, to) in compiled.execution.edges() {
            let source_sibling = siblings.iter().position(|ids| ids.contains(&from));
            let target_sibling = siblings.iter().position(|ids| ids.contains(&to));
            if let (Some(a), Some(b)) = (source_sibling, target_sibling) {
                prop_assert_eq!(a, b, "cross edge {} -> {}", from, to);
            }
        }
    }

    /// With explicit ids the compile is fully deterministic; without, the
    /// shape is stable across runs.
    #[test]
    fn compile_is_deterministic(shapes in declaration_strategy()) {
        let first = compile_shapes(&shapes);
        let second = compile_shapes(&shapes);
        prop_assert_eq!(first.execution.edges(), second.execution.edges());
        prop_assert_eq!(first.original.edges(), second.original.edges());
    }

    /// Omitted ids change names but never the shape of the graph.
    #[test]
    fn auto_ids_keep_the_shape(count in 1usize..5) {
        let entries: Vec<Entry> = (0..count)
            .map(|_| Entry {
                import_playbook: Some("site.yml".to_string()),
                ..Default::default()
            })
            .collect();
        let first = compile(entries.clone(), &CompileOptions::default()).unwrap();
        let second = compile(entries, &CompileOptions::default()).unwrap();
        prop_assert_eq!(first.execution.len(), second.execution.len());
        prop_assert_eq!(first.execution.edges().len(), second.execution.edges().len());
    }
}

#[test]
fn duplicate_id_across_branches_rejects_the_load() {
    let entries = vec![
        Entry {
            id: Some("shared".to_string()),
            import_playbook: Some("a.yml".to_string()),
            ..Default::default()
        },
        Entry {
            block: Some(vec![Entry {
                id: Some("shared".to_string()),
                import_playbook: Some("b.yml".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        },
    ];
    match compile(entries, &CompileOptions::default()) {
        Err(WorkflowError::DuplicateNodeId(msg)) => assert!(msg.contains("shared")),
        other => panic!("expected duplicate id rejection, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn deep_nesting_compiles_to_a_dag() {
    let mut entry = Entry {
        id: Some("leaf".to_string()),
        import_playbook: Some("leaf.yml".to_string()),
        ..Default::default()
    };
    for depth in 0..6 {
        entry = Entry {
            id: Some(format!("level{}", depth)),
            block: Some(vec![entry]),
            strategy: Some(if depth % 2 == 0 {
                BlockStrategy::Serial
            } else {
                BlockStrategy::Parallel
            }),
            ..Default::default()
        };
    }
    let compiled = compile(vec![entry], &CompileOptions::default()).unwrap();
    assert!(compiled.execution.find_cycle().is_none());
    assert!(compiled
        .execution
        .descendants(START_NODE)
        .contains("leaf"));
}
