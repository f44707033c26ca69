//! Property tests for the closure-table algebra.
//!
//! Random forests are built incrementally, then hit with random
//! attach/detach/delete sequences. After every step the incrementally
//! maintained closure must equal the closure recomputed from the parent
//! relation tracked alongside it.

use std::collections::HashMap;

use kura_core::{ClosureTable, Error, ParentMap};
use proptest::prelude::*;
use uuid::Uuid;

const MAX_NODES: usize = 24;
const MAX_OPS: usize = 40;

#[derive(Debug, Clone)]
enum Op {
    Attach(usize, usize),
    Detach(usize),
    Delete(usize),
}

fn forest_strategy() -> impl Strategy<Value = Vec<Option<usize>>> {
    // parents[i] is always an earlier index, so the input is a forest.
    (1usize..=MAX_NODES).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(None::<usize>).boxed()
                } else {
                    proptest::option::of(0..i).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..MAX_NODES, 0..MAX_NODES).prop_map(|(a, b)| Op::Attach(a, b)),
        2 => (0..MAX_NODES).prop_map(Op::Detach),
        1 => (0..MAX_NODES).prop_map(Op::Delete),
    ]
}

fn build(parents: &[Option<usize>]) -> (ClosureTable, Vec<Uuid>, ParentMap) {
    let ids: Vec<Uuid> = (0..parents.len()).map(|_| Uuid::new_v4()).collect();
    let mut table = ClosureTable::new();
    let mut parent_map = ParentMap::new();
    for (i, p) in parents.iter().enumerate() {
        let parent = p.map(|p| ids[p]);
        table.insert_node(ids[i], parent).unwrap();
        parent_map.insert(ids[i], parent);
    }
    (table, ids, parent_map)
}

fn assert_closure_invariants(table: &ClosureTable, parents: &ParentMap) {
    let edges = table.edges();
    let mut by_pair: HashMap<(Uuid, Uuid), i32> = HashMap::new();
    for e in &edges {
        assert!(
            by_pair.insert((e.ancestor_id, e.descendant_id), e.depth).is_none(),
            "duplicate edge"
        );
    }

    for (&node, &parent) in parents {
        assert_eq!(by_pair.get(&(node, node)), Some(&0), "missing self-edge");
        let depth_one: Vec<Uuid> = edges
            .iter()
            .filter(|e| e.descendant_id == node && e.depth == 1)
            .map(|e| e.ancestor_id)
            .collect();
        assert_eq!(depth_one, parent.into_iter().collect::<Vec<_>>());
    }

    for a in &edges {
        for b in edges.iter().filter(|b| b.ancestor_id == a.descendant_id) {
            assert_eq!(
                by_pair.get(&(a.ancestor_id, b.descendant_id)),
                Some(&(a.depth + b.depth)),
                "transitivity violated"
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn incremental_build_matches_recomputed_closure(parents in forest_strategy()) {
        let (table, _ids, parent_map) = build(&parents);
        let recomputed = ClosureTable::from_parents(&parent_map).unwrap();
        prop_assert_eq!(&table, &recomputed);
        assert_closure_invariants(&table, &parent_map);
    }

    #[test]
    fn mutations_keep_closure_exact(
        parents in forest_strategy(),
        ops in proptest::collection::vec(op_strategy(), 0..MAX_OPS),
    ) {
        let (mut table, ids, mut parent_map) = build(&parents);
        let mut alive: Vec<Uuid> = ids.clone();

        for op in ops {
            if alive.is_empty() {
                break;
            }
            let pick = |i: usize| alive[i % alive.len()];
            let before = table.clone();
            match op {
                Op::Attach(a, b) => {
                    let (node, parent) = (pick(a), pick(b));
                    let creates_cycle = table.depth_between(node, parent).is_some();
                    match table.move_subtree(node, Some(parent)) {
                        Ok(_) => {
                            prop_assert!(!creates_cycle);
                            parent_map.insert(node, Some(parent));
                        }
                        Err(Error::CycleDetected { .. }) => {
                            prop_assert!(creates_cycle);
                            prop_assert_eq!(&table, &before);
                        }
                        Err(e) => prop_assert!(false, "unexpected error {e}"),
                    }
                }
                Op::Detach(a) => {
                    let node = pick(a);
                    table.move_subtree(node, None).unwrap();
                    parent_map.insert(node, None);
                }
                Op::Delete(a) => {
                    let node = pick(a);
                    let has_children = parent_map.values().any(|p| *p == Some(node));
                    match table.remove_leaf(node) {
                        Ok(_) => {
                            prop_assert!(!has_children);
                            parent_map.remove(&node);
                            alive.retain(|&id| id != node);
                        }
                        Err(Error::HasChildren { .. }) => {
                            prop_assert!(has_children);
                            prop_assert_eq!(&table, &before);
                        }
                        Err(e) => prop_assert!(false, "unexpected error {e}"),
                    }
                }
            }

            let recomputed = ClosureTable::from_parents(&parent_map).unwrap();
            prop_assert_eq!(&table, &recomputed);
        }
        assert_closure_invariants(&table, &parent_map);
    }

    #[test]
    fn attach_then_detach_restores_closure(
        parents in forest_strategy(),
        a in 0..MAX_NODES,
        b in 0..MAX_NODES,
    ) {
        let (mut table, ids, _) = build(&parents);
        let node = ids[a % ids.len()];
        let parent = ids[b % ids.len()];
        // Start from a root so that detaching afterwards is the exact inverse.
        table.move_subtree(node, None).unwrap();
        let before = table.clone();

        if table.move_subtree(node, Some(parent)).is_ok() {
            table.move_subtree(node, None).unwrap();
        }
        prop_assert_eq!(table, before);
    }
}
