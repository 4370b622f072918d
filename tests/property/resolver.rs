use std::collections::{HashMap, HashSet};

use batchdag::dag::{Resolver, UnitId, WorkGraph};
use batchdag::errors::BatchDagError;
use batchdag_test_utils::builders::add_named;
use proptest::prelude::*;

// Strategy to generate an acyclic graph: unit N may only depend on units
// 0..N-1. Returned as the edge list so failures shrink readably.
fn dag_strategy(max_units: usize) -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1..=max_units).prop_flat_map(|n| {
        let edges = proptest::collection::vec((any::<usize>(), any::<usize>()), 0..n * 2);
        edges.prop_map(move |raw| {
            let mut edges = HashSet::new();
            for (a, b) in raw {
                if n < 2 {
                    break;
                }
                let (lo, hi) = (a % n, b % n);
                if lo < hi {
                    edges.insert((lo, hi));
                } else if hi < lo {
                    edges.insert((hi, lo));
                }
            }
            let mut edges: Vec<_> = edges.into_iter().collect();
            edges.sort_unstable();
            (n, edges)
        })
    })
}

fn build(n: usize, edges: &[(usize, usize)]) -> (WorkGraph, Vec<UnitId>) {
    let mut graph = WorkGraph::new();
    let ids: Vec<UnitId> = (0..n).map(|i| add_named(&mut graph, &format!("u{i}"))).collect();
    for &(up, down) in edges {
        graph.before(ids[up], ids[down]).unwrap();
    }
    (graph, ids)
}

proptest! {
    #[test]
    fn order_respects_every_edge((n, edges) in dag_strategy(12)) {
        let (graph, _) = build(n, &edges);
        let order: Vec<String> = Resolver::new(&graph).resolve_all().unwrap().map(|s| s.task_id).collect();

        prop_assert_eq!(order.len(), n);
        let pos: HashMap<&str, usize> = order.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect();
        prop_assert_eq!(pos.len(), n);
        for (up, down) in edges {
            let (u, d) = (format!("u{up}"), format!("u{down}"));
            prop_assert!(pos[u.as_str()] < pos[d.as_str()], "{} must precede {}", u, d);
        }
    }

    #[test]
    fn order_is_deterministic((n, edges) in dag_strategy(12)) {
        let (graph, _) = build(n, &edges);
        let first: Vec<String> = Resolver::new(&graph).resolve_all().unwrap().map(|s| s.task_id).collect();
        let second: Vec<String> = Resolver::new(&graph).resolve_all().unwrap().map(|s| s.task_id).collect();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn closing_edge_creates_detected_cycle((n, edges) in dag_strategy(12)) {
        prop_assume!(!edges.is_empty());
        let (mut graph, ids) = build(n, &edges);

        // Any existing edge reversed closes a cycle through both endpoints.
        let (up, down) = edges[0];
        graph.before(ids[down], ids[up]).unwrap();

        match Resolver::new(&graph).resolve_all() {
            Err(BatchDagError::CyclicDependency { units }) => {
                let up_name = format!("u{up}");
                let down_name = format!("u{down}");
                prop_assert!(units.contains(&up_name));
                prop_assert!(units.contains(&down_name));
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|s| s.len())),
        }
    }
}
