//! Properties over seeded random edge proposals.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use taskweave::core::{EdgeKind, Task, TaskGraph, TaskId};
use taskweave::Error;

use crate::fixtures::{Harness, WORKSPACE};

const SEEDS: [u64; 4] = [7, 42, 1337, 20240601];

fn graph_with(n: usize) -> (TaskGraph, Vec<TaskId>) {
    let mut graph = TaskGraph::new();
    let ids = (0..n)
        .map(|i| {
            let task = Task::new(&format!("t{}", i), "");
            let id = task.id;
            graph.add_task(task);
            id
        })
        .collect();
    (graph, ids)
}

fn random_kind(rng: &mut StdRng) -> EdgeKind {
    match rng.gen_range(0..4) {
        0 => EdgeKind::FinishToStart,
        1 => EdgeKind::StartToStart,
        2 => EdgeKind::FinishToFinish,
        _ => EdgeKind::StartToFinish,
    }
}

#[test]
fn test_accepted_edges_stay_acyclic() {
    for seed in SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut graph, ids) = graph_with(12);

        for _ in 0..200 {
            let s = ids[rng.gen_range(0..ids.len())];
            let t = ids[rng.gen_range(0..ids.len())];
            let _ = graph.add_edge(&s, &t, random_kind(&mut rng));
            assert!(graph.is_acyclic(), "seed {} produced a cycle", seed);
        }
        assert!(graph.topological_order().is_ok());
    }
}

#[test]
fn test_allowed_check_then_add_never_fails() {
    for seed in SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut graph, ids) = graph_with(10);

        for _ in 0..150 {
            let s = ids[rng.gen_range(0..ids.len())];
            let t = ids[rng.gen_range(0..ids.len())];
            let check = graph.can_add_edge(&s, &t);
            let result = graph.add_edge(&s, &t, EdgeKind::FinishToStart);
            assert_eq!(check.allowed, result.is_ok(), "seed {}", seed);
            if let Err(e) = result {
                assert!(matches!(e, Error::Structural(_)));
                assert!(check.reason.is_some());
            }
        }
    }
}

#[test]
fn test_critical_path_never_shrinks() {
    for seed in SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut graph, ids) = graph_with(15);
        let mut last = graph.critical_path().len();
        assert_eq!(last, 1);

        for _ in 0..120 {
            let s = ids[rng.gen_range(0..ids.len())];
            let t = ids[rng.gen_range(0..ids.len())];
            if graph.add_edge(&s, &t, EdgeKind::FinishToStart).is_ok() {
                let len = graph.critical_path().len();
                assert!(len >= last, "seed {}: {} < {}", seed, len, last);
                last = len;
            }
        }
        assert_eq!(graph.metrics().critical_path_length, last);
    }
}

#[test]
fn test_critical_path_is_a_real_chain() {
    for seed in SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut graph, ids) = graph_with(12);
        for _ in 0..60 {
            let s = ids[rng.gen_range(0..ids.len())];
            let t = ids[rng.gen_range(0..ids.len())];
            let _ = graph.add_edge(&s, &t, EdgeKind::FinishToStart);
        }

        let path = graph.critical_path();
        assert!(graph.blockers(&path[0]).is_empty());
        for pair in path.windows(2) {
            assert!(graph.has_edge(&pair[0], &pair[1]), "seed {}", seed);
        }
    }
}

/// Same property through the engine, which also persists each edge.
#[tokio::test]
async fn test_engine_accepts_only_acyclic_edges() {
    let h = Harness::keyword();
    let mut ids = Vec::new();
    for i in 0..8 {
        let task = Task::new(&format!("t{}", i), "").in_workspace(WORKSPACE);
        ids.push(h.engine.register_task(task).await.unwrap().id);
    }

    let mut rng = StdRng::seed_from_u64(99);
    let mut accepted = 0;
    for _ in 0..60 {
        let s = ids[rng.gen_range(0..ids.len())];
        let t = ids[rng.gen_range(0..ids.len())];
        if h.engine.add_edge(&s, &t, EdgeKind::FinishToStart).await.is_ok() {
            accepted += 1;
        }
    }

    let graph = h.engine.snapshot().await;
    assert!(graph.is_acyclic());
    assert_eq!(graph.edge_count(), accepted);
    assert_eq!(h.store.snapshot().edges.len(), accepted);
}
