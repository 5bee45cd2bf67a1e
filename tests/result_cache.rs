use std::collections::HashSet;
use std::sync::Arc;

use framedag::alloc::{ForbiddenSet, Retention};
use framedag::cache::ResultCache;
use framedag::engine::{Evaluator, EvaluatorConfig};
use framedag::graph::{PayloadKind, StageGraph};
use framedag_test_utils::builders::{GraphBuilder, id};
use framedag_test_utils::init_tracing;
use framedag_test_utils::stages::{ExecutionLog, TestStage, clear, executions, snapshot};
use proptest::prelude::*;

/// Src -> Filter -> Sink, with both producers cacheable.
fn cacheable_chain() -> (StageGraph, ExecutionLog) {
    GraphBuilder::new()
        .stage(TestStage::new("Src").output("out", PayloadKind::Image).cacheable())
        .stage(TestStage::new("Filter").image_filter().cacheable())
        .stage(TestStage::new("Sink").input("in", PayloadKind::Image).sink())
        .connect("Src.out", "Filter.in")
        .connect("Filter.out", "Sink.in")
        .build()
}

fn evaluator() -> Evaluator {
    Evaluator::new(EvaluatorConfig::with_pool_size(8), Arc::new(ForbiddenSet::new(0)))
}

#[test]
fn cacheable_chain_into_a_sink_qualifies() {
    let (graph, _) = cacheable_chain();
    let plan = ResultCache::plan(&graph);

    assert!(plan.qualifies(id(&graph, "Src")));
    assert!(plan.qualifies(id(&graph, "Filter")));
    assert!(!plan.qualifies(id(&graph, "Sink")));

    // Flags start cleared.
    assert!(plan.qualifying().all(|s| !plan.is_valid(s)));
}

#[test]
fn non_cacheable_upstream_disqualifies() {
    let (graph, _) = GraphBuilder::new()
        .stage(TestStage::new("Src").output("out", PayloadKind::Image))
        .stage(TestStage::new("Filter").image_filter().cacheable())
        .stage(TestStage::new("Sink").input("in", PayloadKind::Image).sink())
        .connect("Src.out", "Filter.in")
        .connect("Filter.out", "Sink.in")
        .build();

    let plan = ResultCache::plan(&graph);
    assert!(!plan.qualifies(id(&graph, "Filter")));
    assert_eq!(plan.qualifying().count(), 0);
}

#[test]
fn cache_boundary_stops_the_upstream_walk() {
    let (graph, _) = GraphBuilder::new()
        .stage(TestStage::new("Src").output("out", PayloadKind::Image).boundary())
        .stage(TestStage::new("Filter").image_filter().cacheable())
        .stage(TestStage::new("Sink").input("in", PayloadKind::Image).sink())
        .connect("Src.out", "Filter.in")
        .connect("Filter.out", "Sink.in")
        .build();

    let plan = ResultCache::plan(&graph);
    assert!(plan.qualifies(id(&graph, "Filter")));
    assert!(!plan.qualifies(id(&graph, "Src")));
}

#[test]
fn non_cacheable_downstream_disqualifies() {
    let (graph, _) = GraphBuilder::new()
        .stage(TestStage::new("Src").output("out", PayloadKind::Image).cacheable())
        .stage(TestStage::new("Filter").image_filter())
        .stage(TestStage::new("Sink").input("in", PayloadKind::Image).sink())
        .stage(TestStage::new("DeadEnd").input("in", PayloadKind::Image).cacheable())
        .connect("Src.out", "Filter.in")
        .connect("Filter.out", "Sink.in")
        .build();

    let plan = ResultCache::plan(&graph);
    assert!(!plan.qualifies(id(&graph, "Src")));
    assert!(!plan.qualifies(id(&graph, "DeadEnd")));
}

#[test]
fn valid_stages_are_skipped_on_later_ticks() {
    init_tracing();
    let (mut graph, log) = cacheable_chain();
    let mut evaluator = evaluator();
    evaluator.compile(&graph).unwrap();

    let first = evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(first.executed.len(), 3);
    assert_eq!(snapshot(&log), vec!["Src", "Filter", "Sink"]);

    clear(&log);
    let second = evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(second.skipped, vec![id(&graph, "Src"), id(&graph, "Filter")]);
    assert_eq!(snapshot(&log), vec!["Sink"]);
}

#[test]
fn cached_outputs_keep_their_slots_published() {
    let forbidden = Arc::new(ForbiddenSet::new(0));
    let (graph, _) = cacheable_chain();
    let mut evaluator = Evaluator::new(EvaluatorConfig::with_pool_size(8), forbidden.clone());
    evaluator.compile(&graph).unwrap();

    let records = evaluator.compiled().unwrap().slot_records();
    assert!(records.iter().all(|r| r.retention == Retention::Cached));
    assert_eq!(forbidden.published_by(evaluator.owner_id()).len(), 2);
    assert!(records.iter().all(|r| !r.is_released()));
}

#[test]
fn invalidating_a_stage_reruns_it_and_its_downstream() {
    let (mut graph, log) = cacheable_chain();
    let mut evaluator = evaluator();
    evaluator.compile(&graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();

    let cleared = evaluator.invalidate(id(&graph, "Filter"));
    assert_eq!(cleared, vec![id(&graph, "Filter")]);
    assert!(evaluator.is_valid(id(&graph, "Src")));

    clear(&log);
    evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(snapshot(&log), vec!["Filter", "Sink"]);

    clear(&log);
    evaluator.invalidate(id(&graph, "Src"));
    evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(snapshot(&log), vec!["Src", "Filter", "Sink"]);
}

#[test]
fn invalidate_all_reruns_everything() {
    let (mut graph, log) = cacheable_chain();
    let mut evaluator = evaluator();
    evaluator.compile(&graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();

    evaluator.invalidate_all();
    assert!(!evaluator.is_valid(id(&graph, "Src")));
    evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(executions(&log, "Src"), 2);
    assert_eq!(executions(&log, "Filter"), 2);
}

#[test]
fn recompile_starts_with_cleared_flags() {
    let (mut graph, log) = cacheable_chain();
    let mut evaluator = evaluator();
    evaluator.compile(&graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();

    evaluator.compile(&graph).unwrap();
    evaluator.evaluate(&mut graph).unwrap();
    assert_eq!(executions(&log, "Src"), 2);
}

fn random_graph(cacheable: &[bool], edges: &[(usize, usize)]) -> StageGraph {
    let n = cacheable.len();
    let mut builder = GraphBuilder::new();
    for (i, c) in cacheable.iter().enumerate() {
        let mut stage = TestStage::new(&format!("s{i}"))
            .multi_input("in", PayloadKind::Image)
            .output("out", PayloadKind::Image);
        if *c {
            stage = stage.cacheable();
        }
        if i == n - 1 {
            stage = stage.sink();
        }
        builder = builder.stage(stage);
    }

    let mut seen = HashSet::new();
    for (a, b) in edges {
        let (from, to) = (a % n, b % n);
        if from < to && seen.insert((from, to)) {
            builder = builder.connect(&format!("s{from}.out"), &format!("s{to}.in"));
        }
    }
    builder.build().0
}

proptest! {
    #[test]
    fn invalidate_clears_exactly_the_forward_set(
        cacheable in proptest::collection::vec(any::<bool>(), 2..10),
        edges in proptest::collection::vec((0usize..10, 0usize..10), 0..30),
        target in 0usize..10,
    ) {
        let graph = random_graph(&cacheable, &edges);
        let mut plan = ResultCache::plan(&graph);
        let qualifying: Vec<_> = plan.qualifying().collect();
        for s in &qualifying {
            plan.mark_valid(*s);
        }

        let ids: Vec<_> = graph.stage_ids().collect();
        let target = ids[target % ids.len()];
        let forward = plan.forward_set(target).cloned().unwrap_or_default();
        let cleared = plan.invalidate(target);

        for s in &qualifying {
            let affected = *s == target || forward.contains(s);
            prop_assert_eq!(plan.is_valid(*s), !affected);
            prop_assert_eq!(cleared.contains(s), affected);
        }
        prop_assert!(!forward.contains(&target));
    }
}
