use std::collections::BTreeSet;
use std::sync::Arc;

use framedag::alloc::{ForbiddenMessage, ForbiddenSet};
use framedag::engine::{Evaluator, EvaluatorConfig};
use framedag::graph::{PayloadKind, StageGraph};
use framedag_test_utils::builders::{GraphBuilder, id};
use framedag_test_utils::init_tracing;
use framedag_test_utils::stages::TestStage;

fn set(slots: &[usize]) -> BTreeSet<usize> {
    slots.iter().copied().collect()
}

/// Source with one persistent output feeding a sink.
fn persistent_graph() -> StageGraph {
    GraphBuilder::new()
        .stage(TestStage::new("Src").persistent_output("out"))
        .stage(TestStage::new("Sink").input("in", PayloadKind::Image).sink())
        .connect("Src.out", "Sink.in")
        .build()
        .0
}

fn first_slot(evaluator: &Evaluator, graph: &StageGraph) -> usize {
    evaluator
        .compiled()
        .unwrap()
        .binding(graph, id(graph, "Src"), "out", 0)
        .unwrap()
        .slot()
        .unwrap()
}

#[test]
fn schedulers_on_one_pool_avoid_each_others_slots() {
    init_tracing();
    let forbidden = Arc::new(ForbiddenSet::new(0));
    let graph = persistent_graph();

    let mut first = Evaluator::new(EvaluatorConfig::with_pool_size(4), forbidden.clone());
    first.compile(&graph).unwrap();
    assert_eq!(first_slot(&first, &graph), 0);
    assert_eq!(forbidden.all(), set(&[0]));

    let mut second = Evaluator::new(EvaluatorConfig::with_pool_size(4), forbidden.clone());
    assert_eq!(second.free_slots(), vec![1, 2, 3]);
    second.compile(&graph).unwrap();
    assert_eq!(first_slot(&second, &graph), 1);
    assert_eq!(forbidden.all(), set(&[0, 1]));

    // An owner never forbids itself.
    assert_eq!(forbidden.forbidden_for(first.owner_id()), set(&[1]));
}

#[test]
fn dropping_a_scheduler_withdraws_its_slots() {
    let forbidden = Arc::new(ForbiddenSet::new(0));
    let graph = persistent_graph();

    let mut first = Evaluator::new(EvaluatorConfig::with_pool_size(4), forbidden.clone());
    first.compile(&graph).unwrap();
    drop(first);
    assert!(forbidden.all().is_empty());

    let mut second = Evaluator::new(EvaluatorConfig::with_pool_size(4), forbidden.clone());
    second.compile(&graph).unwrap();
    assert_eq!(first_slot(&second, &graph), 0);
}

#[test]
fn recompile_replaces_the_previous_publication() {
    let forbidden = Arc::new(ForbiddenSet::new(0));
    let mut graph = persistent_graph();

    let mut evaluator = Evaluator::new(EvaluatorConfig::with_pool_size(4), forbidden.clone());
    evaluator.compile(&graph).unwrap();
    assert_eq!(forbidden.published_by(evaluator.owner_id()), set(&[0]));

    // Replace the persistent producer with a plain one.
    let src = id(&graph, "Src");
    graph.remove_stage(src);
    graph
        .add(TestStage::new("Plain").output("out", PayloadKind::Image))
        .unwrap();
    graph.connect_names("Plain", "out", "Sink", "in").unwrap();

    evaluator.compile(&graph).unwrap();
    assert!(forbidden.published_by(evaluator.owner_id()).is_empty());
    assert!(forbidden.all().is_empty());
}

#[test]
fn messages_for_other_pools_are_ignored() {
    let forbidden = ForbiddenSet::new(3);

    let applied = forbidden.apply(ForbiddenMessage::Add {
        pool: 7,
        owner: 1,
        slots: set(&[2, 5]),
    });
    assert!(!applied);
    assert!(forbidden.all().is_empty());

    assert!(forbidden.apply(ForbiddenMessage::Add {
        pool: 3,
        owner: 1,
        slots: set(&[2, 5]),
    }));
    assert!(!forbidden.apply(ForbiddenMessage::Remove { pool: 7, owner: 1 }));
    assert_eq!(forbidden.all(), set(&[2, 5]));
}

#[test]
fn add_replaces_and_remove_withdraws() {
    let forbidden = ForbiddenSet::new(0);
    forbidden.publish(1, set(&[1, 2]));
    forbidden.publish(2, set(&[4]));
    forbidden.publish(1, set(&[3]));

    assert_eq!(forbidden.published_by(1), set(&[3]));
    assert_eq!(forbidden.forbidden_for(2), set(&[3]));
    assert_eq!(forbidden.forbidden_for(9), set(&[3, 4]));

    forbidden.withdraw(1);
    assert_eq!(forbidden.all(), set(&[4]));

    // Publishing nothing is the same as withdrawing.
    forbidden.publish(2, BTreeSet::new());
    assert!(forbidden.all().is_empty());
}
