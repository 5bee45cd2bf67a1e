use std::sync::Arc;

use framedag::alloc::ForbiddenSet;
use framedag::dag::{find_cycle, validate_graph};
use framedag::engine::{Evaluator, EvaluatorConfig};
use framedag::errors::{CompileError, GraphError, GraphInvalidError};
use framedag::graph::{PayloadKind, StageGraph};
use framedag_test_utils::builders::{GraphBuilder, id, image_chain};
use framedag_test_utils::init_tracing;
use framedag_test_utils::stages::TestStage;

fn cyclic_graph() -> StageGraph {
    // A -> B -> C -> A, with C also feeding a sink.
    let (graph, _) = GraphBuilder::new()
        .stage(
            TestStage::new("A")
                .input("in", PayloadKind::Image)
                .output("out", PayloadKind::Image),
        )
        .stage(TestStage::new("B").image_filter())
        .stage(
            TestStage::new("C")
                .input("in", PayloadKind::Image)
                .output("out", PayloadKind::Image)
                .output("show", PayloadKind::Image),
        )
        .stage(TestStage::new("Sink").input("in", PayloadKind::Image).sink())
        .connect("A.out", "B.in")
        .connect("B.out", "C.in")
        .connect("C.out", "A.in")
        .connect("C.show", "Sink.in")
        .build();
    graph
}

#[test]
fn cycle_is_reported_with_its_stages() {
    init_tracing();
    let graph = cyclic_graph();

    let err = validate_graph(&graph).unwrap_err();
    let GraphInvalidError::CycleDetected { stages } = err else {
        panic!("expected a cycle, got {err:?}");
    };
    let mut sorted = stages.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["A", "B", "C"]);
    assert!(find_cycle(&graph).is_some());
}

#[test]
fn self_loop_is_a_cycle() {
    let (graph, _) = GraphBuilder::new()
        .stage(
            TestStage::new("Loop")
                .multi_input("in", PayloadKind::Image)
                .output("out", PayloadKind::Image)
                .sink(),
        )
        .connect("Loop.out", "Loop.in")
        .build();

    assert_eq!(
        validate_graph(&graph),
        Err(GraphInvalidError::CycleDetected {
            stages: vec!["Loop".to_string()]
        })
    );
}

#[test]
fn graph_without_sink_is_rejected() {
    let (graph, _) = GraphBuilder::new()
        .stage(TestStage::new("A").output("out", PayloadKind::Image))
        .stage(TestStage::new("B").input("in", PayloadKind::Image))
        .connect("A.out", "B.in")
        .build();

    assert_eq!(validate_graph(&graph), Err(GraphInvalidError::NoSink));
}

#[test]
fn acyclic_graph_lists_its_sinks() {
    let (graph, _) = image_chain(&["A", "B", "C"]).build();
    let validated = validate_graph(&graph).unwrap();
    assert_eq!(validated.sinks, vec![id(&graph, "C")]);
}

#[test]
fn failed_compile_leaves_the_free_list_untouched() {
    init_tracing();
    let forbidden = Arc::new(ForbiddenSet::new(0));
    let mut evaluator = Evaluator::new(EvaluatorConfig::with_pool_size(4), forbidden.clone());

    let before = evaluator.free_slots();
    let err = evaluator.compile(&cyclic_graph()).unwrap_err();
    assert!(matches!(err, CompileError::Graph(GraphInvalidError::CycleDetected { .. })));

    assert_eq!(evaluator.free_slots(), before);
    assert!(evaluator.compiled().is_none());
    assert!(forbidden.all().is_empty());
}

#[test]
fn failed_compile_keeps_the_previous_compile() {
    let (mut graph, _) = image_chain(&["A", "B"]).build();
    let mut evaluator =
        Evaluator::new(EvaluatorConfig::with_pool_size(4), Arc::new(ForbiddenSet::new(0)));
    evaluator.compile(&graph).unwrap();
    let previous_order = evaluator.compiled().unwrap().order().to_vec();

    // Dropping the only sink makes the next compile fail.
    let sink = id(&graph, "B");
    graph.remove_stage(sink);
    assert!(evaluator.compile(&graph).is_err());

    assert_eq!(evaluator.compiled().unwrap().order(), previous_order.as_slice());
    assert!(evaluator.is_stale(&graph));
}

#[test]
fn construction_rejects_bad_connections() {
    let (mut graph, _) = GraphBuilder::new()
        .stage(TestStage::new("A").output("out", PayloadKind::Image))
        .stage(TestStage::new("A2").output("out", PayloadKind::Image))
        .stage(TestStage::new("B").input("in", PayloadKind::Image).sink())
        .build();

    assert!(matches!(
        graph.add(TestStage::new("A")),
        Err(GraphError::DuplicateStage(name)) if name == "A"
    ));
    assert!(matches!(
        graph.connect_names("A", "missing", "B", "in"),
        Err(GraphError::UnknownPort { .. })
    ));
    assert!(matches!(
        graph.connect_names("B", "in", "A", "out"),
        Err(GraphError::WrongDirection { .. })
    ));
    assert!(matches!(
        graph.connect_names("Nope", "out", "B", "in"),
        Err(GraphError::UnknownStage(_))
    ));

    graph.connect_names("A", "out", "B", "in").unwrap();
    assert!(matches!(
        graph.connect_names("A", "out", "B", "in"),
        Err(GraphError::DuplicateConnection { .. })
    ));
    assert!(matches!(
        graph.connect_names("A2", "out", "B", "in"),
        Err(GraphError::PortAlreadyConnected { .. })
    ));
}

#[test]
fn private_ports_cannot_be_connected() {
    let (mut graph, _) = GraphBuilder::new()
        .stage(TestStage::new("A").private("scratch"))
        .stage(TestStage::new("B").input("in", PayloadKind::Image).sink())
        .build();

    assert!(matches!(
        graph.connect_names("A", "scratch", "B", "in"),
        Err(GraphError::WrongDirection { .. })
    ));
}

#[test]
fn edits_bump_the_revision() {
    let (mut graph, _) = image_chain(&["A", "B"]).build();
    let start = graph.revision();

    let a = graph.port_index(id(&graph, "A"), "out").unwrap();
    let b = graph.port_index(id(&graph, "B"), "in").unwrap();
    let from = framedag::graph::PortRef::new(id(&graph, "A"), a);
    let to = framedag::graph::PortRef::new(id(&graph, "B"), b);

    assert!(graph.disconnect(from, to));
    assert!(!graph.disconnect(from, to));
    assert_eq!(graph.revision(), start + 1);
}
